//! Snapshot persistence.
//!
//! A snapshot is structurally an event record: its `topic` names the
//! aggregate type, its `state` is the captured aggregate state, and its
//! version is the version the aggregate had when the snapshot was taken. It
//! goes through the same mapper pipeline as events (so snapshots are
//! compressed and encrypted exactly like the records they summarise) but
//! lives in a separate store and never receives a notification id.

use std::sync::Arc;

use uuid::Uuid;

use crate::{
    event::DomainEvent,
    mapper::Mapper,
    recorder::SnapshotRecorder,
    store::StoreError,
};

/// Facade over [`Mapper`] + [`SnapshotRecorder`].
#[derive(Clone)]
pub struct SnapshotStore {
    mapper: Arc<Mapper>,
    recorder: Arc<dyn SnapshotRecorder>,
}

impl SnapshotStore {
    #[must_use]
    pub fn new(mapper: Arc<Mapper>, recorder: Arc<dyn SnapshotRecorder>) -> Self {
        Self { mapper, recorder }
    }

    /// Map and insert one snapshot record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when a snapshot already exists at the
    /// record's `(originator_id, version)` key; callers may treat that as
    /// benign, since the existing snapshot captures the same state.
    pub fn put(&self, snapshot: &DomainEvent) -> Result<(), StoreError> {
        let record = self.mapper.to_stored(snapshot)?;
        self.recorder.insert_snapshot(&record)?;
        tracing::debug!(
            originator_id = %snapshot.originator_id,
            originator_version = snapshot.originator_version,
            "snapshot stored"
        );
        Ok(())
    }

    /// The highest snapshot with `version <= lte` (or the latest overall when
    /// unbounded), decoded; `None` when the originator has no snapshot in
    /// range.
    ///
    /// # Errors
    ///
    /// Returns a persistence error when the read fails, or a
    /// transcoding/integrity error when the snapshot cannot be decoded.
    pub fn get_latest(
        &self,
        originator_id: &Uuid,
        lte: Option<u64>,
    ) -> Result<Option<DomainEvent>, StoreError> {
        let records = self
            .recorder
            .select_snapshots(originator_id, None, lte, true, Some(1))?;
        records
            .first()
            .map(|record| self.mapper.to_domain(record).map_err(StoreError::from))
            .transpose()
    }
}
