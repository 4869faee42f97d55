//! Aggregate reconstruction and persistence.
//!
//! The [`Repository`] replays an aggregate's recorded events through its
//! reducer, seeding the fold from the newest snapshot when a snapshot store
//! is configured. Reads are version-bounded: `get(id, Some(v))` rebuilds the
//! aggregate as it was at version `v`, and a bound beyond the newest record
//! clamps to the newest available state rather than failing.

use std::marker::PhantomData;

use thiserror::Error;
use uuid::Uuid;

use crate::{
    aggregate::Aggregate,
    event::DomainEvent,
    snapshot::SnapshotStore,
    store::{EventStore, StoreError},
};

/// Error type for repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Neither a snapshot nor any event exists for the requested aggregate.
    #[error("aggregate not found")]
    AggregateNotFound,
    /// Snapshots were requested but the repository has no snapshot store.
    #[error("snapshotting is not enabled for this repository")]
    SnapshottingNotEnabled,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Reconstructs aggregates of type `A` from their recorded events.
///
/// Cheap to clone; read-only after construction.
#[derive(Clone)]
pub struct Repository<A> {
    events: EventStore,
    snapshots: Option<SnapshotStore>,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A: Aggregate> Repository<A> {
    #[must_use]
    pub fn new(events: EventStore) -> Self {
        Self {
            events,
            snapshots: None,
            _aggregate: PhantomData,
        }
    }

    /// Enable the snapshot fast-path for loads and
    /// [`take_snapshot`](Self::take_snapshot).
    #[must_use]
    pub fn with_snapshots(mut self, snapshots: SnapshotStore) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    #[must_use]
    pub const fn event_store(&self) -> &EventStore {
        &self.events
    }

    /// Reconstruct the aggregate, optionally at a version bound.
    ///
    /// Repeated calls over the same committed records yield equal state: the
    /// reducer is pure and the stored records are immutable. A bound above
    /// the newest version returns the aggregate at its newest version.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::AggregateNotFound`] when no snapshot and no
    /// events exist at or below the bound, or a [`StoreError`] from the read
    /// path.
    pub fn get(&self, aggregate_id: &Uuid, version: Option<u64>) -> Result<A, RepositoryError> {
        let snapshot = match &self.snapshots {
            Some(snapshots) => snapshots.get_latest(aggregate_id, version)?,
            None => None,
        };

        let mut start = None;
        let mut state = match &snapshot {
            Some(snapshot) => {
                start = Some(snapshot.originator_version);
                Some(A::from_snapshot(snapshot).map_err(StoreError::from)?)
            }
            None => None,
        };

        for event in self.events.get(aggregate_id, start, version, false, None)? {
            let event = event?;
            state = Some(A::recover(state.take(), &event));
        }

        match state {
            Some(aggregate) => {
                tracing::trace!(
                    %aggregate_id,
                    version = aggregate.version(),
                    from_snapshot = snapshot.is_some(),
                    "aggregate reconstructed"
                );
                Ok(aggregate)
            }
            None => Err(RepositoryError::AggregateNotFound),
        }
    }

    /// Drain the aggregate's pending events and commit them in one atomic
    /// `put`. Returns the assigned notification ids.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] (wrapped) when another writer saved
    /// the aggregate first; reload and retry. The pending buffer is drained
    /// either way, matching the at-most-once semantics of the underlying
    /// insert.
    pub fn save(&self, aggregate: &mut A) -> Result<Vec<u64>, RepositoryError> {
        let events = aggregate.collect_pending_events();
        Ok(self.events.put(&events)?)
    }

    /// Capture the aggregate state at the given version (or its newest) into
    /// the snapshot store. Returns the version the snapshot was taken at.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::SnapshottingNotEnabled`] when the
    /// repository was built without a snapshot store, and
    /// [`StoreError::Conflict`] (wrapped, benign) when a snapshot already
    /// exists at that version.
    pub fn take_snapshot(
        &self,
        aggregate_id: &Uuid,
        version: Option<u64>,
    ) -> Result<u64, RepositoryError> {
        let Some(snapshots) = &self.snapshots else {
            return Err(RepositoryError::SnapshottingNotEnabled);
        };
        let aggregate = self.get(aggregate_id, version)?;
        let snapshot = DomainEvent::new(
            aggregate.id(),
            aggregate.version(),
            A::TOPIC,
            aggregate.snapshot_state(),
        );
        snapshots.put(&snapshot)?;
        Ok(aggregate.version())
    }
}
