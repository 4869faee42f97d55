//! The event store: public facade over the mapper and recorder.

use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use crate::{
    codec::IntegrityError,
    event::{DomainEvent, StoredEvent},
    mapper::{Mapper, MapperError},
    recorder::{PersistenceError, RecordConflictError, Recorder, RecorderError},
    transcoder::TranscodingError,
};

/// Error type for event store operations.
///
/// Flattens the mapper and recorder error families into the caller-facing
/// kinds: the retriable [`RecordConflictError`], generic persistence
/// failures, transcoding failures, and integrity failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Conflict(#[from] RecordConflictError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Transcoding(#[from] TranscodingError),
    #[error(transparent)]
    Integrity(#[from] IntegrityError),
}

impl From<RecorderError> for StoreError {
    fn from(error: RecorderError) -> Self {
        match error {
            RecorderError::Conflict(conflict) => Self::Conflict(conflict),
            RecorderError::Persistence(persistence) => Self::Persistence(persistence),
        }
    }
}

impl From<MapperError> for StoreError {
    fn from(error: MapperError) -> Self {
        match error {
            MapperError::Transcoding(transcoding) => Self::Transcoding(transcoding),
            MapperError::Integrity(integrity) => Self::Integrity(integrity),
        }
    }
}

/// Facade over [`Mapper`] + [`Recorder`].
///
/// `put` encodes and atomically appends; `get` reads, upcasts, and decodes
/// lazily. The store is cheap to clone and shareable across threads.
#[derive(Clone)]
pub struct EventStore {
    mapper: Arc<Mapper>,
    recorder: Arc<dyn Recorder>,
}

impl EventStore {
    #[must_use]
    pub fn new(mapper: Arc<Mapper>, recorder: Arc<dyn Recorder>) -> Self {
        Self { mapper, recorder }
    }

    /// The recorder behind this store, for components that read the global
    /// stream directly (the notification log does).
    #[must_use]
    pub fn recorder(&self) -> Arc<dyn Recorder> {
        self.recorder.clone()
    }

    /// Map and atomically append a batch of events.
    ///
    /// Atomicity covers the whole call, including events from several
    /// aggregates: either every record commits or none does. Returns the
    /// assigned notification ids in input order. A successful `put` is
    /// durable before this method returns.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when any record loses the optimistic
    /// concurrency race, in which case nothing was written.
    #[tracing::instrument(skip(self, events), fields(event_count = events.len()))]
    pub fn put(&self, events: &[DomainEvent]) -> Result<Vec<u64>, StoreError> {
        if events.is_empty() {
            return Ok(Vec::new());
        }
        let records = events
            .iter()
            .map(|event| self.mapper.to_stored(event))
            .collect::<Result<Vec<_>, _>>()?;
        let ids = self.recorder.insert_events(&records)?;
        tracing::debug!(events_appended = events.len(), "events committed");
        Ok(ids)
    }

    /// Read an originator's events.
    ///
    /// Records are fetched once, then upcast and decoded lazily as the
    /// returned iterator is advanced. The iterator is finite and not
    /// restartable.
    ///
    /// # Errors
    ///
    /// Returns a persistence error when the read fails; decode failures
    /// surface per item from the iterator.
    pub fn get(
        &self,
        originator_id: &Uuid,
        gt: Option<u64>,
        lte: Option<u64>,
        desc: bool,
        limit: Option<usize>,
    ) -> Result<Events<'_>, StoreError> {
        let records = self
            .recorder
            .select_events(originator_id, gt, lte, desc, limit)?;
        tracing::trace!(records = records.len(), %originator_id, "events selected");
        Ok(Events {
            mapper: &self.mapper,
            records: records.into_iter(),
        })
    }
}

/// Iterator over an originator's decoded events.
pub struct Events<'a> {
    mapper: &'a Mapper,
    records: std::vec::IntoIter<StoredEvent>,
}

impl Iterator for Events<'_> {
    type Item = Result<DomainEvent, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.records.next()?;
        Some(self.mapper.to_domain(&record).map_err(StoreError::from))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.records.size_hint()
    }
}
