//! Storage contracts for event records, notifications, and snapshots.
//!
//! A [`Recorder`] persists stored events and assigns their notification ids;
//! a [`SnapshotRecorder`] persists snapshot records, which never receive
//! notification ids. Both contracts are synchronous and blocking: any call
//! may suspend on I/O, and these calls are the core's only suspension
//! points.
//!
//! The [`memory`] module provides thread-safe reference implementations.

use thiserror::Error;
use uuid::Uuid;

use crate::event::{Notification, StoredEvent};

pub mod memory;

/// A uniqueness violation on `(originator_id, originator_version)` or on a
/// snapshot key.
///
/// This is the canonical retriable error: the caller lost an optimistic
/// concurrency race and should reload the aggregate before trying again.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "record conflict for originator {originator_id} at version {originator_version} \
     (hint: another writer got there first; reload and retry)"
)]
pub struct RecordConflictError {
    pub originator_id: Uuid,
    pub originator_version: u64,
}

/// Any recorder failure that is not a version conflict: connectivity,
/// unrelated integrity violations, exhausted store-internal retries.
#[derive(Debug, Error)]
#[error("persistence error: {message}")]
pub struct PersistenceError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl PersistenceError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    #[must_use]
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Error type for recorder operations.
///
/// Callers that care distinguish the retriable [`RecordConflictError`] from
/// everything else; callers that do not can propagate the whole enum.
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error(transparent)]
    Conflict(#[from] RecordConflictError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Contract for the event record store.
///
/// Implementations must make each [`insert_events`](Recorder::insert_events)
/// call atomic, assign notification ids that are strictly increasing in
/// commit order, and serialize concurrent inserts well enough that a reader
/// observing notification id `N` can assume every committed id below `N` is
/// either visible or permanently absent.
pub trait Recorder: Send + Sync {
    /// Atomically insert all records, returning their notification ids in
    /// input order. Ids are contiguous within one call but not necessarily
    /// adjacent to those of earlier calls.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::Conflict`] when any record would violate the
    /// per-aggregate `(originator_id, originator_version)` uniqueness
    /// constraint; in that case no record of the batch is inserted.
    fn insert_events(&self, events: &[StoredEvent]) -> Result<Vec<u64>, RecorderError>;

    /// Read an originator's records by version range.
    ///
    /// `gt`/`lte` bound `originator_version` exclusively/inclusively; `desc`
    /// reverses the version order; `limit` caps the row count after ordering.
    ///
    /// # Errors
    ///
    /// Returns a persistence error when the backing store fails.
    fn select_events(
        &self,
        originator_id: &Uuid,
        gt: Option<u64>,
        lte: Option<u64>,
        desc: bool,
        limit: Option<usize>,
    ) -> Result<Vec<StoredEvent>, RecorderError>;

    /// Read at most `limit` notifications with `id >= start`, ascending.
    ///
    /// # Errors
    ///
    /// Returns a persistence error when the backing store fails.
    fn select_notifications(
        &self,
        start: u64,
        limit: usize,
    ) -> Result<Vec<Notification>, RecorderError>;

    /// The highest notification id assigned so far, or 0 for an empty store.
    ///
    /// # Errors
    ///
    /// Returns a persistence error when the backing store fails.
    fn max_notification_id(&self) -> Result<u64, RecorderError>;
}

/// Contract for the snapshot record store.
///
/// Snapshots are keyed by `(originator_id, originator_version)` and never
/// appear in the notification stream.
pub trait SnapshotRecorder: Send + Sync {
    /// Insert one snapshot record.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::Conflict`] when a snapshot already exists for
    /// the record's key; callers may treat that as benign.
    fn insert_snapshot(&self, snapshot: &StoredEvent) -> Result<(), RecorderError>;

    /// Read an originator's snapshots by version range, with the same
    /// parameter semantics as [`Recorder::select_events`].
    ///
    /// # Errors
    ///
    /// Returns a persistence error when the backing store fails.
    fn select_snapshots(
        &self,
        originator_id: &Uuid,
        gt: Option<u64>,
        lte: Option<u64>,
        desc: bool,
        limit: Option<usize>,
    ) -> Result<Vec<StoredEvent>, RecorderError>;
}

/// Shared version-range filtering used by recorder implementations.
pub(crate) fn version_in_range(version: u64, gt: Option<u64>, lte: Option<u64>) -> bool {
    gt.is_none_or(|gt| version > gt) && lte.is_none_or(|lte| version <= lte)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_error_mentions_reload_hint() {
        let error = RecordConflictError {
            originator_id: Uuid::nil(),
            originator_version: 5,
        };
        let message = error.to_string();
        assert!(message.contains("version 5"));
        assert!(message.contains("reload and retry"));
    }

    #[test]
    fn persistence_error_carries_source() {
        use std::error::Error as _;

        let error = PersistenceError::with_source("query failed", std::io::Error::other("boom"));
        assert!(error.to_string().contains("query failed"));
        assert!(error.source().is_some());

        let bare = PersistenceError::new("no source");
        assert!(bare.source().is_none());
    }

    #[test]
    fn version_range_bounds_are_exclusive_then_inclusive() {
        assert!(version_in_range(3, Some(2), Some(3)));
        assert!(!version_in_range(2, Some(2), None));
        assert!(!version_in_range(4, None, Some(3)));
        assert!(version_in_range(1, None, None));
    }
}
