//! In-memory recorder implementations for testing and examples.
//!
//! Thread-safe via `RwLock`; suitable for unit tests, examples, and
//! single-process applications that do not need durability.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, RwLock},
};

use uuid::Uuid;

use crate::{
    event::{Notification, StoredEvent},
    recorder::{
        RecordConflictError, Recorder, RecorderError, SnapshotRecorder, version_in_range,
    },
};

/// In-memory event recorder.
///
/// Notification ids start at 1 and are reserved before the batch is
/// validated, so a conflicting batch burns its ids and leaves a gap, the
/// same observable behaviour as an aborted transaction against a database
/// sequence. Readers must already tolerate gaps; this keeps the reference
/// implementation honest about them.
#[derive(Clone, Default)]
pub struct MemoryRecorder {
    inner: Arc<RwLock<Inner>>,
}

struct Inner {
    /// Per-originator streams, ordered by insertion (and so by version).
    streams: HashMap<Uuid, Vec<StoredEvent>>,
    /// Global stream, ascending by id.
    notifications: Vec<Notification>,
    next_notification_id: u64,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            streams: HashMap::new(),
            notifications: Vec::new(),
            next_notification_id: 1,
        }
    }
}

impl MemoryRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Recorder for MemoryRecorder {
    #[tracing::instrument(skip(self, events), fields(event_count = events.len()))]
    fn insert_events(&self, events: &[StoredEvent]) -> Result<Vec<u64>, RecorderError> {
        let mut inner = self.inner.write().expect("in-memory recorder lock poisoned");

        // Reserve ids first; a rejected batch burns them, like a database
        // sequence under an aborted transaction.
        let first_id = inner.next_notification_id;
        inner.next_notification_id += events.len() as u64;

        for (offset, event) in events.iter().enumerate() {
            let duplicate_in_store = inner
                .streams
                .get(&event.originator_id)
                .is_some_and(|stream| {
                    stream
                        .iter()
                        .any(|existing| existing.originator_version == event.originator_version)
                });
            let duplicate_in_batch = events[..offset].iter().any(|earlier| {
                earlier.originator_id == event.originator_id
                    && earlier.originator_version == event.originator_version
            });
            if duplicate_in_store || duplicate_in_batch {
                tracing::debug!(
                    originator_id = %event.originator_id,
                    originator_version = event.originator_version,
                    "version collision, rejecting batch"
                );
                return Err(RecordConflictError {
                    originator_id: event.originator_id,
                    originator_version: event.originator_version,
                }
                .into());
            }
        }

        let mut ids = Vec::with_capacity(events.len());
        for (offset, event) in events.iter().enumerate() {
            let id = first_id + offset as u64;
            ids.push(id);
            inner.notifications.push(Notification {
                id,
                originator_id: event.originator_id,
                originator_version: event.originator_version,
                topic: event.topic.clone(),
                state: event.state.clone(),
            });
            inner
                .streams
                .entry(event.originator_id)
                .or_default()
                .push(event.clone());
        }
        drop(inner);

        tracing::debug!(events_inserted = events.len(), "batch committed");
        Ok(ids)
    }

    fn select_events(
        &self,
        originator_id: &Uuid,
        gt: Option<u64>,
        lte: Option<u64>,
        desc: bool,
        limit: Option<usize>,
    ) -> Result<Vec<StoredEvent>, RecorderError> {
        let inner = self.inner.read().expect("in-memory recorder lock poisoned");
        let mut events: Vec<StoredEvent> = inner
            .streams
            .get(originator_id)
            .map(|stream| {
                stream
                    .iter()
                    .filter(|event| version_in_range(event.originator_version, gt, lte))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        drop(inner);

        events.sort_by_key(|event| event.originator_version);
        if desc {
            events.reverse();
        }
        if let Some(limit) = limit {
            events.truncate(limit);
        }
        Ok(events)
    }

    fn select_notifications(
        &self,
        start: u64,
        limit: usize,
    ) -> Result<Vec<Notification>, RecorderError> {
        let inner = self.inner.read().expect("in-memory recorder lock poisoned");
        let from = inner
            .notifications
            .partition_point(|notification| notification.id < start);
        Ok(inner.notifications[from..]
            .iter()
            .take(limit)
            .cloned()
            .collect())
    }

    fn max_notification_id(&self) -> Result<u64, RecorderError> {
        let inner = self.inner.read().expect("in-memory recorder lock poisoned");
        Ok(inner
            .notifications
            .last()
            .map_or(0, |notification| notification.id))
    }
}

/// In-memory snapshot recorder.
#[derive(Clone, Default)]
pub struct MemorySnapshotRecorder {
    inner: Arc<RwLock<HashMap<Uuid, BTreeMap<u64, StoredEvent>>>>,
}

impl MemorySnapshotRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotRecorder for MemorySnapshotRecorder {
    fn insert_snapshot(&self, snapshot: &StoredEvent) -> Result<(), RecorderError> {
        let mut inner = self.inner.write().expect("snapshot recorder lock poisoned");
        let snapshots = inner.entry(snapshot.originator_id).or_default();
        if snapshots.contains_key(&snapshot.originator_version) {
            return Err(RecordConflictError {
                originator_id: snapshot.originator_id,
                originator_version: snapshot.originator_version,
            }
            .into());
        }
        snapshots.insert(snapshot.originator_version, snapshot.clone());
        Ok(())
    }

    fn select_snapshots(
        &self,
        originator_id: &Uuid,
        gt: Option<u64>,
        lte: Option<u64>,
        desc: bool,
        limit: Option<usize>,
    ) -> Result<Vec<StoredEvent>, RecorderError> {
        let inner = self.inner.read().expect("snapshot recorder lock poisoned");
        let mut snapshots: Vec<StoredEvent> = inner
            .get(originator_id)
            .map(|by_version| {
                by_version
                    .values()
                    .filter(|snapshot| version_in_range(snapshot.originator_version, gt, lte))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        drop(inner);

        if desc {
            snapshots.reverse();
        }
        if let Some(limit) = limit {
            snapshots.truncate(limit);
        }
        Ok(snapshots)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn record(originator_id: Uuid, version: u64) -> StoredEvent {
        StoredEvent {
            originator_id,
            originator_version: version,
            topic: "test.happened".to_string(),
            state: format!("{{\"v\":{version}}}").into_bytes(),
        }
    }

    #[test]
    fn insert_assigns_contiguous_ids_from_one() {
        let recorder = MemoryRecorder::new();
        let id = Uuid::new_v4();
        let ids = recorder
            .insert_events(&[record(id, 1), record(id, 2), record(id, 3)])
            .unwrap();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(recorder.max_notification_id().unwrap(), 3);
    }

    #[test]
    fn version_collision_rejects_whole_batch() {
        let recorder = MemoryRecorder::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        recorder.insert_events(&[record(a, 1)]).unwrap();

        // Second record conflicts; the first must not survive either.
        let result = recorder.insert_events(&[record(b, 1), record(a, 1)]);
        assert!(matches!(result, Err(RecorderError::Conflict(_))));
        assert!(recorder
            .select_events(&b, None, None, false, None)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn duplicate_versions_within_a_batch_conflict() {
        let recorder = MemoryRecorder::new();
        let id = Uuid::new_v4();
        let result = recorder.insert_events(&[record(id, 1), record(id, 1)]);
        assert!(matches!(result, Err(RecorderError::Conflict(_))));
    }

    #[test]
    fn rejected_batch_burns_notification_ids() {
        let recorder = MemoryRecorder::new();
        let id = Uuid::new_v4();
        recorder.insert_events(&[record(id, 1)]).unwrap();
        recorder
            .insert_events(&[record(id, 1)])
            .expect_err("conflict");
        let other = Uuid::new_v4();
        let ids = recorder.insert_events(&[record(other, 1)]).unwrap();
        // Id 2 was burned by the aborted batch.
        assert_eq!(ids, vec![3]);
        let observed: Vec<u64> = recorder
            .select_notifications(1, 10)
            .unwrap()
            .iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(observed, vec![1, 3]);
    }

    #[test]
    fn select_events_honours_range_order_and_limit() {
        let recorder = MemoryRecorder::new();
        let id = Uuid::new_v4();
        recorder
            .insert_events(&[record(id, 1), record(id, 2), record(id, 3), record(id, 4)])
            .unwrap();

        let versions = |events: Vec<StoredEvent>| -> Vec<u64> {
            events.iter().map(|e| e.originator_version).collect()
        };

        assert_eq!(
            versions(recorder.select_events(&id, Some(1), Some(3), false, None).unwrap()),
            vec![2, 3]
        );
        assert_eq!(
            versions(recorder.select_events(&id, None, None, true, Some(2)).unwrap()),
            vec![4, 3]
        );
        assert_eq!(
            versions(recorder.select_events(&Uuid::new_v4(), None, None, false, None).unwrap()),
            Vec::<u64>::new()
        );
    }

    #[test]
    fn select_notifications_is_ascending_from_start() {
        let recorder = MemoryRecorder::new();
        let id = Uuid::new_v4();
        recorder
            .insert_events(&[record(id, 1), record(id, 2), record(id, 3)])
            .unwrap();
        let notifications = recorder.select_notifications(2, 10).unwrap();
        let ids: Vec<u64> = notifications.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn empty_store_reports_zero_max_id() {
        let recorder = MemoryRecorder::new();
        assert_eq!(recorder.max_notification_id().unwrap(), 0);
        assert!(recorder.select_notifications(1, 10).unwrap().is_empty());
    }

    #[test]
    fn snapshot_recorder_rejects_duplicate_keys() {
        let recorder = MemorySnapshotRecorder::new();
        let id = Uuid::new_v4();
        recorder.insert_snapshot(&record(id, 2)).unwrap();
        let result = recorder.insert_snapshot(&record(id, 2));
        assert!(matches!(result, Err(RecorderError::Conflict(_))));
    }

    #[test]
    fn snapshot_selection_finds_highest_at_or_below_bound() {
        let recorder = MemorySnapshotRecorder::new();
        let id = Uuid::new_v4();
        recorder.insert_snapshot(&record(id, 2)).unwrap();
        recorder.insert_snapshot(&record(id, 5)).unwrap();
        recorder.insert_snapshot(&record(id, 8)).unwrap();

        let latest = recorder
            .select_snapshots(&id, None, Some(6), true, Some(1))
            .unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].originator_version, 5);

        let unbounded = recorder
            .select_snapshots(&id, None, None, true, Some(1))
            .unwrap();
        assert_eq!(unbounded[0].originator_version, 8);
    }

    proptest! {
        /// Notification ids are strictly increasing and each successful
        /// batch's ids are contiguous, across any interleaving of batch
        /// sizes and originators.
        #[test]
        fn notification_ids_strictly_increase(batch_sizes in prop::collection::vec(1usize..5, 1..8)) {
            let recorder = MemoryRecorder::new();
            let mut all_ids = Vec::new();
            for (batch, size) in batch_sizes.iter().enumerate() {
                let id = Uuid::new_v4();
                let events: Vec<StoredEvent> =
                    (1..=*size as u64).map(|version| record(id, version)).collect();
                let ids = recorder.insert_events(&events).unwrap();
                prop_assert_eq!(ids.len(), *size);
                for pair in ids.windows(2) {
                    prop_assert_eq!(pair[1], pair[0] + 1, "batch {} not contiguous", batch);
                }
                all_ids.extend(ids);
            }
            for pair in all_ids.windows(2) {
                prop_assert!(pair[1] > pair[0]);
            }
        }

        /// Per-originator versions accepted by the recorder stay unique, and
        /// a replayed version is always rejected.
        #[test]
        fn version_uniqueness_is_enforced(versions in prop::collection::vec(1u64..6, 1..12)) {
            let recorder = MemoryRecorder::new();
            let id = Uuid::new_v4();
            let mut seen = std::collections::HashSet::new();
            for version in versions {
                let result = recorder.insert_events(&[record(id, version)]);
                if seen.insert(version) {
                    prop_assert!(result.is_ok());
                } else {
                    prop_assert!(matches!(result, Err(RecorderError::Conflict(_))));
                }
            }
        }
    }
}
