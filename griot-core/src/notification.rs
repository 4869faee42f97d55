//! The notification log: the global event stream in bounded sections.
//!
//! Every stored event is also a [`Notification`] with a globally unique,
//! strictly increasing id. The log slices that stream into sections
//! addressed by `"start,stop"` id ranges so that downstream consumers can
//! pull it page by page, following each section's `next_id` link.
//!
//! Ids may have gaps (aborted transactions burn them). A full section links
//! to the window starting right after its last observed id, so following
//! `next_id` steps over gaps without re-delivering anything; a section that
//! comes back short of its limit marks the end of the stream. The recorder
//! contract guarantees a gap never fills in later, so nothing is skipped.

use std::sync::Arc;

use thiserror::Error;

use crate::{
    event::Notification,
    recorder::{Recorder, RecorderError},
    store::StoreError,
};

/// Default cap on the number of notifications in one section.
pub const DEFAULT_SECTION_SIZE: usize = 10;

/// A bounded contiguous window of the notification stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Section {
    /// `"first,last"` of the returned items; `None` for an empty section.
    pub section_id: Option<String>,
    /// Notifications in ascending id order.
    pub items: Vec<Notification>,
    /// Id of the next section to request; `None` once the end of the stream
    /// has been reached.
    pub next_id: Option<String>,
}

/// Error type for notification log queries.
#[derive(Debug, Error)]
pub enum NotificationLogError {
    /// The section id does not match `<u64>","<u64>` with positive, ordered
    /// bounds.
    #[error("malformed section id `{0}`: expected `start,stop` with 1 <= start <= stop")]
    MalformedSectionId(String),
    /// The requested window exceeds the log's section size cap.
    #[error("section `{section_id}` spans more than {max} notifications")]
    OversizedSection { section_id: String, max: usize },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<RecorderError> for NotificationLogError {
    fn from(error: RecorderError) -> Self {
        Self::Store(error.into())
    }
}

/// Read-side view over a [`Recorder`]'s global stream.
///
/// Sections are computed fresh on every query; nothing is cached.
#[derive(Clone)]
pub struct NotificationLog {
    recorder: Arc<dyn Recorder>,
    section_size: usize,
}

impl NotificationLog {
    #[must_use]
    pub fn new(recorder: Arc<dyn Recorder>) -> Self {
        Self {
            recorder,
            section_size: DEFAULT_SECTION_SIZE,
        }
    }

    /// Override the section size cap.
    #[must_use]
    pub fn with_section_size(mut self, section_size: usize) -> Self {
        self.section_size = section_size;
        self
    }

    /// Read the section addressed by `section_id` (`"start,stop"`).
    ///
    /// The returned section holds at most `stop - start + 1` notifications
    /// with `id >= start`, ascending. When the section came back full,
    /// `next_id` addresses the window of the same width starting after the
    /// last returned id; when it did not, the end of the stream has been
    /// reached and `next_id` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`NotificationLogError::MalformedSectionId`] for an id that
    /// does not parse, [`NotificationLogError::OversizedSection`] for a
    /// window wider than the cap, or a store error from the recorder.
    pub fn section(&self, section_id: &str) -> Result<Section, NotificationLogError> {
        let (start, stop) = parse_section_id(section_id)
            .ok_or_else(|| NotificationLogError::MalformedSectionId(section_id.to_string()))?;
        let limit = (stop - start + 1) as usize;
        if limit > self.section_size {
            return Err(NotificationLogError::OversizedSection {
                section_id: section_id.to_string(),
                max: self.section_size,
            });
        }

        let items = self.recorder.select_notifications(start, limit)?;
        tracing::trace!(section_id, items = items.len(), "section read");

        let section_id = match (items.first(), items.last()) {
            (Some(first), Some(last)) => Some(format!("{},{}", first.id, last.id)),
            _ => None,
        };
        let next_id = match (items.len() == limit, items.last()) {
            (true, Some(last)) => Some(format!("{},{}", last.id + 1, last.id + limit as u64)),
            _ => None,
        };

        Ok(Section {
            section_id,
            items,
            next_id,
        })
    }

    /// The highest notification id assigned so far, 0 for an empty store.
    ///
    /// # Errors
    ///
    /// Returns a store error when the recorder read fails.
    pub fn max_notification_id(&self) -> Result<u64, NotificationLogError> {
        Ok(self.recorder.max_notification_id()?)
    }
}

/// Parse `"start,stop"`, requiring `1 <= start <= stop`.
fn parse_section_id(section_id: &str) -> Option<(u64, u64)> {
    let (start, stop) = section_id.split_once(',')?;
    let start: u64 = start.parse().ok()?;
    let stop: u64 = stop.parse().ok()?;
    (start >= 1 && start <= stop).then_some((start, stop))
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::{event::StoredEvent, recorder::memory::MemoryRecorder};

    fn recorder_with(count: u64) -> Arc<MemoryRecorder> {
        let recorder = Arc::new(MemoryRecorder::new());
        if count > 0 {
            let id = Uuid::new_v4();
            let events: Vec<StoredEvent> = (1..=count)
                .map(|version| StoredEvent {
                    originator_id: id,
                    originator_version: version,
                    topic: "test.happened".to_string(),
                    state: b"{}".to_vec(),
                })
                .collect();
            recorder.insert_events(&events).unwrap();
        }
        recorder
    }

    #[test]
    fn empty_store_yields_empty_unlinked_section() {
        let log = NotificationLog::new(recorder_with(0));
        let section = log.section("1,10").unwrap();
        assert_eq!(section.section_id, None);
        assert!(section.items.is_empty());
        assert_eq!(section.next_id, None);
    }

    #[test]
    fn partial_section_ends_the_stream() {
        let log = NotificationLog::new(recorder_with(4));
        let section = log.section("1,10").unwrap();
        assert_eq!(section.section_id.as_deref(), Some("1,4"));
        assert_eq!(section.items.len(), 4);
        assert_eq!(section.next_id, None);
    }

    #[test]
    fn full_sections_link_to_the_requested_next_window() {
        let log = NotificationLog::new(recorder_with(4));

        let first = log.section("1,2").unwrap();
        assert_eq!(first.section_id.as_deref(), Some("1,2"));
        assert_eq!(first.next_id.as_deref(), Some("3,4"));

        let second = log.section("3,4").unwrap();
        assert_eq!(second.section_id.as_deref(), Some("3,4"));
        assert_eq!(second.next_id.as_deref(), Some("5,6"));

        let third = log.section("5,6").unwrap();
        assert_eq!(third.section_id, None);
        assert!(third.items.is_empty());
        assert_eq!(third.next_id, None);
    }

    #[test]
    fn section_walk_visits_every_notification_across_gaps() {
        let recorder = recorder_with(3);
        // Burn ids 4 and 5 with an aborted batch, then commit more.
        let stale = StoredEvent {
            originator_id: recorder.select_notifications(1, 1).unwrap()[0].originator_id,
            originator_version: 1,
            topic: "test.happened".to_string(),
            state: b"{}".to_vec(),
        };
        recorder
            .insert_events(&[stale.clone(), stale])
            .expect_err("conflict");
        let fresh = Uuid::new_v4();
        let events: Vec<StoredEvent> = (1..=3)
            .map(|version| StoredEvent {
                originator_id: fresh,
                originator_version: version,
                topic: "test.happened".to_string(),
                state: b"{}".to_vec(),
            })
            .collect();
        recorder.insert_events(&events).unwrap();

        let expected: Vec<u64> = recorder
            .select_notifications(1, 100)
            .unwrap()
            .iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(expected, vec![1, 2, 3, 6, 7, 8]);

        let log = NotificationLog::new(recorder).with_section_size(2);
        let mut walked = Vec::new();
        let mut section_id = "1,2".to_string();
        loop {
            let section = log.section(&section_id).unwrap();
            walked.extend(section.items.iter().map(|n| n.id));
            match section.next_id {
                Some(next) => section_id = next,
                None => break,
            }
        }
        assert_eq!(walked, expected);
    }

    #[test]
    fn malformed_section_ids_are_rejected() {
        let log = NotificationLog::new(recorder_with(1));
        for bad in ["", "1", "1,", ",2", "a,b", "0,5", "5,4", "-1,3", "1,2,3"] {
            let error = log.section(bad).unwrap_err();
            assert!(
                matches!(error, NotificationLogError::MalformedSectionId(_)),
                "expected malformed id for {bad:?}"
            );
        }
    }

    #[test]
    fn oversized_window_is_rejected() {
        let log = NotificationLog::new(recorder_with(1));
        let error = log.section("1,11").unwrap_err();
        assert!(matches!(
            error,
            NotificationLogError::OversizedSection { max: 10, .. }
        ));
    }

    #[test]
    fn max_notification_id_tracks_the_stream() {
        let log = NotificationLog::new(recorder_with(4));
        assert_eq!(log.max_notification_id().unwrap(), 4);
    }
}
