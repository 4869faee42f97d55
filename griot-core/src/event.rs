//! Record types flowing through the persistence pipeline.
//!
//! Three shapes of the same fact:
//!
//! - [`DomainEvent`] - the decoded form the domain layer works with
//! - [`StoredEvent`] - the serialized form recorders persist
//! - [`Notification`] - a stored event enriched with its global stream id
//!
//! Snapshots reuse [`StoredEvent`]: a snapshot is structurally an event
//! record, it just lives in a separate store and never receives a
//! notification id.

use std::collections::BTreeMap;

use chrono::{DateTime, Timelike as _, Utc};
use uuid::Uuid;

use crate::transcoder::Value;

/// An immutable fact about a past change to an aggregate.
///
/// The `topic` is a stable string naming the event class; it routes the
/// record back to the right reducer at replay time. The `state` payload is an
/// arbitrary value map encoded by the transcoder on write.
#[derive(Clone, Debug, PartialEq)]
pub struct DomainEvent {
    /// The aggregate that produced this event.
    pub originator_id: Uuid,
    /// Position of this event in its originator's stream, starting at 1.
    pub originator_version: u64,
    /// Wall-clock time the event was created.
    pub timestamp: DateTime<Utc>,
    /// Stable identifier of the event class.
    pub topic: String,
    /// Event payload.
    pub state: BTreeMap<String, Value>,
}

impl DomainEvent {
    /// Create an event stamped with the current wall-clock time.
    ///
    /// The timestamp is truncated to microseconds, the precision the wire
    /// form carries, so an event compares equal to its own round trip.
    #[must_use]
    pub fn new(
        originator_id: Uuid,
        originator_version: u64,
        topic: impl Into<String>,
        state: BTreeMap<String, Value>,
    ) -> Self {
        let now = Utc::now();
        let timestamp = now
            .with_nanosecond(now.nanosecond() / 1_000 * 1_000)
            .unwrap_or(now);
        Self {
            originator_id,
            originator_version,
            timestamp,
            topic: topic.into(),
            state,
        }
    }
}

/// A serialized event record, ready for (or read from) a recorder.
///
/// `state` has been through the full mapper pipeline: transcoded, optionally
/// compressed, optionally encrypted. Once committed a record is immutable;
/// no part of the core contract updates or deletes it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredEvent {
    pub originator_id: Uuid,
    pub originator_version: u64,
    pub topic: String,
    pub state: Vec<u8>,
}

/// A stored event enriched with its globally unique, strictly increasing
/// notification id.
///
/// Ids are assigned at insert and reflect commit order. They are monotonic
/// but not necessarily contiguous: an aborted transaction may leave a gap,
/// and readers must be able to make progress across one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub id: u64,
    pub originator_id: Uuid,
    pub originator_version: u64,
    pub topic: String,
    pub state: Vec<u8>,
}

impl From<Notification> for StoredEvent {
    fn from(notification: Notification) -> Self {
        Self {
            originator_id: notification.originator_id,
            originator_version: notification.originator_version,
            topic: notification.topic,
            state: notification.state,
        }
    }
}
