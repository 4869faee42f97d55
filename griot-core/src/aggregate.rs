//! The seam between the persistence engine and the domain model.
//!
//! The engine never knows concrete aggregate types; it sees them through
//! [`Aggregate`]. An aggregate's state is the fold of its event history:
//! command methods record new events into a pending buffer and apply them to
//! the in-memory state through the same reducer the repository uses for
//! replay, so a freshly saved aggregate and a freshly loaded one agree.
//!
//! A minimal implementation:
//!
//! ```
//! use std::collections::BTreeMap;
//!
//! use griot_core::{aggregate::Aggregate, codec::IntegrityError, event::DomainEvent,
//!     transcoder::Value};
//! use uuid::Uuid;
//!
//! #[derive(Clone)]
//! struct Counter {
//!     id: Uuid,
//!     version: u64,
//!     total: i64,
//!     pending: Vec<DomainEvent>,
//! }
//!
//! impl Counter {
//!     const CREATED: &'static str = "counter.created";
//!     const INCREMENTED: &'static str = "counter.incremented";
//!
//!     fn create() -> Self {
//!         let event = DomainEvent::new(Uuid::new_v4(), 1, Self::CREATED, BTreeMap::new());
//!         let mut counter = Self::recover(None, &event);
//!         counter.pending.push(event);
//!         counter
//!     }
//!
//!     fn increment(&mut self, by: i64) {
//!         let mut state = BTreeMap::new();
//!         state.insert("by".to_string(), Value::Int(by));
//!         let event =
//!             DomainEvent::new(self.id, self.version + 1, Self::INCREMENTED, state);
//!         *self = Self::recover(Some(self.clone()), &event);
//!         self.pending.push(event);
//!     }
//! }
//!
//! impl Aggregate for Counter {
//!     const TOPIC: &'static str = "counter";
//!
//!     fn id(&self) -> Uuid {
//!         self.id
//!     }
//!
//!     fn version(&self) -> u64 {
//!         self.version
//!     }
//!
//!     fn recover(state: Option<Self>, event: &DomainEvent) -> Self {
//!         let mut counter = state.unwrap_or(Self {
//!             id: event.originator_id,
//!             version: 0,
//!             total: 0,
//!             pending: Vec::new(),
//!         });
//!         if event.topic == Self::INCREMENTED {
//!             if let Some(Value::Int(by)) = event.state.get("by") {
//!                 counter.total += by;
//!             }
//!         }
//!         counter.version = event.originator_version;
//!         counter
//!     }
//!
//!     fn collect_pending_events(&mut self) -> Vec<DomainEvent> {
//!         std::mem::take(&mut self.pending)
//!     }
//!
//!     fn snapshot_state(&self) -> BTreeMap<String, Value> {
//!         let mut state = BTreeMap::new();
//!         state.insert("total".to_string(), Value::Int(self.total));
//!         state
//!     }
//!
//!     fn from_snapshot(snapshot: &DomainEvent) -> Result<Self, IntegrityError> {
//!         let Some(Value::Int(total)) = snapshot.state.get("total") else {
//!             return Err(IntegrityError::new("snapshot is missing `total`"));
//!         };
//!         Ok(Self {
//!             id: snapshot.originator_id,
//!             version: snapshot.originator_version,
//!             total: *total,
//!             pending: Vec::new(),
//!         })
//!     }
//! }
//! ```

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::{codec::IntegrityError, event::DomainEvent, transcoder::Value};

/// A consistency boundary in the domain model.
///
/// Instances are *not* thread-safe: confine an aggregate to a single logical
/// actor between load and save. The trait itself carries no persistence
/// concerns; everything the engine needs flows through plain
/// [`DomainEvent`] values.
pub trait Aggregate: Sized {
    /// Stable topic naming this aggregate type, used for its snapshot
    /// records. Must be registered with the topic registry.
    const TOPIC: &'static str;

    /// The aggregate's identity (`originator_id` of all its events).
    fn id(&self) -> Uuid;

    /// Version of the last event applied, 0 before any.
    fn version(&self) -> u64;

    /// Pure reducer folding one recorded event into the state.
    ///
    /// `state` is `None` only for the first event of a stream, which must
    /// construct the aggregate. The repository calls this in version order
    /// during replay; command methods should route their own events through
    /// it so replayed and live state never diverge.
    fn recover(state: Option<Self>, event: &DomainEvent) -> Self;

    /// Drain the events recorded since construction or the last save.
    fn collect_pending_events(&mut self) -> Vec<DomainEvent>;

    /// Capture the state for a snapshot record.
    fn snapshot_state(&self) -> BTreeMap<String, Value>;

    /// Rebuild from a snapshot record previously produced by
    /// [`snapshot_state`](Self::snapshot_state).
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError`] when the snapshot state does not match
    /// what this aggregate type captures.
    fn from_snapshot(snapshot: &DomainEvent) -> Result<Self, IntegrityError>;
}
