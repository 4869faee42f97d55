//! SQLite-backed recorders for the Griot event-sourcing engine.
//!
//! Implements the [`Recorder`](griot_core::recorder::Recorder) and
//! [`SnapshotRecorder`](griot_core::recorder::SnapshotRecorder) contracts on
//! top of `rusqlite`:
//!
//! - Notification ids come from an `INTEGER PRIMARY KEY AUTOINCREMENT`
//!   column, so they are strictly increasing in commit order and are never
//!   reused after a delete.
//! - Each `insert_events` call runs in one immediate transaction, which
//!   serializes concurrent writers and keeps a reader from ever observing a
//!   later id while an earlier one is still uncommitted.
//! - Unique-constraint violations on `(originator_id, originator_version)`
//!   are mapped to `RecordConflictError`; everything else becomes a
//!   `PersistenceError`.
//!
//! Connections run in WAL mode with a busy timeout, so an event recorder and
//! a snapshot recorder can share one database file.

mod error;
mod recorder;
mod snapshot;

pub use recorder::SqliteRecorder;
pub use snapshot::SqliteSnapshotRecorder;
