//! Mapping from `rusqlite` failures to recorder error kinds.

use griot_core::{
    event::StoredEvent,
    recorder::{PersistenceError, RecordConflictError, RecorderError},
};

/// True when the error is a uniqueness violation, which signals a lost
/// optimistic-concurrency race rather than a storage fault.
fn is_unique_violation(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

/// Map an insert failure for `record`, distinguishing the retriable version
/// conflict from generic persistence failures.
pub(crate) fn map_insert_error(error: rusqlite::Error, record: &StoredEvent) -> RecorderError {
    if is_unique_violation(&error) {
        RecordConflictError {
            originator_id: record.originator_id,
            originator_version: record.originator_version,
        }
        .into()
    } else {
        PersistenceError::with_source("failed to insert record", error).into()
    }
}

/// Adapter for the non-insert paths, where every failure is a persistence
/// error.
pub(crate) fn persistence(context: &'static str) -> impl FnOnce(rusqlite::Error) -> RecorderError {
    move |error| PersistenceError::with_source(context, error).into()
}
