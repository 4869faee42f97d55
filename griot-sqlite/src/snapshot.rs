//! The SQLite snapshot recorder.

use std::{path::Path, sync::Mutex};

use griot_core::{
    event::StoredEvent,
    recorder::{RecorderError, SnapshotRecorder},
};
use rusqlite::Connection;
use uuid::Uuid;

use crate::{
    error::{map_insert_error, persistence},
    recorder::{configure, row_to_stored_event},
};

/// SQLite-backed [`SnapshotRecorder`].
///
/// Snapshots are keyed by `(originator_id, originator_version)` and carry no
/// notification id; the table has no sequence column at all.
pub struct SqliteSnapshotRecorder {
    conn: Mutex<Connection>,
}

impl SqliteSnapshotRecorder {
    /// Open (or create) the database file at `path`. The file may be shared
    /// with a [`SqliteRecorder`](crate::SqliteRecorder).
    ///
    /// # Errors
    ///
    /// Returns a persistence error when the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RecorderError> {
        let conn = Connection::open(path).map_err(persistence("failed to open database"))?;
        configure(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns a persistence error when the database cannot be opened.
    pub fn in_memory() -> Result<Self, RecorderError> {
        let conn =
            Connection::open_in_memory().map_err(persistence("failed to open database"))?;
        configure(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Apply the initial schema (idempotent).
    ///
    /// # Errors
    ///
    /// Returns a persistence error when the DDL fails.
    pub fn create_table(&self) -> Result<(), RecorderError> {
        let conn = self.conn.lock().expect("sqlite snapshot lock poisoned");
        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS snapshots (
                originator_id      TEXT NOT NULL,
                originator_version INTEGER NOT NULL,
                topic              TEXT NOT NULL,
                state              BLOB NOT NULL,
                PRIMARY KEY (originator_id, originator_version)
            );
            ",
        )
        .map_err(persistence("failed to create tables"))
    }
}

impl SnapshotRecorder for SqliteSnapshotRecorder {
    fn insert_snapshot(&self, snapshot: &StoredEvent) -> Result<(), RecorderError> {
        let conn = self.conn.lock().expect("sqlite snapshot lock poisoned");
        conn.execute(
            r"
            INSERT INTO snapshots (originator_id, originator_version, topic, state)
            VALUES (?1, ?2, ?3, ?4)
            ",
            rusqlite::params![
                snapshot.originator_id.to_string(),
                snapshot.originator_version as i64,
                snapshot.topic,
                snapshot.state,
            ],
        )
        .map(|_| ())
        .map_err(|error| map_insert_error(error, snapshot))
    }

    fn select_snapshots(
        &self,
        originator_id: &Uuid,
        gt: Option<u64>,
        lte: Option<u64>,
        desc: bool,
        limit: Option<usize>,
    ) -> Result<Vec<StoredEvent>, RecorderError> {
        let mut sql = String::from(
            "SELECT originator_id, originator_version, topic, state \
             FROM snapshots WHERE originator_id = :originator_id",
        );
        if gt.is_some() {
            sql.push_str(" AND originator_version > :gt");
        }
        if lte.is_some() {
            sql.push_str(" AND originator_version <= :lte");
        }
        sql.push_str(if desc {
            " ORDER BY originator_version DESC"
        } else {
            " ORDER BY originator_version ASC"
        });
        if limit.is_some() {
            sql.push_str(" LIMIT :limit");
        }

        let conn = self.conn.lock().expect("sqlite snapshot lock poisoned");
        let mut stmt = conn
            .prepare_cached(&sql)
            .map_err(persistence("failed to prepare select"))?;

        let originator_id = originator_id.to_string();
        let gt = gt.map(|v| v as i64);
        let lte = lte.map(|v| v as i64);
        let limit = limit.map(|v| v as i64);
        let mut params: Vec<(&str, &dyn rusqlite::ToSql)> =
            vec![(":originator_id", &originator_id)];
        if let Some(gt) = &gt {
            params.push((":gt", gt));
        }
        if let Some(lte) = &lte {
            params.push((":lte", lte));
        }
        if let Some(limit) = &limit {
            params.push((":limit", limit));
        }

        let rows = stmt
            .query_map(params.as_slice(), row_to_stored_event)
            .map_err(persistence("failed to select snapshots"))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(persistence("failed to read snapshot row"))
    }
}
