//! The SQLite event recorder.

use std::{path::Path, sync::Mutex};

use griot_core::{
    event::{Notification, StoredEvent},
    recorder::{Recorder, RecorderError},
};
use rusqlite::{Connection, TransactionBehavior, types::Type};
use uuid::Uuid;

use crate::error::{map_insert_error, persistence};

/// SQLite-backed [`Recorder`].
///
/// The connection is confined behind a mutex; SQLite serializes writers
/// anyway, so one connection per recorder keeps the concurrency story in the
/// database where it belongs.
pub struct SqliteRecorder {
    conn: Mutex<Connection>,
}

impl SqliteRecorder {
    /// Open (or create) the database file at `path`.
    ///
    /// # Errors
    ///
    /// Returns a persistence error when the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RecorderError> {
        let conn = Connection::open(path).map_err(persistence("failed to open database"))?;
        Self::with_connection(conn)
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns a persistence error when the database cannot be opened.
    pub fn in_memory() -> Result<Self, RecorderError> {
        let conn =
            Connection::open_in_memory().map_err(persistence("failed to open database"))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, RecorderError> {
        configure(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Apply the initial schema (idempotent), for use behind a
    /// `CREATE_TABLE`-style startup flag.
    ///
    /// # Errors
    ///
    /// Returns a persistence error when the DDL fails.
    #[tracing::instrument(skip(self))]
    pub fn create_table(&self) -> Result<(), RecorderError> {
        let conn = self.conn.lock().expect("sqlite recorder lock poisoned");
        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS stored_events (
                notification_id    INTEGER PRIMARY KEY AUTOINCREMENT,
                originator_id      TEXT NOT NULL,
                originator_version INTEGER NOT NULL,
                topic              TEXT NOT NULL,
                state              BLOB NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS stored_events_by_originator
                ON stored_events (originator_id, originator_version);
            ",
        )
        .map_err(persistence("failed to create tables"))
    }
}

pub(crate) fn configure(conn: &Connection) -> Result<(), RecorderError> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA busy_timeout = 5000;",
    )
    .map_err(persistence("failed to configure connection"))
}

impl Recorder for SqliteRecorder {
    #[tracing::instrument(skip(self, events), fields(event_count = events.len()))]
    fn insert_events(&self, events: &[StoredEvent]) -> Result<Vec<u64>, RecorderError> {
        let mut conn = self.conn.lock().expect("sqlite recorder lock poisoned");
        // Immediate transactions take the write lock up front, serializing
        // concurrent inserts racing for the next notification id.
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(persistence("failed to begin transaction"))?;

        let mut ids = Vec::with_capacity(events.len());
        {
            let mut stmt = tx
                .prepare_cached(
                    r"
                    INSERT INTO stored_events
                        (originator_id, originator_version, topic, state)
                    VALUES (?1, ?2, ?3, ?4)
                    ",
                )
                .map_err(persistence("failed to prepare insert"))?;
            for event in events {
                stmt.execute(rusqlite::params![
                    event.originator_id.to_string(),
                    event.originator_version as i64,
                    event.topic,
                    event.state,
                ])
                .map_err(|error| map_insert_error(error, event))?;
                ids.push(tx.last_insert_rowid() as u64);
            }
        }

        tx.commit().map_err(persistence("failed to commit"))?;
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
        let mut sql = String::from(
            "SELECT originator_id, originator_version, topic, state \
             FROM stored_events WHERE originator_id = :originator_id",
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

        let conn = self.conn.lock().expect("sqlite recorder lock poisoned");
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
            .map_err(persistence("failed to select events"))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(persistence("failed to read event row"))
    }

    fn select_notifications(
        &self,
        start: u64,
        limit: usize,
    ) -> Result<Vec<Notification>, RecorderError> {
        let conn = self.conn.lock().expect("sqlite recorder lock poisoned");
        let mut stmt = conn
            .prepare_cached(
                r"
                SELECT notification_id, originator_id, originator_version, topic, state
                FROM stored_events
                WHERE notification_id >= ?1
                ORDER BY notification_id ASC
                LIMIT ?2
                ",
            )
            .map_err(persistence("failed to prepare select"))?;
        let rows = stmt
            .query_map(
                rusqlite::params![start as i64, limit as i64],
                |row| {
                    Ok(Notification {
                        id: row.get::<_, i64>(0)? as u64,
                        originator_id: parse_uuid(row.get::<_, String>(1)?)?,
                        originator_version: row.get::<_, i64>(2)? as u64,
                        topic: row.get(3)?,
                        state: row.get(4)?,
                    })
                },
            )
            .map_err(persistence("failed to select notifications"))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(persistence("failed to read notification row"))
    }

    fn max_notification_id(&self) -> Result<u64, RecorderError> {
        let conn = self.conn.lock().expect("sqlite recorder lock poisoned");
        conn.query_row(
            "SELECT COALESCE(MAX(notification_id), 0) FROM stored_events",
            [],
            |row| row.get::<_, i64>(0).map(|id| id as u64),
        )
        .map_err(persistence("failed to read max notification id"))
    }
}

pub(crate) fn row_to_stored_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredEvent> {
    Ok(StoredEvent {
        originator_id: parse_uuid(row.get::<_, String>(0)?)?,
        originator_version: row.get::<_, i64>(1)? as u64,
        topic: row.get(2)?,
        state: row.get(3)?,
    })
}

pub(crate) fn parse_uuid(text: String) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(&text).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(error))
    })
}
