use crate::tier::{TierError, TierResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use steward_core::{SessionEvent, SessionEventType, SessionRecord, SessionState, StewardError, StewardResult};
use tracing::{debug, info};

/// Whether an upsert created the row or replaced an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No row existed for the id.
    Inserted,
    /// An existing row was replaced.
    Updated,
}

/// Relational system of record for sessions and their event log.
#[async_trait]
pub trait DurableTier: Send + Sync {
    /// Loads the stored record, if any.
    async fn fetch(&self, session_id: &str) -> TierResult<Option<SessionRecord>>;

    /// Inserts or replaces the session. Insert sets `created_at`; every write
    /// sets `updated_at`.
    async fn upsert(&self, session_id: &str, state: &SessionState) -> TierResult<UpsertOutcome>;

    /// Deletes the session. Returns whether a row existed.
    async fn remove(&self, session_id: &str) -> TierResult<bool>;

    /// Appends an event to the event table.
    async fn append_event(&self, event: &SessionEvent) -> TierResult<()>;

    /// Releases the connection. Later calls report [`TierError::Unavailable`].
    async fn close(&self) -> TierResult<()>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sessions (
    session_id   TEXT PRIMARY KEY,
    session_data TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS session_events (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    data       TEXT NOT NULL,
    timestamp  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_session_events_session ON session_events(session_id);
";

/// SQLite-backed durable tier.
///
/// One connection is opened at construction and shared behind a mutex; every
/// statement runs on the blocking pool so the async caller is never stalled.
pub struct SqliteDurableTier {
    conn: Arc<Mutex<Option<Connection>>>,
}

impl SqliteDurableTier {
    /// Opens (and migrates) the database named by `url`: a file path,
    /// optionally prefixed with `sqlite://`, or `:memory:`.
    pub async fn open(url: &str) -> StewardResult<Self> {
        let target = url.strip_prefix("sqlite://").unwrap_or(url).to_string();
        let conn = tokio::task::spawn_blocking(move || -> StewardResult<Connection> {
            let conn = if target == ":memory:" {
                Connection::open_in_memory()
            } else {
                if let Some(parent) = Path::new(&target).parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                Connection::open(&target)
            }
            .map_err(|e| StewardError::Storage(format!("failed to open '{target}': {e}")))?;
            conn.execute_batch(SCHEMA)
                .map_err(|e| StewardError::Storage(format!("failed to create schema: {e}")))?;
            Ok(conn)
        })
        .await
        .map_err(|e| StewardError::Storage(format!("open task failed: {e}")))??;

        info!(url, "Opened durable tier");
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    /// Runs `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> TierResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> TierResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            let conn = guard
                .as_mut()
                .ok_or_else(|| TierError::Unavailable("durable tier is closed".into()))?;
            f(conn)
        })
        .await
        .map_err(TierError::unavailable)?
    }

    /// Events recorded for `session_id`, oldest first.
    pub async fn events_for(&self, session_id: &str) -> TierResult<Vec<SessionEvent>> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT session_id, event_type, data, timestamp FROM session_events
                     WHERE session_id = ?1 ORDER BY id",
                )
                .map_err(TierError::unavailable)?;
            let rows = stmt
                .query_map(params![session_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })
                .map_err(TierError::unavailable)?;

            let mut events = Vec::new();
            for row in rows {
                let (session_id, event_type, data, timestamp) =
                    row.map_err(TierError::unavailable)?;
                events.push(SessionEvent {
                    session_id,
                    event_type: parse_event_type(&event_type)?,
                    data: serde_json::from_str(&data).map_err(TierError::serialization)?,
                    timestamp: parse_timestamp(&timestamp)?,
                });
            }
            Ok(events)
        })
        .await
    }
}

fn parse_timestamp(raw: &str) -> TierResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| TierError::Serialization(format!("bad timestamp '{raw}': {e}")))
}

fn parse_event_type(raw: &str) -> TierResult<SessionEventType> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(TierError::serialization)
}

#[async_trait]
impl DurableTier for SqliteDurableTier {
    async fn fetch(&self, session_id: &str) -> TierResult<Option<SessionRecord>> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT session_data, created_at, updated_at FROM sessions WHERE session_id = ?1",
                    params![session_id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    },
                )
                .optional()
                .map_err(TierError::unavailable)?;

            let Some((data, created_at, updated_at)) = row else {
                return Ok(None);
            };
            let state: SessionState = serde_json::from_str(&data).map_err(TierError::serialization)?;
            Ok(Some(SessionRecord {
                session_id,
                state,
                created_at: parse_timestamp(&created_at)?,
                updated_at: parse_timestamp(&updated_at)?,
            }))
        })
        .await
    }

    async fn upsert(&self, session_id: &str, state: &SessionState) -> TierResult<UpsertOutcome> {
        let session_id = session_id.to_string();
        let data = serde_json::to_string(state).map_err(TierError::serialization)?;
        self.with_conn(move |conn| {
            let now = Utc::now().to_rfc3339();
            let tx = conn.transaction().map_err(TierError::unavailable)?;
            let exists: bool = tx
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM sessions WHERE session_id = ?1)",
                    params![session_id],
                    |row| row.get(0),
                )
                .map_err(TierError::unavailable)?;
            tx.execute(
                "INSERT INTO sessions (session_id, session_data, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT(session_id) DO UPDATE SET
                     session_data = excluded.session_data,
                     updated_at = excluded.updated_at",
                params![session_id, data, now],
            )
            .map_err(TierError::unavailable)?;
            tx.commit().map_err(TierError::unavailable)?;
            Ok(if exists {
                UpsertOutcome::Updated
            } else {
                UpsertOutcome::Inserted
            })
        })
        .await
    }

    async fn remove(&self, session_id: &str) -> TierResult<bool> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            let deleted = conn
                .execute("DELETE FROM sessions WHERE session_id = ?1", params![session_id])
                .map_err(TierError::unavailable)?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn append_event(&self, event: &SessionEvent) -> TierResult<()> {
        let data = serde_json::to_string(&event.data).map_err(TierError::serialization)?;
        let session_id = event.session_id.clone();
        let event_type = event.event_type.as_str();
        let timestamp = event.timestamp.to_rfc3339();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO session_events (session_id, event_type, data, timestamp)
                 VALUES (?1, ?2, ?3, ?4)",
                params![session_id, event_type, data, timestamp],
            )
            .map_err(TierError::unavailable)?;
            Ok(())
        })
        .await
    }

    async fn close(&self) -> TierResult<()> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || -> TierResult<()> {
            let Some(conn) = conn.lock().take() else {
                return Ok(());
            };
            conn.close().map_err(|(_, e)| TierError::unavailable(e))?;
            debug!("Durable tier connection closed");
            Ok(())
        })
        .await
        .map_err(TierError::unavailable)?
    }
}
