//! In-process tier and sink doubles with switchable failure modes.
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use steward_core::{SessionEvent, SessionRecord, SessionState};
use steward_store::cache::{decode_envelope, encode_envelope};
use steward_store::{
    CacheTier, DurableTier, EmitError, EventEmitter, TierError, TierResult, UpsertOutcome,
};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Names of tiers in the order their `close()` ran.
pub type CloseLog = Arc<Mutex<Vec<&'static str>>>;

pub fn state(step: &str) -> SessionState {
    SessionState::new(serde_json::json!({ "step": step }))
}

// ---------------------------------------------------------------------------
// Cache double
// ---------------------------------------------------------------------------

/// Behaves like Redis: stores encoded envelopes with an expiry.
#[derive(Default)]
pub struct FakeCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
    failing: AtomicBool,
    /// When set, every call hangs far past any tier timeout.
    hanging: AtomicBool,
    close_failing: AtomicBool,
    close_log: Mutex<Option<CloseLog>>,
    pub calls: AtomicUsize,
    pub closed: AtomicUsize,
}

impl FakeCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_hanging(&self, hanging: bool) {
        self.hanging.store(hanging, Ordering::SeqCst);
    }

    pub fn set_close_failing(&self, failing: bool) {
        self.close_failing.store(failing, Ordering::SeqCst);
    }

    pub fn log_closes_to(&self, log: &CloseLog) {
        *self.close_log.lock() = Some(log.clone());
    }

    pub fn insert_raw(&self, session_id: &str, raw: &str) {
        self.entries.lock().insert(
            session_id.to_string(),
            (raw.to_string(), Instant::now() + Duration::from_secs(3600)),
        );
    }

    pub fn contains(&self, session_id: &str) -> bool {
        let now = Instant::now();
        self.entries
            .lock()
            .get(session_id)
            .is_some_and(|(_, expires)| now < *expires)
    }

    async fn gate(&self) -> TierResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hanging.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(TierError::Unavailable("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheTier for FakeCache {
    async fn get(&self, session_id: &str) -> TierResult<Option<SessionState>> {
        self.gate().await?;
        let now = Instant::now();
        let raw = {
            let mut entries = self.entries.lock();
            let expired = entries.get(session_id).map(|(_, expires)| now >= *expires);
            if expired == Some(true) {
                entries.remove(session_id);
            }
            entries.get(session_id).map(|(raw, _)| raw.clone())
        };
        raw.as_deref().map(decode_envelope).transpose()
    }

    async fn set(&self, session_id: &str, state: &SessionState, ttl: Duration) -> TierResult<()> {
        self.gate().await?;
        let raw = encode_envelope(state)?;
        self.entries
            .lock()
            .insert(session_id.to_string(), (raw, Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> TierResult<()> {
        self.gate().await?;
        self.entries.lock().remove(session_id);
        Ok(())
    }

    async fn close(&self) -> TierResult<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        if let Some(log) = self.close_log.lock().as_ref() {
            log.lock().push("cache");
        }
        if self.close_failing.load(Ordering::SeqCst) {
            return Err(TierError::Unavailable("connection reset".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Durable double
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeDurable {
    rows: Mutex<HashMap<String, SessionRecord>>,
    pub events: Mutex<Vec<SessionEvent>>,
    failing: AtomicBool,
    close_failing: AtomicBool,
    close_log: Mutex<Option<CloseLog>>,
    pub closed: AtomicUsize,
}

impl FakeDurable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_close_failing(&self, failing: bool) {
        self.close_failing.store(failing, Ordering::SeqCst);
    }

    pub fn log_closes_to(&self, log: &CloseLog) {
        *self.close_log.lock() = Some(log.clone());
    }

    pub fn record(&self, session_id: &str) -> Option<SessionRecord> {
        self.rows.lock().get(session_id).cloned()
    }

    fn gate(&self) -> TierResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TierError::Unavailable("database is down".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl DurableTier for FakeDurable {
    async fn fetch(&self, session_id: &str) -> TierResult<Option<SessionRecord>> {
        self.gate()?;
        Ok(self.record(session_id))
    }

    async fn upsert(&self, session_id: &str, state: &SessionState) -> TierResult<UpsertOutcome> {
        self.gate()?;
        let now = Utc::now();
        let mut rows = self.rows.lock();
        match rows.get_mut(session_id) {
            Some(row) => {
                row.state = state.clone();
                row.updated_at = now;
                Ok(UpsertOutcome::Updated)
            }
            None => {
                rows.insert(
                    session_id.to_string(),
                    SessionRecord {
                        session_id: session_id.to_string(),
                        state: state.clone(),
                        created_at: now,
                        updated_at: now,
                    },
                );
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    async fn remove(&self, session_id: &str) -> TierResult<bool> {
        self.gate()?;
        Ok(self.rows.lock().remove(session_id).is_some())
    }

    async fn append_event(&self, event: &SessionEvent) -> TierResult<()> {
        self.gate()?;
        self.events.lock().push(event.clone());
        Ok(())
    }

    async fn close(&self) -> TierResult<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        if let Some(log) = self.close_log.lock().as_ref() {
            log.lock().push("durable");
        }
        if self.close_failing.load(Ordering::SeqCst) {
            return Err(TierError::Unavailable("database lock timeout".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Emitter doubles
// ---------------------------------------------------------------------------

/// Forwards every event to a channel the test can await on.
pub struct RecordingEmitter {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl RecordingEmitter {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl EventEmitter for RecordingEmitter {
    fn name(&self) -> &str {
        "recording"
    }

    async fn emit(&self, event: &SessionEvent) -> Result<(), EmitError> {
        let _ = self.tx.send(event.clone());
        Ok(())
    }
}

pub struct FailingEmitter {
    pub attempts: AtomicUsize,
}

impl FailingEmitter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            attempts: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl EventEmitter for FailingEmitter {
    fn name(&self) -> &str {
        "failing"
    }

    async fn emit(&self, _event: &SessionEvent) -> Result<(), EmitError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(EmitError::Transport("broker unreachable".into()))
    }
}

/// Parks until released, to prove the write path never waits on sinks.
pub struct BlockingEmitter {
    pub release: tokio::sync::Notify,
    pub delivered: AtomicUsize,
}

impl BlockingEmitter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            release: tokio::sync::Notify::new(),
            delivered: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl EventEmitter for BlockingEmitter {
    fn name(&self) -> &str {
        "blocking"
    }

    async fn emit(&self, _event: &SessionEvent) -> Result<(), EmitError> {
        self.release.notified().await;
        self.delivered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event not delivered in time")
        .expect("emitter channel closed")
}
