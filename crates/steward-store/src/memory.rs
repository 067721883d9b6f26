use crate::store::SessionStore;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use steward_core::{SessionState, StewardError, StewardResult};
use tokio::time::Instant;
use tracing::debug;

struct MemoryEntry {
    state: SessionState,
    expires_at: Instant,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Writes between automatic sweeps of expired entries.
pub const SWEEP_EVERY_WRITES: usize = 256;

/// Process-local session map with per-entry expiry.
///
/// Expiry is checked lazily on read. Every [`SWEEP_EVERY_WRITES`] writes the
/// tier also runs [`MemoryTier::purge_expired`], so sessions that are never
/// read again are still reclaimed. None of the operations perform I/O or
/// can fail.
pub struct MemoryTier {
    entries: RwLock<HashMap<String, MemoryEntry>>,
    writes: AtomicUsize,
}

impl MemoryTier {
    /// Creates an empty tier.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            writes: AtomicUsize::new(0),
        }
    }

    /// Returns the live copy, removing it first if it has expired.
    pub fn get(&self, session_id: &str) -> Option<SessionState> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(session_id) {
                None => return None,
                Some(entry) if !entry.is_expired(now) => return Some(entry.state.clone()),
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write();
        // Re-check: a writer may have refreshed the entry between the locks.
        if entries.get(session_id).is_some_and(|e| e.is_expired(now)) {
            entries.remove(session_id);
            debug!(session_id, "Memory entry expired");
        }
        entries
            .get(session_id)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.state.clone())
    }

    /// Stores `state` until `ttl` elapses. Returns whether a live entry was
    /// replaced.
    pub fn set(&self, session_id: &str, state: SessionState, ttl: Duration) -> bool {
        let now = Instant::now();
        let entry = MemoryEntry {
            state,
            expires_at: now + ttl,
        };
        let replaced = self
            .entries
            .write()
            .insert(session_id.to_string(), entry)
            .is_some_and(|previous| !previous.is_expired(now));

        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % SWEEP_EVERY_WRITES == 0 {
            let purged = self.purge_expired();
            if purged > 0 {
                debug!(purged, "Swept expired memory entries");
            }
        }
        replaced
    }

    /// Removes the entry. Returns whether a live entry was removed.
    pub fn delete(&self, session_id: &str) -> bool {
        let now = Instant::now();
        self.entries
            .write()
            .remove(session_id)
            .is_some_and(|previous| !previous.is_expired(now))
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .values()
            .filter(|e| !e.is_expired(now))
            .count()
    }

    /// Entries held, including expired ones not yet reclaimed.
    pub fn stored(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether there are no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl Default for MemoryTier {
    fn default() -> Self {
        Self::new()
    }
}

/// The *Basic* store: memory tier only.
pub struct MemorySessionStore {
    tier: MemoryTier,
    default_ttl: Duration,
    closed: AtomicBool,
}

impl MemorySessionStore {
    /// Builds a store whose writes expire after `default_ttl` unless given a
    /// TTL.
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            tier: MemoryTier::new(),
            default_ttl,
            closed: AtomicBool::new(false),
        }
    }

    /// The backing tier.
    pub fn tier(&self) -> &MemoryTier {
        &self.tier
    }

    fn ensure_open(&self) -> StewardResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StewardError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, session_id: &str) -> StewardResult<Option<SessionState>> {
        self.ensure_open()?;
        Ok(self.tier.get(session_id))
    }

    async fn set(
        &self,
        session_id: &str,
        state: &SessionState,
        ttl: Option<Duration>,
    ) -> StewardResult<()> {
        self.ensure_open()?;
        self.tier
            .set(session_id, state.clone(), ttl.unwrap_or(self.default_ttl));
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> StewardResult<()> {
        self.ensure_open()?;
        self.tier.delete(session_id);
        Ok(())
    }

    async fn close(&self) -> StewardResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.tier.clear();
            debug!("Memory session store closed");
        }
        Ok(())
    }
}
