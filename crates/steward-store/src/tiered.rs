use crate::cache::CacheTier;
use crate::durable::{DurableTier, UpsertOutcome};
use crate::emitter::{EventDispatcher, EventEmitter, FanOutEmitter};
use crate::memory::MemoryTier;
use crate::store::SessionStore;
use crate::tier::{bounded, ceil_secs};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use steward_core::{
    SessionConfig, SessionEvent, SessionEventType, SessionState, StewardError, StewardResult,
};
use tracing::{debug, info, warn};

/// Expiry and timeout settings for a [`TieredSessionStore`].
#[derive(Debug, Clone, Copy)]
pub struct TieredOptions {
    /// Memory expiry for writes without an explicit TTL.
    pub default_ttl: Duration,
    /// Cache expiry for writes without an explicit TTL, and for read-through
    /// population.
    pub cache_ttl: Duration,
    /// Upper bound on any single cache or durable call.
    pub tier_timeout: Duration,
}

impl Default for TieredOptions {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl From<&SessionConfig> for TieredOptions {
    fn from(config: &SessionConfig) -> Self {
        Self {
            default_ttl: config.default_ttl(),
            cache_ttl: config.cache_ttl(),
            tier_timeout: config.tier_timeout(),
        }
    }
}

/// Read-through / write-through store over memory, cache and durable tiers.
///
/// Reads try cache, then durable, then the local memory copy. Writes go to
/// durable first, then cache, then memory. A failing cache or durable tier
/// is logged and skipped; callers only ever see success, `None`, or
/// [`StewardError::Closed`].
///
/// A `set` whose durable write failed still reports success. The
/// reduced durability is visible only as a `Degraded write` warning.
pub struct TieredSessionStore {
    memory: MemoryTier,
    cache: Option<Arc<dyn CacheTier>>,
    durable: Arc<dyn DurableTier>,
    events: Option<EventDispatcher>,
    options: TieredOptions,
    closed: AtomicBool,
}

impl TieredSessionStore {
    /// Builds a store over `durable` with no cache and no events.
    pub fn new(durable: Arc<dyn DurableTier>, options: TieredOptions) -> Self {
        Self {
            memory: MemoryTier::new(),
            cache: None,
            durable,
            events: None,
            options,
            closed: AtomicBool::new(false),
        }
    }

    /// Puts `cache` in front of the durable tier.
    pub fn with_cache(mut self, cache: Arc<dyn CacheTier>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Routes change events to `emitter` on a background task.
    pub fn with_emitter(mut self, emitter: Arc<dyn EventEmitter>) -> Self {
        self.events = Some(EventDispatcher::spawn(emitter));
        self
    }

    /// Routes change events to every sink of `fan_out`, each on its own
    /// background task.
    pub fn with_fan_out(mut self, fan_out: FanOutEmitter) -> Self {
        self.events = Some(EventDispatcher::spawn_each(fan_out.into_sinks()));
        self
    }

    /// The in-process mirror.
    pub fn memory(&self) -> &MemoryTier {
        &self.memory
    }

    /// Whether a cache tier is wired.
    pub fn has_cache(&self) -> bool {
        self.cache.is_some()
    }

    /// Whether change events are dispatched.
    pub fn has_events(&self) -> bool {
        self.events.is_some()
    }

    fn ensure_open(&self) -> StewardResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StewardError::Closed);
        }
        Ok(())
    }

    fn dispatch(&self, event: SessionEvent) {
        if let Some(events) = &self.events {
            events.dispatch(event);
        }
    }

    async fn write_back_cache(&self, session_id: &str, state: &SessionState, ttl: Duration) {
        let Some(cache) = &self.cache else {
            return;
        };
        if let Err(e) = bounded(self.options.tier_timeout, "cache", cache.set(session_id, state, ttl)).await {
            e.log("cache", "set", session_id);
        }
    }
}

#[async_trait]
impl SessionStore for TieredSessionStore {
    async fn get(&self, session_id: &str) -> StewardResult<Option<SessionState>> {
        self.ensure_open()?;
        let timeout = self.options.tier_timeout;

        if let Some(cache) = &self.cache {
            match bounded(timeout, "cache", cache.get(session_id)).await {
                Ok(Some(state)) => {
                    debug!(session_id, "Cache hit");
                    self.memory
                        .set(session_id, state.clone(), self.options.default_ttl);
                    return Ok(Some(state));
                }
                Ok(None) => debug!(session_id, "Cache miss"),
                Err(e) => e.log("cache", "get", session_id),
            }
        }

        match bounded(timeout, "durable", self.durable.fetch(session_id)).await {
            Ok(Some(record)) => {
                debug!(session_id, "Durable hit");
                self.write_back_cache(session_id, &record.state, self.options.cache_ttl)
                    .await;
                self.memory
                    .set(session_id, record.state.clone(), self.options.default_ttl);
                return Ok(Some(record.state));
            }
            Ok(None) => debug!(session_id, "Durable miss"),
            Err(e) => e.log("durable", "fetch", session_id),
        }

        Ok(self.memory.get(session_id))
    }

    async fn set(
        &self,
        session_id: &str,
        state: &SessionState,
        ttl: Option<Duration>,
    ) -> StewardResult<()> {
        self.ensure_open()?;
        let timeout = self.options.tier_timeout;

        let persisted = match bounded(timeout, "durable", self.durable.upsert(session_id, state)).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                e.log("durable", "upsert", session_id);
                warn!(session_id, "Degraded write: session held in cache and memory only");
                None
            }
        };

        self.write_back_cache(session_id, state, ttl.unwrap_or(self.options.cache_ttl))
            .await;

        let replaced = self.memory.set(
            session_id,
            state.clone(),
            ttl.unwrap_or(self.options.default_ttl),
        );

        let event_type = match persisted {
            Some(UpsertOutcome::Inserted) => SessionEventType::Created,
            Some(UpsertOutcome::Updated) => SessionEventType::Updated,
            None if replaced => SessionEventType::Updated,
            None => SessionEventType::Created,
        };
        self.dispatch(SessionEvent::written(
            session_id,
            event_type,
            state,
            ttl.map(ceil_secs),
        ));
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> StewardResult<()> {
        self.ensure_open()?;
        let timeout = self.options.tier_timeout;

        if let Some(cache) = &self.cache {
            if let Err(e) = bounded(timeout, "cache", cache.delete(session_id)).await {
                e.log("cache", "delete", session_id);
            }
        }
        if let Err(e) = bounded(timeout, "durable", self.durable.remove(session_id)).await {
            e.log("durable", "remove", session_id);
        }
        self.memory.delete(session_id);

        self.dispatch(SessionEvent::deleted(session_id));
        Ok(())
    }

    async fn close(&self) -> StewardResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let timeout = self.options.tier_timeout;

        // Drain first: the durable-log emitter still needs the connection.
        if let Some(events) = &self.events {
            events.shutdown(timeout).await;
        }
        if let Err(e) = bounded(timeout, "durable", self.durable.close()).await {
            warn!(error = %e, "Failed to close durable tier");
        }
        if let Some(cache) = &self.cache {
            if let Err(e) = bounded(timeout, "cache", cache.close()).await {
                warn!(error = %e, "Failed to close cache tier");
            }
        }
        self.memory.clear();
        info!("Tiered session store closed");
        Ok(())
    }
}
