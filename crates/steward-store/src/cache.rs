use crate::tier::{ceil_secs, TierError, TierResult};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use steward_core::{SessionState, StewardError, StewardResult};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Version tag written into every cache payload.
pub const CACHE_FORMAT_VERSION: u32 = 1;

/// Shared, TTL-capable cache sitting in front of the durable tier.
#[async_trait]
pub trait CacheTier: Send + Sync {
    /// Reads and decodes the cached state, if present.
    async fn get(&self, session_id: &str) -> TierResult<Option<SessionState>>;

    /// Writes `state` with the given expiry.
    async fn set(&self, session_id: &str, state: &SessionState, ttl: Duration) -> TierResult<()>;

    /// Removes the entry. Absent keys are not an error.
    async fn delete(&self, session_id: &str) -> TierResult<()>;

    /// Releases the connection. Later calls report [`TierError::Unavailable`].
    async fn close(&self) -> TierResult<()>;
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    v: u32,
    state: &'a SessionState,
}

#[derive(Deserialize)]
struct Envelope {
    v: u32,
    state: SessionState,
}

/// Encodes a state into the versioned JSON cache payload.
pub fn encode_envelope(state: &SessionState) -> TierResult<String> {
    serde_json::to_string(&EnvelopeRef {
        v: CACHE_FORMAT_VERSION,
        state,
    })
    .map_err(TierError::serialization)
}

/// Decodes a cache payload, rejecting malformed JSON and unknown versions.
pub fn decode_envelope(raw: &str) -> TierResult<SessionState> {
    let envelope: Envelope = serde_json::from_str(raw).map_err(TierError::serialization)?;
    if envelope.v != CACHE_FORMAT_VERSION {
        return Err(TierError::Serialization(format!(
            "unsupported cache payload version {}",
            envelope.v
        )));
    }
    Ok(envelope.state)
}

/// Redis-backed cache tier.
///
/// The URL is validated when the tier is built. If the server cannot be
/// reached at that point the tier starts disconnected and retries the
/// connection on each call, so a cache outage at startup only degrades the
/// store instead of preventing it from starting.
pub struct RedisCacheTier {
    client: redis::Client,
    conn: Mutex<Option<ConnectionManager>>,
    key_prefix: String,
    connect_timeout: Duration,
    closed: AtomicBool,
}

impl RedisCacheTier {
    /// Validates `url` and attempts a first connection.
    pub async fn connect(
        url: &str,
        key_prefix: impl Into<String>,
        connect_timeout: Duration,
    ) -> StewardResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| StewardError::Config(format!("invalid cache_url '{url}': {e}")))?;
        let tier = Self {
            client,
            conn: Mutex::new(None),
            key_prefix: key_prefix.into(),
            connect_timeout,
            closed: AtomicBool::new(false),
        };
        match tier.connection().await {
            Ok(_) => info!("Connected to cache tier"),
            Err(e) => warn!(error = %e, "Cache tier unreachable at startup, will retry lazily"),
        }
        Ok(tier)
    }

    fn key(&self, session_id: &str) -> String {
        format!("{}{}", self.key_prefix, session_id)
    }

    async fn connection(&self) -> TierResult<ConnectionManager> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TierError::Unavailable("cache tier is closed".into()));
        }
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = tokio::time::timeout(
            self.connect_timeout,
            ConnectionManager::new(self.client.clone()),
        )
        .await
        .map_err(|_| TierError::Unavailable("cache connect timed out".into()))?
        .map_err(TierError::unavailable)?;
        *guard = Some(conn.clone());
        Ok(conn)
    }
}

#[async_trait]
impl CacheTier for RedisCacheTier {
    async fn get(&self, session_id: &str) -> TierResult<Option<SessionState>> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn
            .get(self.key(session_id))
            .await
            .map_err(TierError::unavailable)?;
        raw.as_deref().map(decode_envelope).transpose()
    }

    async fn set(&self, session_id: &str, state: &SessionState, ttl: Duration) -> TierResult<()> {
        let payload = encode_envelope(state)?;
        let mut conn = self.connection().await?;
        // SETEX takes whole seconds and rejects zero.
        let seconds = ceil_secs(ttl).max(1);
        conn.set_ex::<_, _, ()>(self.key(session_id), payload, seconds)
            .await
            .map_err(TierError::unavailable)
    }

    async fn delete(&self, session_id: &str) -> TierResult<()> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(self.key(session_id))
            .await
            .map_err(TierError::unavailable)
    }

    async fn close(&self) -> TierResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.conn.lock().await.take();
            debug!("Cache tier connection released");
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_carries_version() {
        let state = SessionState::new(json!({"step": "greet"}));
        let raw = encode_envelope(&state).unwrap();
        assert_eq!(raw, r#"{"v":1,"state":{"step":"greet"}}"#);
        assert_eq!(decode_envelope(&raw).unwrap(), state);
    }

    #[test]
    fn unknown_version_is_serialization_failure() {
        let err = decode_envelope(r#"{"v":2,"state":{}}"#).unwrap_err();
        assert!(matches!(err, TierError::Serialization(_)));
    }

    #[test]
    fn garbage_is_serialization_failure() {
        for raw in ["", "not json", r#"{"state":{}}"#, "\u{80}\u{3}pickle"] {
            assert!(
                matches!(decode_envelope(raw), Err(TierError::Serialization(_))),
                "{raw:?} should not decode"
            );
        }
    }

    #[tokio::test]
    async fn invalid_url_is_config_error() {
        let result = RedisCacheTier::connect("not a url", "session:", Duration::from_millis(100)).await;
        assert!(matches!(result, Err(StewardError::Config(_))));
    }

    #[tokio::test]
    async fn unreachable_server_degrades_instead_of_failing() {
        // Port 1 is reserved and refuses connections on any sane host.
        let tier = RedisCacheTier::connect(
            "redis://127.0.0.1:1/",
            "session:",
            Duration::from_millis(500),
        )
        .await
        .unwrap();

        let state = SessionState::new(json!({"step": "greet"}));
        assert!(matches!(
            tier.set("a", &state, Duration::from_secs(5)).await,
            Err(TierError::Unavailable(_))
        ));
        assert!(matches!(tier.get("a").await, Err(TierError::Unavailable(_))));

        tier.close().await.unwrap();
        assert_eq!(
            tier.delete("a").await,
            Err(TierError::Unavailable("cache tier is closed".into()))
        );
    }

    #[tokio::test]
    async fn keys_are_prefixed() {
        let tier = RedisCacheTier::connect("redis://127.0.0.1:1/", "agent:", Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(tier.key("sess-1"), "agent:sess-1");
    }
}
