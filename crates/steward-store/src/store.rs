use async_trait::async_trait;
use std::time::Duration;
use steward_core::{SessionState, StewardResult};

/// The contract request handlers program against.
///
/// Implementations absorb backend failures: a `get` that finds nothing
/// anywhere is `Ok(None)`, and tier outages never turn into errors. The only
/// runtime error is [`StewardError::Closed`](steward_core::StewardError::Closed).
///
/// Concurrent writers to the same id are not serialized; the write that
/// completes last wins.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Returns the freshest reachable copy of the session.
    async fn get(&self, session_id: &str) -> StewardResult<Option<SessionState>>;

    /// Upserts the session. `ttl` overrides the default expiry of the
    /// ephemeral tiers; the durable tier ignores it.
    async fn set(
        &self,
        session_id: &str,
        state: &SessionState,
        ttl: Option<Duration>,
    ) -> StewardResult<()>;

    /// Removes the session from every tier. Deleting an unknown id succeeds.
    async fn delete(&self, session_id: &str) -> StewardResult<()>;

    /// Releases every held connection. Always completes; idempotent.
    async fn close(&self) -> StewardResult<()>;
}
