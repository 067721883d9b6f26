use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// Outcome of a failed call into a cache or durable tier.
///
/// The tiered store branches on the tag: both variants make it fall through
/// to the next tier, but they are logged differently because a serialization
/// failure points at corrupt data rather than a flaky dependency.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TierError {
    /// Connection failure, timeout, closed handle or backend error.
    #[error("tier unavailable: {0}")]
    Unavailable(String),
    /// Stored payload could not be encoded or reconstructed.
    #[error("serialization failure: {0}")]
    Serialization(String),
}

impl TierError {
    /// Wraps any displayable error as [`TierError::Unavailable`].
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable(err.to_string())
    }

    /// Wraps any displayable error as [`TierError::Serialization`].
    pub fn serialization(err: impl std::fmt::Display) -> Self {
        Self::Serialization(err.to_string())
    }

    /// Logs the failure at the level matching its kind.
    pub fn log(&self, tier: &str, op: &str, session_id: &str) {
        match self {
            Self::Unavailable(_) => warn!(
                tier,
                op,
                session_id,
                error = %self,
                "Tier unavailable, continuing with next tier"
            ),
            Self::Serialization(_) => error!(
                tier,
                op,
                session_id,
                error = %self,
                "Stored session could not be decoded, treating as miss"
            ),
        }
    }
}

/// Result of a single tier call.
pub type TierResult<T> = Result<T, TierError>;

/// Whole seconds in `ttl`, rounding any fraction up.
pub(crate) fn ceil_secs(ttl: Duration) -> u64 {
    ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0)
}

/// Runs a tier call with an upper bound; expiry counts as unavailability.
pub async fn bounded<T, F>(limit: Duration, tier: &str, fut: F) -> TierResult<T>
where
    F: Future<Output = TierResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(TierError::Unavailable(format!(
            "{tier} call timed out after {}ms",
            limit.as_millis()
        ))),
    }
}
