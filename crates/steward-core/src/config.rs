use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::{StewardError, StewardResult};

/// Which store configuration the factory builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Memory tier only.
    #[default]
    #[serde(alias = "memory")]
    Basic,
    /// Memory, distributed cache and durable tiers, with optional events.
    #[serde(alias = "production")]
    Tiered,
}

impl FromStr for StoreKind {
    type Err = StewardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" | "memory" => Ok(Self::Basic),
            "tiered" | "production" => Ok(Self::Tiered),
            other => Err(StewardError::Config(format!(
                "unknown store kind '{other}' (expected 'basic' or 'tiered')"
            ))),
        }
    }
}

/// Runtime configuration for building a session store.
///
/// Loaded from a TOML file (`[session]` table or top level) or from the
/// process environment with [`SessionConfig::from_env`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Which store the factory builds.
    #[serde(default)]
    pub store_kind: StoreKind,
    /// Memory-tier expiry for writes without an explicit TTL.
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
    /// Cache-tier expiry for writes without an explicit TTL.
    #[serde(default = "default_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Redis endpoint. Absent disables the cache tier.
    #[serde(default)]
    pub cache_url: Option<String>,
    /// SQLite path or `:memory:`. Required for [`StoreKind::Tiered`].
    #[serde(default)]
    pub database_url: Option<String>,
    /// Turns on the event fan-out, given a `broker_url`.
    #[serde(default)]
    pub events_enabled: bool,
    /// Kafka REST proxy base URL for the broker emitter.
    #[serde(default)]
    pub broker_url: Option<String>,
    /// Topic the broker emitter publishes to.
    #[serde(default = "default_broker_topic")]
    pub broker_topic: String,
    /// Upper bound on any single cache or durable call.
    #[serde(default = "default_tier_timeout_ms")]
    pub tier_timeout_ms: u64,
    /// Namespace prepended to every cache key.
    #[serde(default = "default_cache_key_prefix")]
    pub cache_key_prefix: String,
}

fn default_ttl_secs() -> u64 {
    3600
}

fn default_broker_topic() -> String {
    "session_events".to_string()
}

fn default_tier_timeout_ms() -> u64 {
    2000
}

fn default_cache_key_prefix() -> String {
    "session:".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            store_kind: StoreKind::default(),
            default_ttl_secs: default_ttl_secs(),
            cache_ttl_secs: default_ttl_secs(),
            cache_url: None,
            database_url: None,
            events_enabled: false,
            broker_url: None,
            broker_topic: default_broker_topic(),
            tier_timeout_ms: default_tier_timeout_ms(),
            cache_key_prefix: default_cache_key_prefix(),
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    session: Option<SessionConfig>,
}

impl SessionConfig {
    /// Reads configuration from the process environment.
    pub fn from_env() -> StewardResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through an arbitrary key lookup.
    ///
    /// Recognized keys: `SESSION_STORE`, `SESSION_DEFAULT_TTL`,
    /// `SESSION_CACHE_TTL`, `REDIS_URL`, `DATABASE_URL`, `SESSION_EVENTS`,
    /// `BROKER_URL`, `BROKER_TOPIC`, `SESSION_TIER_TIMEOUT_MS`,
    /// `SESSION_CACHE_PREFIX`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> StewardResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(kind) = get("SESSION_STORE") {
            config.store_kind = kind.parse()?;
        }
        if let Some(ttl) = get("SESSION_DEFAULT_TTL") {
            config.default_ttl_secs = parse_u64("SESSION_DEFAULT_TTL", &ttl)?;
        }
        if let Some(ttl) = get("SESSION_CACHE_TTL") {
            config.cache_ttl_secs = parse_u64("SESSION_CACHE_TTL", &ttl)?;
        }
        config.cache_url = get("REDIS_URL");
        config.database_url = get("DATABASE_URL");
        if let Some(flag) = get("SESSION_EVENTS") {
            config.events_enabled = parse_bool("SESSION_EVENTS", &flag)?;
        }
        config.broker_url = get("BROKER_URL");
        if let Some(topic) = get("BROKER_TOPIC") {
            config.broker_topic = topic;
        }
        if let Some(ms) = get("SESSION_TIER_TIMEOUT_MS") {
            config.tier_timeout_ms = parse_u64("SESSION_TIER_TIMEOUT_MS", &ms)?;
        }
        if let Some(prefix) = get("SESSION_CACHE_PREFIX") {
            config.cache_key_prefix = prefix;
        }
        Ok(config)
    }

    /// Parses a TOML document. A `[session]` table takes precedence; otherwise
    /// the top level is read as the configuration itself.
    pub fn from_toml_str(s: &str) -> StewardResult<Self> {
        let wrapped: ConfigFile =
            toml::from_str(s).map_err(|e| StewardError::Config(e.to_string()))?;
        match wrapped.session {
            Some(config) => Ok(config),
            None => toml::from_str(s).map_err(|e| StewardError::Config(e.to_string())),
        }
    }

    /// Checks that the endpoints required by `store_kind` are present.
    pub fn validate(&self) -> StewardResult<()> {
        if self.store_kind == StoreKind::Tiered && self.database_url.is_none() {
            return Err(StewardError::Config(
                "tiered store requires a database_url".into(),
            ));
        }
        if self.tier_timeout_ms == 0 {
            return Err(StewardError::Config(
                "tier_timeout_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// [`Self::default_ttl_secs`] as a duration.
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    /// [`Self::cache_ttl_secs`] as a duration.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// [`Self::tier_timeout_ms`] as a duration.
    pub fn tier_timeout(&self) -> Duration {
        Duration::from_millis(self.tier_timeout_ms)
    }

    /// Whether the factory should wire the event fan-out.
    pub fn events_wired(&self) -> bool {
        self.events_enabled && self.broker_url.is_some()
    }
}

fn parse_u64(key: &str, value: &str) -> StewardResult<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| StewardError::Config(format!("{key} must be a non-negative integer, got '{value}'")))
}

fn parse_bool(key: &str, value: &str) -> StewardResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(StewardError::Config(format!(
            "{key} must be a boolean, got '{value}'"
        ))),
    }
}
