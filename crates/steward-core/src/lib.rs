//! Core types and error definitions for the Steward session store.
//!
//! This crate provides the foundational types shared across all Steward crates,
//! including error handling, the opaque session payload, change events, and
//! store configuration.
//!
//! # Main types
//!
//! - [`StewardError`]: Unified error enum for all Steward subsystems.
//! - [`StewardResult`]: Convenience alias for `Result<T, StewardError>`.
//! - [`SessionState`]: Opaque, serializable session payload.
//! - [`SessionRecord`]: A payload as persisted by the durable tier.
//! - [`SessionEvent`]: A state-change notification sent to event sinks.
//! - [`SessionConfig`]: Runtime configuration selecting and wiring a store.

/// Store configuration and environment loading.
pub mod config;
/// Session change events.
pub mod event;
/// Session payload and durable record types.
pub mod session;

pub use config::{SessionConfig, StoreKind};
pub use event::{SessionEvent, SessionEventType};
pub use session::{SessionRecord, SessionState};

// --- Error types ---

/// Top-level error type for the Steward session store.
///
/// Tier and emitter failures never surface through this type at runtime;
/// they are absorbed by the tiered store. What remains is startup
/// configuration, resource setup, and use-after-close.
#[derive(Debug, thiserror::Error)]
pub enum StewardError {
    /// The configuration is inconsistent for the selected store kind.
    #[error("Config error: {0}")]
    Config(String),

    /// A storage backend could not be set up.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The store was used after `close()` ran.
    #[error("Store is closed")]
    Closed,

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`StewardError`].
pub type StewardResult<T> = Result<T, StewardError>;
