//! Tiered session storage for conversational agents.
//!
//! Sessions are kept in up to three tiers: an in-process [`MemoryTier`], a
//! shared Redis cache ([`RedisCacheTier`]) and a SQLite system of record
//! ([`SqliteDurableTier`]). [`TieredSessionStore`] chains them read-through /
//! write-through and mirrors changes to event sinks without letting any
//! backend failure reach the caller.
//!
//! # Main types
//!
//! - [`SessionStore`]: The contract request handlers depend on.
//! - [`MemorySessionStore`]: Basic, memory-only store.
//! - [`TieredSessionStore`]: Memory + cache + durable chain.
//! - [`SessionStoreFactory`]: Builds either store from a `SessionConfig`.
//! - [`EventEmitter`]: Event sink trait, with [`BrokerEmitter`],
//!   [`DurableLogEmitter`] and the composite [`FanOutEmitter`].

/// Kafka REST proxy event sink.
pub mod broker;
/// Cache tier trait, payload envelope and Redis implementation.
pub mod cache;
/// Durable tier trait and SQLite implementation.
pub mod durable;
/// Event sink trait, fan-out and background dispatch.
pub mod emitter;
/// Store construction from configuration.
pub mod factory;
/// In-process tier and the basic store.
pub mod memory;
/// The store contract.
pub mod store;
/// Typed tier results and call timeouts.
pub mod tier;
/// The tiered store.
pub mod tiered;

pub use broker::BrokerEmitter;
pub use cache::{CacheTier, RedisCacheTier};
pub use durable::{DurableTier, SqliteDurableTier, UpsertOutcome};
pub use emitter::{DurableLogEmitter, EmitError, EventDispatcher, EventEmitter, FanOutEmitter};
pub use factory::SessionStoreFactory;
pub use memory::{MemorySessionStore, MemoryTier, SWEEP_EVERY_WRITES};
pub use store::SessionStore;
pub use tier::{TierError, TierResult};
pub use tiered::{TieredOptions, TieredSessionStore};
