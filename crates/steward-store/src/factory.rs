use crate::broker::BrokerEmitter;
use crate::cache::RedisCacheTier;
use crate::durable::{DurableTier, SqliteDurableTier};
use crate::emitter::{DurableLogEmitter, EventEmitter, FanOutEmitter};
use crate::memory::MemorySessionStore;
use crate::store::SessionStore;
use crate::tiered::{TieredOptions, TieredSessionStore};
use std::sync::Arc;
use steward_core::{SessionConfig, StewardError, StewardResult, StoreKind};
use tracing::info;

/// Builds the store selected by a [`SessionConfig`].
///
/// Building is a one-time startup step and fails fast on inconsistent
/// configuration. Connections opened here live until the store's `close()`.
pub struct SessionStoreFactory;

impl SessionStoreFactory {
    /// Validates `config` and builds the selected store.
    pub async fn build(config: &SessionConfig) -> StewardResult<Arc<dyn SessionStore>> {
        config.validate()?;
        match config.store_kind {
            StoreKind::Basic => {
                info!(default_ttl_secs = config.default_ttl_secs, "Using basic session store");
                Ok(Arc::new(MemorySessionStore::new(config.default_ttl())))
            }
            StoreKind::Tiered => Ok(Arc::new(Self::build_tiered(config).await?)),
        }
    }

    /// Builds the tiered configuration regardless of `store_kind`.
    pub async fn build_tiered(config: &SessionConfig) -> StewardResult<TieredSessionStore> {
        let database_url = config.database_url.as_deref().ok_or_else(|| {
            StewardError::Config("tiered store requires a database_url".into())
        })?;

        let durable: Arc<dyn DurableTier> = Arc::new(SqliteDurableTier::open(database_url).await?);
        let mut store = TieredSessionStore::new(Arc::clone(&durable), TieredOptions::from(config));

        if let Some(cache_url) = &config.cache_url {
            let cache = RedisCacheTier::connect(
                cache_url,
                config.cache_key_prefix.clone(),
                config.tier_timeout(),
            )
            .await?;
            store = store.with_cache(Arc::new(cache));
        }

        if let (true, Some(broker_url)) = (config.events_enabled, &config.broker_url) {
            let emitters: Vec<Arc<dyn EventEmitter>> = vec![
                Arc::new(BrokerEmitter::new(
                    broker_url,
                    &config.broker_topic,
                    config.tier_timeout(),
                )?),
                Arc::new(DurableLogEmitter::new(durable)),
            ];
            store = store.with_fan_out(FanOutEmitter::new(emitters));
        }

        info!(
            cache = store.has_cache(),
            events = store.has_events(),
            "Using tiered session store"
        );
        Ok(store)
    }
}
