use std::sync::Arc;

use anyhow::{Context, Result};

use crate::caching::CacheManager;
use crate::config::Config;
use crate::store::{RedisStore, Store};

/// Everything long-lived that request handlers need, behind one cheap
/// clone handle.
#[derive(Debug, Clone)]
pub struct ServiceState {
    inner: Arc<ServiceStateInner>,
}

#[derive(Debug)]
struct ServiceStateInner {
    config: Config,
    store: Arc<dyn Store>,
    cache: CacheManager,
}

impl ServiceState {
    /// Validates the configuration and brings up the store connection pool.
    ///
    /// An unreachable store at startup is logged but not fatal. The service
    /// starts in degraded mode and recovers as soon as the store does.
    pub async fn create(config: Config) -> Result<Self> {
        config.validate().context("invalid configuration")?;

        let store = RedisStore::create(&config.store_url, &config.store)
            .context("failed to initialize the store connection pool")?;
        let store: Arc<dyn Store> = Arc::new(store);

        match store.ping().await {
            Ok(()) => tracing::info!(url = %config.store_url, "Connected to store"),
            Err(err) => {
                tracing::warn!(error = %err, "Store unreachable at startup, serving degraded")
            }
        }

        Ok(Self::with_store(config, store))
    }

    /// Assembles the state around an existing store implementation.
    pub fn with_store(config: Config, store: Arc<dyn Store>) -> Self {
        let cache = CacheManager::new(
            Arc::clone(&store),
            &config.namespace,
            config.cache.clone(),
        );

        ServiceState {
            inner: Arc::new(ServiceStateInner {
                config,
                store,
                cache,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn cache(&self) -> &CacheManager {
        &self.inner.cache
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.inner.store
    }

    /// Drains in-flight store operations and closes the pool.
    ///
    /// Bounded by `shutdown_grace`; operations still running afterwards are
    /// abandoned.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down store connections");
        self.inner
            .store
            .close(self.inner.config.shutdown_grace)
            .await;
    }
}
