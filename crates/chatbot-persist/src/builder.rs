use std::sync::Arc;

use crate::cache::{LocalThreadCache, ThreadCache};
use crate::config::{CacheBackend, CacheConfig, DatastoreConfig};
use crate::datastore::{SqlThreadDatastore, ThreadDatastore};
use crate::error::{PersistError, Result};
use crate::manager::{ThreadManager, DEFAULT_MAX_ALLOCATION_ATTEMPTS};

/// Wires a [`ThreadManager`] from configuration.
///
/// The cache backend is picked from [`CacheConfig::backend`]. Pre-built
/// stores can be injected instead, which is how tests share one in-process
/// map across components.
pub struct ThreadManagerBuilder {
    cache_config: CacheConfig,
    datastore_config: Option<DatastoreConfig>,
    cache: Option<Arc<dyn ThreadCache>>,
    datastore: Option<Arc<dyn ThreadDatastore>>,
    init_schema: bool,
    max_allocation_attempts: usize,
}

impl ThreadManagerBuilder {
    pub fn new() -> Self {
        Self {
            cache_config: CacheConfig::default(),
            datastore_config: None,
            cache: None,
            datastore: None,
            init_schema: true,
            max_allocation_attempts: DEFAULT_MAX_ALLOCATION_ATTEMPTS,
        }
    }

    pub fn cache_config(mut self, config: CacheConfig) -> Self {
        self.cache_config = config;
        self
    }

    pub fn datastore_config(mut self, config: DatastoreConfig) -> Self {
        self.datastore_config = Some(config);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn ThreadCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn datastore(mut self, datastore: Arc<dyn ThreadDatastore>) -> Self {
        self.datastore = Some(datastore);
        self
    }

    /// Create the datastore table on build (default: true).
    pub fn init_schema(mut self, init: bool) -> Self {
        self.init_schema = init;
        self
    }

    pub fn max_allocation_attempts(mut self, attempts: usize) -> Self {
        self.max_allocation_attempts = attempts;
        self
    }

    pub async fn build(self) -> Result<ThreadManager> {
        let cache = match self.cache {
            Some(cache) => cache,
            None => build_cache(&self.cache_config).await?,
        };

        let datastore: Arc<dyn ThreadDatastore> = match self.datastore {
            Some(datastore) => datastore,
            None => {
                let config = self
                    .datastore_config
                    .ok_or_else(|| PersistError::Config("datastore config is required".to_string()))?;
                let store = SqlThreadDatastore::connect(&config).await?;
                if self.init_schema {
                    store.init_schema().await?;
                }
                Arc::new(store)
            }
        };

        tracing::info!(cache_backend = cache.backend_name(), "Thread manager ready");
        Ok(ThreadManager::new(cache, datastore)
            .with_max_allocation_attempts(self.max_allocation_attempts))
    }
}

impl Default for ThreadManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

async fn build_cache(config: &CacheConfig) -> Result<Arc<dyn ThreadCache>> {
    match config.backend {
        CacheBackend::InMemory => Ok(Arc::new(LocalThreadCache::new())),
        #[cfg(feature = "redis")]
        CacheBackend::Redis => Ok(Arc::new(crate::cache::RedisThreadCache::connect(config).await?)),
        #[cfg(not(feature = "redis"))]
        CacheBackend::Redis => Err(PersistError::Config(
            "redis cache backend requires the `redis` feature".to_string(),
        )),
    }
}
