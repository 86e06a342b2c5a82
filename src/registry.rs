//! Cache Registry
//!
//! Creates and tracks named cache instances. The registry is an ordinary
//! value owned by the application and passed to whatever needs it; `close`
//! tears every instance down at shutdown.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::cache::{CacheOptions, CoordinationStore, MemoryCache, RedisCache};
use crate::error::{CacheError, Result};

/// Shared handle to a registered cache.
pub type SharedCache = Arc<dyn CoordinationStore>;

// == Backend Kind ==
/// Which backend a named instance is built on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendKind {
    /// In-process map
    Memory,
    /// Redis server at `url`
    Redis { url: String },
}

// == Cache Registry ==
#[derive(Default)]
pub struct CacheRegistry {
    caches: RwLock<HashMap<String, SharedCache>>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // == Create ==
    /// Builds and registers a cache under `name`.
    ///
    /// A Redis instance created with an empty `key_prefix` is namespaced as
    /// `"<name>:"` so it never shares keys with other instances.
    pub async fn create(
        &self,
        name: &str,
        kind: BackendKind,
        options: CacheOptions,
    ) -> Result<SharedCache> {
        if self.caches.read().await.contains_key(name) {
            return Err(CacheError::AlreadyExists(name.to_string()));
        }

        let cache: SharedCache = match &kind {
            BackendKind::Memory => Arc::new(MemoryCache::new(options)),
            BackendKind::Redis { url } => {
                let options = if options.key_prefix.is_empty() {
                    options.with_key_prefix(format!("{}:", name))
                } else {
                    options
                };
                Arc::new(RedisCache::connect(url, options).await?)
            }
        };

        self.insert(name, cache, &kind).await
    }

    /// Registers an already constructed cache under `name`.
    pub async fn register(&self, name: &str, cache: SharedCache) -> Result<SharedCache> {
        let mut caches = self.caches.write().await;
        if caches.contains_key(name) {
            return Err(CacheError::AlreadyExists(name.to_string()));
        }
        caches.insert(name.to_string(), cache.clone());
        Ok(cache)
    }

    async fn insert(&self, name: &str, cache: SharedCache, kind: &BackendKind) -> Result<SharedCache> {
        {
            let mut caches = self.caches.write().await;
            if !caches.contains_key(name) {
                caches.insert(name.to_string(), cache.clone());
                info!("Registered cache '{}' ({:?})", name, kind);
                return Ok(cache);
            }
        }

        // Lost a race with a concurrent create of the same name
        if let Err(err) = cache.close().await {
            warn!("Failed to close duplicate cache '{}': {}", name, err);
        }
        Err(CacheError::AlreadyExists(name.to_string()))
    }

    // == Get ==
    pub async fn get(&self, name: &str) -> Result<SharedCache> {
        self.caches
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| CacheError::NotFound(name.to_string()))
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    // == Delete ==
    /// Closes and unregisters one instance.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let cache = self
            .caches
            .write()
            .await
            .remove(name)
            .ok_or_else(|| CacheError::NotFound(name.to_string()))?;

        info!("Removed cache '{}'", name);
        match cache.close().await {
            Ok(()) | Err(CacheError::AlreadyClosed) => Ok(()),
            Err(err) => Err(err),
        }
    }

    // == Close ==
    /// Closes and unregisters every instance. Close failures are logged so
    /// one broken backend cannot keep the others open.
    pub async fn close(&self) {
        let caches: Vec<(String, SharedCache)> = self.caches.write().await.drain().collect();

        for (name, cache) in caches {
            match cache.close().await {
                Ok(()) | Err(CacheError::AlreadyClosed) => info!("Closed cache '{}'", name),
                Err(err) => warn!("Failed to close cache '{}': {}", name, err),
            }
        }
    }
}
