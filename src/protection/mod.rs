//! Protection Module
//!
//! Loader-based read paths layered on a [`CoordinationStore`]:
//!
//! - `get_with_protection`: stampede-safe cache-aside read behind an advisory lock
//! - `get_with_bloom_filter`: the same read, short-circuited for keys a
//!   membership filter proves absent
//! - `warm_up`: bulk fill of missing keys through a bounded worker pool
//! - `cache_absent`: opt-in negative caching
//!
//! Values are typed; a [`Codec`] turns them into the bytes the store keeps.

mod bloom;
mod negative;
mod stampede;
mod warmup;

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache::CoordinationStore;
use crate::codec::{Codec, JsonCodec};
use crate::error::{CacheError, Result};

pub use warmup::WarmUpReport;

// == Constants ==
/// Prefix of the advisory lock key guarding a loader
pub const LOCK_PREFIX: &str = "lock:";

/// Bytes stored by `cache_absent`. No JSON document starts with NUL.
pub(crate) const ABSENT_SENTINEL: &[u8] = b"\x00absent";

pub(crate) fn lock_key(key: &str) -> String {
    format!("{}{}", LOCK_PREFIX, key)
}

// == Protection Options ==
/// Tuning for the loader-based entry points.
#[derive(Debug, Clone)]
pub struct ProtectionOptions {
    /// TTL of the advisory lock
    pub lock_ttl: Duration,
    /// Pause between attempts while another caller holds the lock
    pub retry_interval: Duration,
    /// Attempts before giving up with `Timeout`
    pub max_attempts: u32,
    /// Optional overall bound on waiting for the lock
    pub deadline: Option<Duration>,
    /// Cap on concurrent warm-up loaders
    pub warm_up_workers: usize,
}

impl Default for ProtectionOptions {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(5),
            retry_interval: Duration::from_millis(50),
            max_attempts: 100,
            deadline: None,
            warm_up_workers: 10,
        }
    }
}

// == Protected Cache ==
/// Typed, stampede-protected view over a coordination-capable store.
pub struct ProtectedCache<S: ?Sized, C = JsonCodec> {
    store: Arc<S>,
    codec: C,
    options: ProtectionOptions,
}

impl<S: CoordinationStore + ?Sized> ProtectedCache<S, JsonCodec> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_codec(store, JsonCodec, ProtectionOptions::default())
    }
}

impl<S: CoordinationStore + ?Sized, C: Codec> ProtectedCache<S, C> {
    pub fn with_codec(store: Arc<S>, codec: C, options: ProtectionOptions) -> Self {
        Self {
            store,
            codec,
            options,
        }
    }

    pub fn with_options(mut self, options: ProtectionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn options(&self) -> &ProtectionOptions {
        &self.options
    }

    // == Typed Access ==
    /// Reads and decodes `key`; a miss is `NotFound`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.read(key)
            .await?
            .ok_or_else(|| CacheError::NotFound(key.to_string()))
    }

    /// Encodes and stores `value`; a zero `ttl` uses the store default.
    pub async fn set<T: Serialize + Sync>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let bytes = self.codec.encode(value)?;
        self.store.set(key, bytes, ttl).await
    }

    /// `Ok(None)` on a miss; negative cache entries surface as `DefinitelyAbsent`.
    pub(crate) async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.store.get(key).await {
            Ok(bytes) if bytes == ABSENT_SENTINEL => {
                Err(CacheError::DefinitelyAbsent(key.to_string()))
            }
            Ok(bytes) => self.codec.decode(&bytes).map(Some),
            Err(CacheError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

impl<S: ?Sized, C: Clone> Clone for ProtectedCache<S, C> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            codec: self.codec.clone(),
            options: self.options.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheOptions, CacheStore, MemoryCache};

    #[tokio::test]
    async fn test_typed_roundtrip() {
        let cache = ProtectedCache::new(Arc::new(MemoryCache::new(CacheOptions::default())));

        cache.set("answer", &42u32, Duration::ZERO).await.unwrap();
        assert_eq!(cache.get::<u32>("answer").await.unwrap(), 42);
        assert!(matches!(
            cache.get::<u32>("missing").await,
            Err(CacheError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_undecodable_bytes_are_serialization_errors() {
        let store = Arc::new(MemoryCache::new(CacheOptions::default()));
        store.set("raw", b"{oops".to_vec(), Duration::ZERO).await.unwrap();

        let cache = ProtectedCache::new(store);
        assert!(matches!(
            cache.get::<u32>("raw").await,
            Err(CacheError::Serialization(_))
        ));
    }

    #[test]
    fn test_lock_key() {
        assert_eq!(lock_key("user:1"), "lock:user:1");
    }
}
