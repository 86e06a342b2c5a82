//! Negative Caching
//!
//! Opt-in: callers that have confirmed a key does not exist can record that
//! fact for a short TTL, so repeated lookups stop reaching the loader.

use std::time::Duration;

use super::{ProtectedCache, ABSENT_SENTINEL};
use crate::cache::CoordinationStore;
use crate::codec::Codec;
use crate::error::Result;

impl<S: CoordinationStore + ?Sized, C: Codec> ProtectedCache<S, C> {
    /// Records `key` as absent for `ttl`. Protected reads of it then fail
    /// with [`CacheError::DefinitelyAbsent`](crate::CacheError::DefinitelyAbsent)
    /// until the entry expires or is overwritten.
    pub async fn cache_absent(&self, key: &str, ttl: Duration) -> Result<()> {
        self.store.set(key, ABSENT_SENTINEL.to_vec(), ttl).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cache::{CacheOptions, MemoryCache};
    use crate::error::CacheError;

    #[tokio::test]
    async fn test_absent_marker_short_circuits_loader() {
        let cache = ProtectedCache::new(Arc::new(MemoryCache::new(CacheOptions::default())));
        cache
            .cache_absent("user:404", Duration::from_secs(30))
            .await
            .unwrap();

        let result: Result<u32> = cache
            .get_with_protection(
                "user:404",
                || async { Err(anyhow::anyhow!("loader must not run")) },
                Duration::ZERO,
            )
            .await;
        assert!(matches!(result, Err(CacheError::DefinitelyAbsent(_))));
    }

    #[tokio::test]
    async fn test_absent_marker_expires() {
        let cache = ProtectedCache::new(Arc::new(MemoryCache::new(CacheOptions::default())));
        cache
            .cache_absent("user:404", Duration::from_millis(20))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let value: u32 = cache
            .get_with_protection("user:404", || async { Ok(404) }, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(value, 404);
    }
}
