//! Bloom-Gated Read
//!
//! A membership filter in front of the stampede-protected read: keys the
//! filter has never seen fail fast instead of reaching the loader.

use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::ProtectedCache;
use crate::cache::CoordinationStore;
use crate::codec::Codec;
use crate::error::{CacheError, Result};

impl<S: CoordinationStore + ?Sized, C: Codec> ProtectedCache<S, C> {
    // == Get With Bloom Filter ==
    /// Like [`get_with_protection`](Self::get_with_protection), but a miss is
    /// first checked against `filter`:
    ///
    /// - filter missing: fail open and load as usual
    /// - key not a member: [`CacheError::DefinitelyAbsent`], loader not called
    /// - key a member: load and cache
    pub async fn get_with_bloom_filter<T, F, Fut>(
        &self,
        key: &str,
        filter: &str,
        loader: F,
        ttl: Duration,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<T>> + Send,
    {
        if let Some(value) = self.read(key).await? {
            return Ok(value);
        }

        match self.store.filter_contains(filter, key).await? {
            None => debug!("Filter {} does not exist, loading {} unguarded", filter, key),
            Some(false) => {
                debug!("Filter {} rules out {}", filter, key);
                return Err(CacheError::DefinitelyAbsent(key.to_string()));
            }
            Some(true) => {}
        }

        self.get_with_protection(key, loader, ttl).await
    }

    /// Registers keys as existing in `filter`.
    pub async fn add_to_filter(&self, filter: &str, keys: &[String]) -> Result<()> {
        self.store.filter_add(filter, keys).await
    }
}
