//! Stampede-Protected Read
//!
//! On a miss, concurrent callers race for an advisory lock; the winner runs
//! the loader and fills the cache while everyone else polls until the value
//! appears. Waiting is bounded by `max_attempts` and the optional deadline,
//! and the sleep between attempts is an `.await` point, so dropping the
//! returned future cancels the wait.

use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{lock_key, ProtectedCache};
use crate::cache::CoordinationStore;
use crate::codec::Codec;
use crate::error::{CacheError, Result};

/// Outcome of waiting for the advisory lock.
enum Acquisition<T> {
    /// Another caller filled the cache while we waited
    Hit(T),
    /// We hold the lock under this token
    Locked(String),
}

impl<S: CoordinationStore + ?Sized, C: Codec> ProtectedCache<S, C> {
    // == Get With Protection ==
    /// Cache-aside read that lets at most one caller per lock window run
    /// `loader` for a cold key.
    ///
    /// Loader failures are returned as [`CacheError::Loader`] and nothing is
    /// cached. Waiting longer than the retry budget yields
    /// [`CacheError::Timeout`].
    pub async fn get_with_protection<T, F, Fut>(&self, key: &str, loader: F, ttl: Duration) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<T>> + Send,
    {
        let lock_key = lock_key(key);
        let token = match self.acquire(key, &lock_key).await? {
            Acquisition::Hit(value) => return Ok(value),
            Acquisition::Locked(token) => token,
        };

        let outcome = self.fill(key, loader, ttl).await;
        self.release(&lock_key, &token).await;
        outcome
    }

    /// Polls the cache and the lock until either yields.
    async fn acquire<T: DeserializeOwned>(&self, key: &str, lock_key: &str) -> Result<Acquisition<T>> {
        let started = Instant::now();
        let max_attempts = self.options.max_attempts.max(1);
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            if let Some(value) = self.read(key).await? {
                return Ok(Acquisition::Hit(value));
            }

            let token = Uuid::new_v4().to_string();
            if self
                .store
                .try_lock(lock_key, &token, self.options.lock_ttl)
                .await?
            {
                debug!("Acquired {} after {} attempt(s)", lock_key, attempts);
                return Ok(Acquisition::Locked(token));
            }

            let elapsed = started.elapsed();
            let remaining = self
                .options
                .deadline
                .map(|deadline| deadline.saturating_sub(elapsed));
            if attempts >= max_attempts || remaining.is_some_and(|left| left.is_zero()) {
                warn!(
                    "Gave up waiting for loader of {} after {} attempts",
                    key, attempts
                );
                return Err(CacheError::Timeout {
                    key: key.to_string(),
                    attempts,
                    elapsed,
                });
            }

            debug!("Loader for {} is busy, retrying (attempt {})", key, attempts);
            let pause = remaining.map_or(self.options.retry_interval, |left| {
                left.min(self.options.retry_interval)
            });
            tokio::time::sleep(pause).await;
        }
    }

    /// Runs the loader under the lock, re-checking the cache first.
    async fn fill<T, F, Fut>(&self, key: &str, loader: F, ttl: Duration) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<T>> + Send,
    {
        // The previous holder may have finished between our miss and our lock.
        if let Some(value) = self.read(key).await? {
            debug!("Double-check hit for {}", key);
            return Ok(value);
        }

        let value = loader().await.map_err(CacheError::Loader)?;
        let bytes = self.codec.encode(&value)?;
        self.store.set(key, bytes, ttl).await?;
        debug!("Loaded and cached {}", key);
        Ok(value)
    }

    /// Token-checked release. A `false` reply means the lock expired and may
    /// now belong to someone else, so it is left alone.
    async fn release(&self, lock_key: &str, token: &str) {
        match self.store.unlock(lock_key, token).await {
            Ok(true) => debug!("Released {}", lock_key),
            Ok(false) => warn!(
                "{} expired before release; the loader outlived the lock TTL",
                lock_key
            ),
            Err(err) => warn!("Failed to release {}: {}", lock_key, err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::cache::{CacheOptions, CacheStore, MemoryCache};
    use crate::protection::ProtectionOptions;

    fn protected() -> ProtectedCache<MemoryCache> {
        ProtectedCache::new(Arc::new(MemoryCache::new(CacheOptions::default())))
    }

    #[tokio::test]
    async fn test_hit_skips_loader() {
        let cache = protected();
        cache.set("k", &"cached".to_string(), Duration::ZERO).await.unwrap();

        let value: String = cache
            .get_with_protection("k", || async { Err(anyhow::anyhow!("must not run")) }, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(value, "cached");
    }

    #[tokio::test]
    async fn test_miss_loads_caches_and_releases_lock() {
        let cache = protected();

        let value: u64 = cache
            .get_with_protection("k", || async { Ok(7) }, Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(cache.get::<u64>("k").await.unwrap(), 7);
        assert!(!cache.store().exists("lock:k").await.unwrap());
    }

    #[tokio::test]
    async fn test_loader_error_is_not_cached() {
        let cache = protected();

        let result: Result<u64> = cache
            .get_with_protection("k", || async { Err(anyhow::anyhow!("db down")) }, Duration::ZERO)
            .await;

        assert!(matches!(result, Err(CacheError::Loader(_))));
        assert!(!cache.store().exists("k").await.unwrap());
        assert!(!cache.store().exists("lock:k").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_callers_load_once() {
        let cache = Arc::new(protected().with_options(ProtectionOptions {
            retry_interval: Duration::from_millis(5),
            ..ProtectionOptions::default()
        }));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..50 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_with_protection(
                        "cold",
                        || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok("fresh".to_string())
                        },
                        Duration::from_secs(60),
                    )
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "fresh");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_capacity_pressure_does_not_break_the_load_bound() {
        let store = Arc::new(MemoryCache::new(
            CacheOptions::default().with_max_entries(2),
        ));
        let cache = Arc::new(ProtectedCache::new(store.clone()).with_options(ProtectionOptions {
            retry_interval: Duration::from_millis(5),
            ..ProtectionOptions::default()
        }));
        let calls = Arc::new(AtomicUsize::new(0));

        // Ordinary writes keep the cache at capacity while the loader runs
        let writer = tokio::spawn(async move {
            for i in 0..12 {
                store
                    .set(&format!("other:{}", i), b"x".to_vec(), Duration::ZERO)
                    .await
                    .unwrap();
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        let mut handles = Vec::new();
        for _ in 0..50 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_with_protection(
                        "cold",
                        || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            Ok(1u8)
                        },
                        Duration::from_secs(60),
                    )
                    .await
            }));
        }

        writer.await.unwrap();
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 1);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_contention_times_out_after_max_attempts() {
        let cache = protected().with_options(ProtectionOptions {
            retry_interval: Duration::from_millis(1),
            max_attempts: 3,
            ..ProtectionOptions::default()
        });
        // A foreign holder that never finishes
        cache
            .store()
            .try_lock("lock:k", "someone-else", Duration::from_secs(60))
            .await
            .unwrap();

        let result: Result<u64> = cache
            .get_with_protection("k", || async { Ok(1) }, Duration::ZERO)
            .await;

        match result {
            Err(CacheError::Timeout { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected timeout, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_contention_respects_deadline() {
        let cache = protected().with_options(ProtectionOptions {
            retry_interval: Duration::from_millis(10),
            max_attempts: u32::MAX,
            deadline: Some(Duration::from_millis(50)),
            ..ProtectionOptions::default()
        });
        cache
            .store()
            .try_lock("lock:k", "someone-else", Duration::from_secs(60))
            .await
            .unwrap();

        let started = std::time::Instant::now();
        let result: Result<u64> = cache
            .get_with_protection("k", || async { Ok(1) }, Duration::ZERO)
            .await;

        assert!(matches!(result, Err(CacheError::Timeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_expired_foreign_lock_is_taken_over() {
        let cache = protected().with_options(ProtectionOptions {
            retry_interval: Duration::from_millis(10),
            ..ProtectionOptions::default()
        });
        cache
            .store()
            .try_lock("lock:k", "crashed-holder", Duration::from_millis(30))
            .await
            .unwrap();

        let value: u64 = cache
            .get_with_protection("k", || async { Ok(5) }, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(value, 5);
    }

    #[tokio::test]
    async fn test_slow_loader_does_not_release_new_holders_lock() {
        let cache = protected().with_options(ProtectionOptions {
            lock_ttl: Duration::from_millis(20),
            ..ProtectionOptions::default()
        });
        let store = cache.store().clone();

        let value: u64 = cache
            .get_with_protection(
                "k",
                || async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    // our lock has expired; someone else takes it
                    assert!(store
                        .try_lock("lock:k", "new-holder", Duration::from_secs(60))
                        .await
                        .unwrap());
                    Ok(9)
                },
                Duration::ZERO,
            )
            .await
            .unwrap();

        assert_eq!(value, 9);
        assert!(cache.store().exists("lock:k").await.unwrap());
        assert!(cache.store().unlock("lock:k", "new-holder").await.unwrap());
    }

    #[tokio::test]
    async fn test_dropping_the_future_cancels_the_wait() {
        let cache = protected().with_options(ProtectionOptions {
            retry_interval: Duration::from_millis(10),
            max_attempts: u32::MAX,
            ..ProtectionOptions::default()
        });
        cache
            .store()
            .try_lock("lock:k", "someone-else", Duration::from_secs(60))
            .await
            .unwrap();

        let waiting = cache.get_with_protection::<u64, _, _>("k", || async { Ok(1) }, Duration::ZERO);
        let result = tokio::time::timeout(Duration::from_millis(50), waiting).await;
        assert!(result.is_err(), "wait should still be pending when cancelled");
    }
}
