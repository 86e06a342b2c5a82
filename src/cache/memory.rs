//! In-Process Backend
//!
//! Single-node cache: a `HashMap` of expiring entries behind one coarse
//! `RwLock`, LRU tracking for the soft capacity cap, and a background sweep
//! that removes expired entries. Reads also check expiry lazily, so an entry
//! past its deadline is never returned even if the sweep has not run yet.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::{
    validate_key, validate_value, CacheEntry, CacheOptions, CacheStats, CacheStore,
    CoordinationStore, LruTracker, Removal,
};
use crate::error::{CacheError, Result};
use crate::tasks::spawn_sweep_task;

/// An entry removed by the backend, handed to the eviction callback.
type Dropped = (String, Vec<u8>);

// == Memory State ==
/// Everything guarded by the coarse lock.
#[derive(Debug, Default)]
struct MemoryState {
    entries: HashMap<String, CacheEntry>,
    lru: LruTracker,
    stats: CacheStats,
    filters: HashMap<String, HashSet<String>>,
    /// Advisory locks: token plus deadline. Kept apart from `entries` so
    /// they never count toward capacity, get evicted or reach `on_evicted`.
    locks: HashMap<String, CacheEntry>,
    max_entries: usize,
}

impl MemoryState {
    fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            ..Self::default()
        }
    }

    /// Removes `key` if its deadline has passed.
    fn purge_if_expired(&mut self, key: &str, now: Instant, dropped: &mut Vec<Dropped>) {
        let expired = self
            .entries
            .get(key)
            .is_some_and(|entry| entry.is_expired_at(now));
        if expired {
            if let Some(entry) = self.entries.remove(key) {
                self.lru.remove(key);
                self.stats.record_removal(Removal::Expired, 1);
                self.stats.set_total_entries(self.entries.len());
                dropped.push((key.to_string(), entry.value));
            }
        }
    }

    /// True while `key` holds an unexpired lock; drops an expired one.
    fn lock_held(&mut self, key: &str, now: Instant) -> bool {
        match self.locks.get(key) {
            Some(lock) if lock.is_expired_at(now) => {
                self.locks.remove(key);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Live entry or live lock under `key`.
    fn contains(&mut self, key: &str, now: Instant, dropped: &mut Vec<Dropped>) -> bool {
        self.purge_if_expired(key, now, dropped);
        self.entries.contains_key(key) || self.lock_held(key, now)
    }

    // == Insert ==
    /// Stores an entry, evicting least recently used keys when a new key
    /// would exceed the capacity cap.
    fn insert(&mut self, key: String, entry: CacheEntry, dropped: &mut Vec<Dropped>) {
        if self.max_entries > 0 && !self.entries.contains_key(&key) {
            while self.entries.len() >= self.max_entries {
                let Some(oldest) = self.lru.evict_oldest() else {
                    break;
                };
                if let Some(evicted) = self.entries.remove(&oldest) {
                    self.stats.record_removal(Removal::Evicted, 1);
                    dropped.push((oldest, evicted.value));
                }
            }
        }

        self.lru.touch(&key);
        self.entries.insert(key, entry);
        self.stats.set_total_entries(self.entries.len());
    }

    fn remove(&mut self, key: &str, dropped: &mut Vec<Dropped>) {
        self.locks.remove(key);
        if let Some(entry) = self.entries.remove(key) {
            self.lru.remove(key);
            self.stats.set_total_entries(self.entries.len());
            dropped.push((key.to_string(), entry.value));
        }
    }

    fn lookup(&mut self, key: &str, now: Instant, dropped: &mut Vec<Dropped>) -> Option<Vec<u8>> {
        self.purge_if_expired(key, now, dropped);
        let value = self.entries.get(key).map(|entry| entry.value.clone());
        self.stats.record_read(value.is_some());
        if value.is_some() {
            self.lru.touch(key);
        }
        value
    }

    fn incr(&mut self, key: &str, delta: i64, dropped: &mut Vec<Dropped>) -> Result<i64> {
        self.purge_if_expired(key, Instant::now(), dropped);

        let current = match self.entries.get(key) {
            Some(entry) => entry.as_integer().ok_or_else(|| {
                CacheError::TypeError(format!("value at '{}' is not an integer", key))
            })?,
            None => 0,
        };
        let next = current.checked_add(delta).ok_or_else(|| {
            CacheError::TypeError(format!("increment of '{}' would overflow", key))
        })?;
        let bytes = next.to_string().into_bytes();

        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.value = bytes;
                self.lru.touch(key);
            }
            None => {
                validate_key(key)?;
                self.insert(key.to_string(), CacheEntry::new(bytes, None), dropped);
            }
        }
        Ok(next)
    }

    // == Sweep ==
    /// Removes every expired entry. Returns how many were removed.
    fn sweep(&mut self, now: Instant, dropped: &mut Vec<Dropped>) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            if let Some(entry) = self.entries.remove(key) {
                self.lru.remove(key);
                dropped.push((key.clone(), entry.value));
            }
        }

        self.locks.retain(|_, lock| !lock.is_expired_at(now));

        self.stats.record_removal(Removal::Expired, expired.len());
        self.stats.set_total_entries(self.entries.len());
        expired.len()
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.lru.clear();
        self.filters.clear();
        self.locks.clear();
        self.stats.set_total_entries(0);
    }
}

// == Shared Inner ==
/// State shared between the cache handle and its sweep task.
pub(crate) struct MemoryInner {
    state: RwLock<MemoryState>,
    options: CacheOptions,
    closed: AtomicBool,
}

impl MemoryInner {
    fn notify(&self, dropped: Vec<Dropped>) {
        if let Some(callback) = &self.options.on_evicted {
            for (key, value) in dropped {
                callback(&key, &value);
            }
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Runs one expiry sweep and fires eviction callbacks outside the lock.
    pub(crate) async fn sweep_expired(&self) -> usize {
        let mut dropped = Vec::new();
        let removed = self.state.write().await.sweep(Instant::now(), &mut dropped);
        self.notify(dropped);
        removed
    }
}

// == Memory Cache ==
/// In-process [`CacheStore`] implementation.
pub struct MemoryCache {
    inner: Arc<MemoryInner>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryCache {
    // == Constructor ==
    /// Creates the cache and, when called inside a Tokio runtime, starts its
    /// background sweep. Outside a runtime expiry is still enforced lazily on
    /// every read.
    pub fn new(options: CacheOptions) -> Self {
        let sweep_interval = options.sweep_interval;
        let inner = Arc::new(MemoryInner {
            state: RwLock::new(MemoryState::new(options.max_entries)),
            options,
            closed: AtomicBool::new(false),
        });

        let sweeper = if sweep_interval.is_zero() {
            None
        } else if tokio::runtime::Handle::try_current().is_ok() {
            Some(spawn_sweep_task(Arc::downgrade(&inner), sweep_interval))
        } else {
            warn!("No Tokio runtime available, in-process cache will expire entries lazily only");
            None
        };

        Self {
            inner,
            sweeper: Mutex::new(sweeper),
        }
    }

    pub fn options(&self) -> &CacheOptions {
        &self.inner.options
    }

    // == Stats ==
    pub async fn stats(&self) -> CacheStats {
        let state = self.inner.state.read().await;
        let mut stats = state.stats.clone();
        stats.set_total_entries(state.entries.len());
        stats
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub async fn len(&self) -> usize {
        self.inner.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Runs an expiry sweep immediately.
    pub async fn sweep_expired(&self) -> usize {
        self.inner.sweep_expired().await
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.is_closed() {
            Err(CacheError::AlreadyClosed)
        } else {
            Ok(())
        }
    }

    fn stop_sweeper(&self) {
        let handle = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl Drop for MemoryCache {
    fn drop(&mut self) {
        self.stop_sweeper();
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let mut dropped = Vec::new();
        let value = self
            .inner
            .state
            .write()
            .await
            .lookup(key, Instant::now(), &mut dropped);
        self.inner.notify(dropped);
        value.ok_or_else(|| CacheError::NotFound(key.to_string()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        self.ensure_open()?;
        validate_key(key)?;
        validate_value(&value)?;

        let entry = CacheEntry::new(value, self.inner.options.effective_ttl(ttl));
        let mut dropped = Vec::new();
        self.inner
            .state
            .write()
            .await
            .insert(key.to_string(), entry, &mut dropped);
        self.inner.notify(dropped);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.ensure_open()?;
        let mut dropped = Vec::new();
        self.inner.state.write().await.remove(key, &mut dropped);
        self.inner.notify(dropped);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.ensure_open()?;
        self.inner.state.write().await.clear();
        debug!("In-process cache cleared");
        Ok(())
    }

    async fn get_multi(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        self.ensure_open()?;
        let now = Instant::now();
        let mut dropped = Vec::new();
        let mut found = HashMap::with_capacity(keys.len());
        {
            let mut state = self.inner.state.write().await;
            for key in keys {
                if let Some(value) = state.lookup(key, now, &mut dropped) {
                    found.insert(key.clone(), value);
                }
            }
        }
        self.inner.notify(dropped);
        Ok(found)
    }

    async fn set_multi(&self, items: HashMap<String, Vec<u8>>, ttl: Duration) -> Result<()> {
        self.ensure_open()?;
        for (key, value) in &items {
            validate_key(key)?;
            validate_value(value)?;
        }

        let ttl = self.inner.options.effective_ttl(ttl);
        let mut dropped = Vec::new();
        {
            let mut state = self.inner.state.write().await;
            for (key, value) in items {
                state.insert(key, CacheEntry::new(value, ttl), &mut dropped);
            }
        }
        self.inner.notify(dropped);
        Ok(())
    }

    async fn delete_multi(&self, keys: &[String]) -> Result<()> {
        self.ensure_open()?;
        let mut dropped = Vec::new();
        {
            let mut state = self.inner.state.write().await;
            for key in keys {
                state.remove(key, &mut dropped);
            }
        }
        self.inner.notify(dropped);
        Ok(())
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64> {
        self.ensure_open()?;
        let mut dropped = Vec::new();
        let result = self.inner.state.write().await.incr(key, delta, &mut dropped);
        self.inner.notify(dropped);
        result
    }

    async fn decr(&self, key: &str, delta: i64) -> Result<i64> {
        let delta = delta.checked_neg().ok_or_else(|| {
            CacheError::TypeError(format!("decrement of '{}' would overflow", key))
        })?;
        self.incr(key, delta).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.ensure_open()?;
        let mut dropped = Vec::new();
        let present = self
            .inner
            .state
            .write()
            .await
            .contains(key, Instant::now(), &mut dropped);
        self.inner.notify(dropped);
        Ok(present)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.ensure_open()?;
        let ttl = self.inner.options.effective_ttl(ttl);
        let mut dropped = Vec::new();
        let result = {
            let mut state = self.inner.state.write().await;
            state.purge_if_expired(key, Instant::now(), &mut dropped);
            match state.entries.get_mut(key) {
                Some(entry) => {
                    entry.reset_ttl(ttl);
                    Ok(())
                }
                None => Err(CacheError::NotFound(key.to_string())),
            }
        };
        self.inner.notify(dropped);
        result
    }

    async fn ttl(&self, key: &str) -> Result<Duration> {
        self.ensure_open()?;
        let mut dropped = Vec::new();
        let result = {
            let mut state = self.inner.state.write().await;
            state.purge_if_expired(key, Instant::now(), &mut dropped);
            state
                .entries
                .get(key)
                .map(|entry| entry.ttl_remaining().unwrap_or(Duration::ZERO))
                .ok_or_else(|| CacheError::NotFound(key.to_string()))
        };
        self.inner.notify(dropped);
        result
    }

    async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Err(CacheError::AlreadyClosed);
        }
        self.stop_sweeper();
        let stats = {
            let mut state = self.inner.state.write().await;
            let mut stats = state.stats.clone();
            stats.set_total_entries(state.entries.len());
            state.clear();
            stats
        };
        match stats.to_json() {
            Ok(json) => debug!(stats = %json, "In-process cache closed"),
            Err(err) => warn!("In-process cache closed; stats not serializable: {}", err),
        }
        Ok(())
    }
}

#[async_trait]
impl CoordinationStore for MemoryCache {
    // == Advisory Locks ==
    async fn try_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        self.ensure_open()?;
        validate_key(key)?;
        let mut dropped = Vec::new();
        let acquired = {
            let mut state = self.inner.state.write().await;
            if state.contains(key, Instant::now(), &mut dropped) {
                false
            } else {
                let ttl = (!ttl.is_zero()).then_some(ttl);
                let lock = CacheEntry::new(token.as_bytes().to_vec(), ttl);
                state.locks.insert(key.to_string(), lock);
                true
            }
        };
        self.inner.notify(dropped);
        Ok(acquired)
    }

    async fn unlock(&self, key: &str, token: &str) -> Result<bool> {
        self.ensure_open()?;
        let mut state = self.inner.state.write().await;
        let held = state.lock_held(key, Instant::now())
            && state
                .locks
                .get(key)
                .is_some_and(|lock| lock.value == token.as_bytes());
        if held {
            state.locks.remove(key);
        }
        Ok(held)
    }

    async fn exists_multi(&self, keys: &[String]) -> Result<Vec<bool>> {
        self.ensure_open()?;
        let now = Instant::now();
        let mut dropped = Vec::new();
        let present: Vec<bool> = {
            let mut state = self.inner.state.write().await;
            keys.iter()
                .map(|key| state.contains(key, now, &mut dropped))
                .collect()
        };
        self.inner.notify(dropped);
        Ok(present)
    }

    async fn filter_add(&self, filter: &str, members: &[String]) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.inner.state.write().await;
        state
            .filters
            .entry(filter.to_string())
            .or_default()
            .extend(members.iter().cloned());
        Ok(())
    }

    async fn filter_contains(&self, filter: &str, member: &str) -> Result<Option<bool>> {
        self.ensure_open()?;
        let state = self.inner.state.read().await;
        Ok(state.filters.get(filter).map(|set| set.contains(member)))
    }
}
