//! Cache Options Module
//!
//! Per-instance construction options shared by both backends.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Callback fired when the in-process backend drops an entry.
pub type EvictionCallback = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

// == Cache Options ==
/// Options applied when a cache instance is constructed; immutable afterwards.
#[derive(Clone)]
pub struct CacheOptions {
    /// TTL applied when `set` is called with a zero TTL. Zero means "never expires".
    pub default_expiration: Duration,
    /// Soft cap on in-process entries, 0 = unbounded
    pub max_entries: usize,
    /// Invoked with `(key, value)` when the in-process backend drops an entry
    pub on_evicted: Option<EvictionCallback>,
    /// Namespace prepended to every key on the networked backend
    pub key_prefix: String,
    /// Interval of the in-process expiry sweep
    pub sweep_interval: Duration,
}

impl CacheOptions {
    pub fn with_default_expiration(mut self, ttl: Duration) -> Self {
        self.default_expiration = ttl;
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn on_evicted<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &[u8]) + Send + Sync + 'static,
    {
        self.on_evicted = Some(Arc::new(callback));
        self
    }

    // == Effective TTL ==
    /// Resolves a caller TTL: zero falls back to the default expiration.
    ///
    /// Returns `None` when the resolved TTL means "never expires".
    pub fn effective_ttl(&self, ttl: Duration) -> Option<Duration> {
        let ttl = if ttl.is_zero() {
            self.default_expiration
        } else {
            ttl
        };
        (!ttl.is_zero()).then_some(ttl)
    }
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            default_expiration: Duration::from_secs(300),
            max_entries: 0,
            on_evicted: None,
            key_prefix: String::new(),
            sweep_interval: Duration::from_secs(1),
        }
    }
}

impl fmt::Debug for CacheOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheOptions")
            .field("default_expiration", &self.default_expiration)
            .field("max_entries", &self.max_entries)
            .field("on_evicted", &self.on_evicted.is_some())
            .field("key_prefix", &self.key_prefix)
            .field("sweep_interval", &self.sweep_interval)
            .finish()
    }
}
