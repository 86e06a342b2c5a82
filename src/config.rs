//! Configuration Module
//!
//! Loads process-level settings from environment variables and turns them
//! into per-instance cache and protection options.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::CacheOptions;
use crate::protection::ProtectionOptions;

/// Process configuration.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Redis URL; the networked cache is only created when set
    pub redis_url: Option<String>,
    /// Soft cap on in-process entries
    pub max_entries: usize,
    /// Default TTL in seconds for entries written without one
    pub default_ttl: u64,
    /// In-process expiry sweep interval in seconds
    pub cleanup_interval: u64,
    /// Namespace for keys on the networked backend
    pub key_prefix: String,
    /// Advisory lock TTL in milliseconds
    pub lock_ttl_ms: u64,
    /// Pause between lock attempts in milliseconds
    pub retry_interval_ms: u64,
    /// Lock attempts before a protected read times out
    pub max_lock_attempts: u32,
    /// Concurrent loaders during warm-up
    pub warm_up_workers: usize,
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `REDIS_URL` - Redis URL (default: unset)
    /// - `MAX_ENTRIES` - Maximum in-process entries (default: 1000)
    /// - `DEFAULT_TTL` - Default TTL in seconds (default: 300)
    /// - `CLEANUP_INTERVAL` - Sweep frequency in seconds (default: 1)
    /// - `KEY_PREFIX` - Redis key namespace (default: `cache:`)
    /// - `LOCK_TTL_MS` - Loader lock TTL (default: 5000)
    /// - `RETRY_INTERVAL_MS` - Lock retry pause (default: 50)
    /// - `MAX_LOCK_ATTEMPTS` - Lock attempts before timing out (default: 100)
    /// - `WARM_UP_WORKERS` - Warm-up concurrency (default: 10)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.is_empty()),
            max_entries: env_or("MAX_ENTRIES", defaults.max_entries),
            default_ttl: env_or("DEFAULT_TTL", defaults.default_ttl),
            cleanup_interval: env_or("CLEANUP_INTERVAL", defaults.cleanup_interval),
            key_prefix: env::var("KEY_PREFIX").unwrap_or(defaults.key_prefix),
            lock_ttl_ms: env_or("LOCK_TTL_MS", defaults.lock_ttl_ms),
            retry_interval_ms: env_or("RETRY_INTERVAL_MS", defaults.retry_interval_ms),
            max_lock_attempts: env_or("MAX_LOCK_ATTEMPTS", defaults.max_lock_attempts),
            warm_up_workers: env_or("WARM_UP_WORKERS", defaults.warm_up_workers),
        }
    }

    /// Options for a cache instance built from this configuration.
    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions::default()
            .with_max_entries(self.max_entries)
            .with_default_expiration(Duration::from_secs(self.default_ttl))
            .with_sweep_interval(Duration::from_secs(self.cleanup_interval))
            .with_key_prefix(self.key_prefix.clone())
    }

    pub fn protection_options(&self) -> ProtectionOptions {
        ProtectionOptions {
            lock_ttl: Duration::from_millis(self.lock_ttl_ms),
            retry_interval: Duration::from_millis(self.retry_interval_ms),
            max_attempts: self.max_lock_attempts,
            deadline: None,
            warm_up_workers: self.warm_up_workers,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_url: None,
            max_entries: 1000,
            default_ttl: 300,
            cleanup_interval: 1,
            key_prefix: "cache:".to_string(),
            lock_ttl_ms: 5000,
            retry_interval_ms: 50,
            max_lock_attempts: 100,
            warm_up_workers: 10,
        }
    }
}
