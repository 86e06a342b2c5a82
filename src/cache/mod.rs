//! Cache Module
//!
//! The byte-oriented cache contract and its two backends: an in-process
//! store with TTL sweep and LRU soft cap, and a Redis-backed networked store.

mod entry;
mod lru;
pub(crate) mod memory;
mod options;
mod redis;
mod stats;
mod store;

#[cfg(test)]
mod property_tests;

use crate::error::{CacheError, Result};

// Re-export public types
pub use entry::CacheEntry;
pub use lru::LruTracker;
pub use memory::MemoryCache;
pub use options::{CacheOptions, EvictionCallback};
pub use self::redis::{RedisCache, CLEAR_BATCH_SIZE};
pub use stats::{CacheStats, Removal};
pub use store::{CacheStore, CoordinationStore};

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 256;

/// Maximum allowed value size in bytes
pub const MAX_VALUE_SIZE: usize = 1024 * 1024; // 1 MB

// == Validation ==
/// Rejects keys the in-process backend cannot store.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CacheError::InvalidRequest("Key cannot be empty".to_string()));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(CacheError::InvalidRequest(format!(
            "Key exceeds maximum length of {} bytes",
            MAX_KEY_LENGTH
        )));
    }
    Ok(())
}

pub fn validate_value(value: &[u8]) -> Result<()> {
    if value.len() > MAX_VALUE_SIZE {
        return Err(CacheError::InvalidRequest(format!(
            "Value exceeds maximum size of {} bytes",
            MAX_VALUE_SIZE
        )));
    }
    Ok(())
}
