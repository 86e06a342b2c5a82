//! Cache Store Contract
//!
//! The async traits every backend implements. [`CacheStore`] is the plain
//! key/value contract; [`CoordinationStore`] adds the primitives the
//! protection protocols need (advisory locks, pipelined existence checks and
//! membership filters).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

// == Cache Store ==
/// Byte-oriented key/value cache scoped to one instance's namespace.
///
/// A `ttl` of [`Duration::ZERO`] means "use the instance default expiration".
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the stored bytes or [`CacheError::NotFound`](crate::CacheError::NotFound).
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    /// Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Removes every key of this instance and nothing else.
    async fn clear(&self) -> Result<()>;

    /// Returns only the requested keys that are present.
    async fn get_multi(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>>;

    async fn set_multi(&self, items: HashMap<String, Vec<u8>>, ttl: Duration) -> Result<()>;

    async fn delete_multi(&self, keys: &[String]) -> Result<()>;

    /// Adds `delta` to an integer value, starting from zero when absent.
    async fn incr(&self, key: &str, delta: i64) -> Result<i64>;

    async fn decr(&self, key: &str, delta: i64) -> Result<i64>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Resets the TTL of an existing key.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Remaining TTL; zero for a key without expiration.
    async fn ttl(&self, key: &str) -> Result<Duration>;

    /// Releases backend resources. Later calls fail with `AlreadyClosed`.
    async fn close(&self) -> Result<()>;
}

// == Coordination Store ==
#[async_trait]
pub trait CoordinationStore: CacheStore {
    /// Creates `key` holding `token` only if it does not exist yet.
    async fn try_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool>;

    /// Deletes `key` only while it still holds `token`.
    async fn unlock(&self, key: &str, token: &str) -> Result<bool>;

    /// Existence of every key, in request order.
    async fn exists_multi(&self, keys: &[String]) -> Result<Vec<bool>>;

    async fn filter_add(&self, filter: &str, members: &[String]) -> Result<()>;

    /// `None` when the filter itself does not exist.
    async fn filter_contains(&self, filter: &str, member: &str) -> Result<Option<bool>>;
}
