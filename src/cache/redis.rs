//! Networked Backend
//!
//! Redis-backed cache. Every key is namespaced with the instance's
//! `key_prefix`, so several logical caches can share one Redis database.
//! Batch operations are a single pipelined round trip and `clear` walks the
//! namespace with `SCAN` instead of flushing the whole keyspace.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, Script};
use tracing::{debug, info, warn};

use crate::cache::{CacheOptions, CacheStore, CoordinationStore};
use crate::error::{CacheError, Result};

// == Constants ==
/// Maximum keys removed by one `DEL` during `clear`
pub const CLEAR_BATCH_SIZE: usize = 500;

/// `COUNT` hint passed to each `SCAN` step
const SCAN_COUNT: usize = 1000;

/// Deletes KEYS[1] only while it still holds ARGV[1].
const UNLOCK_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

// == Redis Cache ==
/// Networked [`CacheStore`] implementation.
pub struct RedisCache {
    conn: Mutex<Option<ConnectionManager>>,
    options: CacheOptions,
    unlock_script: Script,
}

impl RedisCache {
    // == Constructor ==
    /// Connects to `url` (e.g. `redis://127.0.0.1:6379/0`).
    pub async fn connect(url: &str, options: CacheOptions) -> Result<Self> {
        let client = Client::open(url).map_err(|e| CacheError::backend("open client", e))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::backend("connect", e))?;

        info!(
            "Networked cache connected with key prefix '{}'",
            options.key_prefix
        );
        Ok(Self::from_manager(manager, options))
    }

    /// Wraps an existing connection manager.
    pub fn from_manager(manager: ConnectionManager, options: CacheOptions) -> Self {
        Self {
            conn: Mutex::new(Some(manager)),
            options,
            unlock_script: Script::new(UNLOCK_SCRIPT),
        }
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    fn conn(&self) -> Result<ConnectionManager> {
        self.conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(CacheError::AlreadyClosed)
    }

    fn key(&self, key: &str) -> String {
        namespaced(&self.options.key_prefix, key)
    }

    fn keys(&self, keys: &[String]) -> Vec<String> {
        keys.iter().map(|key| self.key(key)).collect()
    }
}

// == Key Helpers ==
fn namespaced(prefix: &str, key: &str) -> String {
    format!("{}{}", prefix, key)
}

/// Builds a `SCAN MATCH` pattern matching exactly the keys under `prefix`.
fn scan_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for ch in prefix.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('*');
    pattern
}

/// Redis millisecond TTL; sub-millisecond durations round up to 1 ms.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Maps the server's integer-conversion failures to `TypeError`.
fn numeric_error(key: &str, context: &str, err: RedisError) -> CacheError {
    let detail = err.to_string();
    if detail.contains("not an integer") || detail.contains("overflow") {
        CacheError::TypeError(format!("value at '{}' is not an integer: {}", key, detail))
    } else {
        CacheError::backend(context, err)
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let mut conn = self.conn()?;
        let value: Option<Vec<u8>> = conn
            .get(self.key(key))
            .await
            .map_err(|e| CacheError::backend("GET", e))?;
        value.ok_or_else(|| CacheError::NotFound(key.to_string()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let mut conn = self.conn()?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.key(key)).arg(value);
        if let Some(ttl) = self.options.effective_ttl(ttl) {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let _: () = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::backend("SET", e))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn()?;
        let _: i64 = conn
            .del(self.key(key))
            .await
            .map_err(|e| CacheError::backend("DEL", e))?;
        Ok(())
    }

    // == Clear ==
    /// Incrementally scans this instance's prefix and deletes matches in
    /// batches of at most [`CLEAR_BATCH_SIZE`].
    async fn clear(&self) -> Result<()> {
        let mut conn = self.conn()?;
        if self.options.key_prefix.is_empty() {
            warn!("Clearing a networked cache without key prefix removes every key in the database");
        }

        let pattern = scan_pattern(&self.options.key_prefix);
        let mut cursor: u64 = 0;
        let mut removed = 0usize;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await
                .map_err(|e| CacheError::backend("SCAN", e))?;

            for batch in keys.chunks(CLEAR_BATCH_SIZE) {
                let _: i64 = conn
                    .del(batch.to_vec())
                    .await
                    .map_err(|e| CacheError::backend("DEL batch", e))?;
                removed += batch.len();
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        debug!(
            "Cleared {} keys under prefix '{}'",
            removed, self.options.key_prefix
        );
        Ok(())
    }

    async fn get_multi(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let mut conn = self.conn()?;

        let mut pipe = redis::pipe();
        for key in keys {
            pipe.get(self.key(key));
        }
        let values: Vec<Option<Vec<u8>>> = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::backend("pipelined GET", e))?;

        Ok(keys
            .iter()
            .zip(values)
            .filter_map(|(key, value)| value.map(|value| (key.clone(), value)))
            .collect())
    }

    async fn set_multi(&self, items: HashMap<String, Vec<u8>>, ttl: Duration) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn()?;
        let ttl = self.options.effective_ttl(ttl);

        let mut pipe = redis::pipe();
        for (key, value) in items {
            let cmd = pipe.cmd("SET").arg(self.key(&key)).arg(value);
            if let Some(ttl) = ttl {
                cmd.arg("PX").arg(ttl_millis(ttl));
            }
            cmd.ignore();
        }
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::backend("pipelined SET", e))?;
        Ok(())
    }

    async fn delete_multi(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn()?;
        let _: i64 = conn
            .del(self.keys(keys))
            .await
            .map_err(|e| CacheError::backend("DEL", e))?;
        Ok(())
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64> {
        let mut conn = self.conn()?;
        conn.incr(self.key(key), delta)
            .await
            .map_err(|e| numeric_error(key, "INCRBY", e))
    }

    async fn decr(&self, key: &str, delta: i64) -> Result<i64> {
        let mut conn = self.conn()?;
        conn.decr(self.key(key), delta)
            .await
            .map_err(|e| numeric_error(key, "DECRBY", e))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn()?;
        conn.exists(self.key(key))
            .await
            .map_err(|e| CacheError::backend("EXISTS", e))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn()?;
        let namespaced = self.key(key);

        let present = match self.options.effective_ttl(ttl) {
            Some(ttl) => {
                let updated: bool = redis::cmd("PEXPIRE")
                    .arg(&namespaced)
                    .arg(ttl_millis(ttl))
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| CacheError::backend("PEXPIRE", e))?;
                updated
            }
            None => {
                let (present, _persisted): (bool, bool) = redis::pipe()
                    .exists(&namespaced)
                    .persist(&namespaced)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| CacheError::backend("PERSIST", e))?;
                present
            }
        };

        if present {
            Ok(())
        } else {
            Err(CacheError::NotFound(key.to_string()))
        }
    }

    async fn ttl(&self, key: &str) -> Result<Duration> {
        let mut conn = self.conn()?;
        let millis: i64 = redis::cmd("PTTL")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::backend("PTTL", e))?;

        match millis {
            -2 => Err(CacheError::NotFound(key.to_string())),
            ms if ms < 0 => Ok(Duration::ZERO),
            ms => Ok(Duration::from_millis(ms as u64)),
        }
    }

    async fn close(&self) -> Result<()> {
        let previous = self
            .conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match previous {
            Some(_) => {
                debug!(
                    "Networked cache with prefix '{}' closed",
                    self.options.key_prefix
                );
                Ok(())
            }
            None => Err(CacheError::AlreadyClosed),
        }
    }
}

#[async_trait]
impl CoordinationStore for RedisCache {
    async fn try_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn()?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.key(key)).arg(token).arg("NX");
        if !ttl.is_zero() {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let reply: Option<String> = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::backend("SET NX", e))?;
        Ok(reply.is_some())
    }

    async fn unlock(&self, key: &str, token: &str) -> Result<bool> {
        let mut conn = self.conn()?;
        let deleted: i64 = self
            .unlock_script
            .key(self.key(key))
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CacheError::backend("unlock script", e))?;
        Ok(deleted == 1)
    }

    async fn exists_multi(&self, keys: &[String]) -> Result<Vec<bool>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn()?;

        let mut pipe = redis::pipe();
        for key in keys {
            pipe.exists(self.key(key));
        }
        pipe.query_async(&mut conn)
            .await
            .map_err(|e| CacheError::backend("pipelined EXISTS", e))
    }

    async fn filter_add(&self, filter: &str, members: &[String]) -> Result<()> {
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn()?;
        let _: i64 = conn
            .sadd(self.key(filter), members.to_vec())
            .await
            .map_err(|e| CacheError::backend("SADD", e))?;
        Ok(())
    }

    async fn filter_contains(&self, filter: &str, member: &str) -> Result<Option<bool>> {
        let mut conn = self.conn()?;
        let namespaced = self.key(filter);
        let (present, member): (bool, bool) = redis::pipe()
            .exists(&namespaced)
            .sismember(&namespaced, member)
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::backend("SISMEMBER", e))?;
        Ok(present.then_some(member))
    }
}
