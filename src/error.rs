//! Error types for the cache layer
//!
//! Provides unified error handling using thiserror.

use std::time::Duration;

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for every cache backend and protocol.
///
/// A miss is always [`CacheError::NotFound`], never a backend failure, so
/// callers can tell "absent" from "broken" with a single match.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Key (or registry name) not present
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Duplicate registry name
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Operation attempted on a closed instance
    #[error("Cache instance is closed")]
    AlreadyClosed,

    /// Increment or decrement against a non-integer value
    #[error("Type error: {0}")]
    TypeError(String),

    /// Value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Rejected key or value
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Key is known not to exist (membership filter or negative cache entry)
    #[error("Key definitely absent: {0}")]
    DefinitelyAbsent(String),

    /// Lock contention outlasted the retry budget
    #[error("Timed out waiting for loader of {key} after {attempts} attempts ({elapsed:?})")]
    Timeout {
        key: String,
        attempts: u32,
        elapsed: Duration,
    },

    /// Caller-supplied loader failed; nothing was cached
    #[error("Loader failed: {0}")]
    Loader(#[source] anyhow::Error),

    /// Transport or backend failure
    #[error("Backend error during {context}: {source}")]
    Backend {
        context: String,
        #[source]
        source: redis::RedisError,
    },
}

impl CacheError {
    /// Wraps a Redis failure with the operation it happened in.
    pub fn backend(context: impl Into<String>, source: redis::RedisError) -> Self {
        CacheError::Backend {
            context: context.into(),
            source,
        }
    }

    /// True for the expected outcome of a cache miss.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound(_))
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache layer.
pub type Result<T> = std::result::Result<T, CacheError>;
