//! Stampede Cache - A byte cache with stampede-protected loaders
//!
//! One contract, two backends (in-process and Redis), and loader-based read
//! paths on top: lock-guarded cache-aside reads, membership-filter
//! short-circuits, negative caching and bulk warm-up.

pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod protection;
pub mod registry;
mod tasks;

pub use cache::{CacheOptions, CacheStats, CacheStore, CoordinationStore, MemoryCache, RedisCache};
pub use codec::{Codec, JsonCodec};
pub use config::Config;
pub use error::{CacheError, Result};
pub use protection::{ProtectedCache, ProtectionOptions, WarmUpReport};
pub use registry::{BackendKind, CacheRegistry, SharedCache};
