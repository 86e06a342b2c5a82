//! Cache Entry Module
//!
//! Defines the structure for individual in-process entries with TTL support.

use std::time::{Duration, Instant};

// == Cache Entry ==
/// A single in-process entry: opaque bytes plus an optional deadline.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The stored bytes
    pub value: Vec<u8>,
    /// Expiration instant, None = no expiration
    pub expires_at: Option<Instant>,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new entry that expires after `ttl`, or never when `ttl` is None.
    pub fn new(value: Vec<u8>, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired.
    ///
    /// An entry is expired once the current instant is at or past its
    /// deadline, so a fully elapsed TTL is never reported as live.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(expires) => now >= expires,
            None => false,
        }
    }

    // == Time To Live ==
    /// Returns the remaining TTL, or None if no expiration is set.
    ///
    /// An expired entry reports `Some(Duration::ZERO)`.
    pub fn ttl_remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|expires| expires.saturating_duration_since(Instant::now()))
    }

    /// Replaces the deadline, counting from now.
    pub fn reset_ttl(&mut self, ttl: Option<Duration>) {
        self.expires_at = ttl.map(|ttl| Instant::now() + ttl);
    }

    // == Integer View ==
    /// Parses the stored bytes as a base-10 signed integer.
    pub fn as_integer(&self) -> Option<i64> {
        std::str::from_utf8(&self.value).ok()?.trim().parse().ok()
    }
}
