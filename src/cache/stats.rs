//! Cache Statistics Module
//!
//! Counters kept by the in-process backend. The networked backend leaves
//! bookkeeping to the server.

use serde::Serialize;

/// Why the backend dropped entries on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// TTL elapsed (lazy check or sweep)
    Expired,
    /// Pushed out by the capacity cap
    Evicted,
}

// == Cache Stats ==
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    /// Live entries when the snapshot was taken
    pub total_entries: usize,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fraction of reads that found a live entry; 0.0 before any read.
    pub fn hit_rate(&self) -> f64 {
        match self.hits + self.misses {
            0 => 0.0,
            reads => self.hits as f64 / reads as f64,
        }
    }

    pub fn record_read(&mut self, hit: bool) {
        if hit {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
    }

    pub fn record_removal(&mut self, reason: Removal, count: usize) {
        let counter = match reason {
            Removal::Expired => &mut self.expirations,
            Removal::Evicted => &mut self.evictions,
        };
        *counter += count as u64;
    }

    pub fn set_total_entries(&mut self, count: usize) {
        self.total_entries = count;
    }

    /// Compact JSON snapshot, used for the shutdown log line.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
