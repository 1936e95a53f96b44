//! Core type definitions for the cache system

use serde::{Deserialize, Serialize};
use std::fmt;

/// Cache key type - opaque, namespaced string
pub type CacheKey = String;

/// Cache value type - an encoded loader value
pub type CacheValue = String;

/// Compare-and-swap token returned by `gets`/`add`
///
/// A write guarded by a token only succeeds while the slot still carries the
/// same token, i.e. nobody wrote to it in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CasToken(pub u64);

impl fmt::Display for CasToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cas#{}", self.0)
    }
}

/// Statistics for backend traffic and cache effectiveness
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Round trips that read slots (`read`, `gets`, `gets_multi`)
    pub reads: u64,

    /// Round trips that wrote slots (`write`, `add`, `cas`, `delete` and multi variants)
    pub writes: u64,

    /// Slots read that held a value
    pub hits: u64,

    /// Slots read that were absent, locked or deleted
    pub misses: u64,

    /// CAS writes rejected because the slot changed
    pub cas_conflicts: u64,

    /// Number of entries currently stored
    pub entries: usize,

    /// Entries evicted by the size limit
    pub evictions: u64,

    /// Entries dropped because their TTL elapsed
    pub expirations: u64,
}

impl CacheStats {
    /// Calculate cache hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    /// Calculate miss rate as a percentage
    pub fn miss_rate(&self) -> f64 {
        100.0 - self.hit_rate()
    }

    /// Total round trips issued against the backend
    pub fn round_trips(&self) -> u64 {
        self.reads + self.writes
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ reads: {}, writes: {}, hits: {}, misses: {}, hit_rate: {:.2}%, entries: {}, cas_conflicts: {} }}",
            self.reads,
            self.writes,
            self.hits,
            self.misses,
            self.hit_rate(),
            self.entries,
            self.cas_conflicts
        )
    }
}
