use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Stored value in the keyspace with its absolute expiry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Raw byte data
    pub value: Bytes,
    /// Absolute expiry in milliseconds since the epoch
    pub expiry_ms: Option<i64>,
}

impl Entry {
    /// Create a new entry. An expiry of zero means no TTL.
    pub fn new(value: Bytes, expiry_ms: Option<i64>) -> Self {
        Self {
            value,
            expiry_ms: expiry_ms.filter(|&at| at != 0),
        }
    }

    /// Check whether the entry has expired at `now`
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expiry_ms.is_some_and(|at| now >= at)
    }

    /// Check whether the entry has expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_ms())
    }
}

/// Configuration for the keyspace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyspaceConfig {
    /// Background sweep interval in milliseconds, 0 disables the sweep.
    /// Expired entries are always removed lazily on access.
    pub ttl_cleanup_interval_ms: u64,
}

impl Default for KeyspaceConfig {
    fn default() -> Self {
        Self {
            ttl_cleanup_interval_ms: 0,
        }
    }
}

/// Statistics for the keyspace
#[derive(Debug, Default, Clone, Serialize)]
pub struct KeyspaceStats {
    /// Number of GET operations
    pub gets: u64,
    /// Number of SET operations
    pub sets: u64,
    /// Number of keys removed by DEL
    pub dels: u64,
    /// Number of GET hits
    pub hits: u64,
    /// Number of GET misses
    pub misses: u64,
    /// Number of entries removed because they expired
    pub expired: u64,
}

impl KeyspaceStats {
    /// Calculate hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
