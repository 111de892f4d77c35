use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed per-entry overhead counted on top of key and value bytes (the version).
pub const ENTRY_OVERHEAD: usize = 4;

/// Opaque payload; never interpreted by the cache.
pub type Value = Vec<u8>;

/// A key paired with its version. Two versions of the same key are distinct entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key {
    pub key: String,
    pub version: u32,
}

impl Key {
    pub fn new(key: impl Into<String>, version: u32) -> Self {
        Self {
            key: key.into(),
            version,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.key, self.version)
    }
}

/// A key, its version and its value, as carried by bulk copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValuePair {
    pub key: String,
    pub version: u32,
    pub value: Value,
}

impl KeyValuePair {
    pub fn new(key: Key, value: Value) -> Self {
        Self {
            key: key.key,
            version: key.version,
            value,
        }
    }

    pub fn into_parts(self) -> (Key, Value) {
        (Key::new(self.key, self.version), self.value)
    }
}

/// Estimated footprint of one entry, used for memory-based eviction.
pub fn entry_size(key: &Key, value: &[u8]) -> usize {
    key.key.len() + ENTRY_OVERHEAD + value.len()
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheInfo {
    pub total_keys: usize,
    pub kv_bytes: usize,
}

impl CacheInfo {
    pub fn merge(self, other: CacheInfo) -> CacheInfo {
        CacheInfo {
            total_keys: self.total_keys + other.total_keys,
            kv_bytes: self.kv_bytes + other.kv_bytes,
        }
    }
}

/// Process-level memory usage in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryUsageInfo {
    pub allocated: u64,
    pub max: u64,
    pub utilization: f64,
}
