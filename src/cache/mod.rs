//! Local Cache Module
//!
//! Bounded per-node storage for the keys this node owns.
//!
//! ## Core Concepts
//! - **Ceilings**: every store counts toward an entry ceiling and an estimated byte
//!   ceiling (`key + 4 + value` bytes per entry). Either one triggers eviction.
//! - **Strategies**: `LocalStore` is chosen at node construction. `Lru` keeps one strict
//!   recency list; `MultiTable` keeps generations of tables and drops the coldest one
//!   wholesale, trading exact recency for less lock contention.
//! - **Monitor**: a periodic task evicts down to the low-water mark once either ceiling
//!   crosses the high-water mark, and reacts to process-level memory pressure.
//! - **Range scans**: scale-out asks the store for every key whose ring hash falls in a
//!   migrating range.

pub mod lru;
pub mod memory;
pub mod monitor;
pub mod multitable;
pub mod table;
pub mod types;


use std::sync::Arc;

use crate::config::{CacheConfig, CacheStrategy};
use crate::error::CacheResult;
use crate::hashing::hasher::NodeHasher;
use crate::hashing::types::HashRange;
use lru::LruCache;
use multitable::MultiTableCache;
use types::{CacheInfo, Key, MemoryUsageInfo, Value};

/// The local cache of one node, in one of its two strategies.
pub enum LocalStore {
    Lru(LruCache),
    MultiTable(Arc<MultiTableCache>),
}

impl LocalStore {
    pub fn new(config: &CacheConfig, hasher: NodeHasher) -> Self {
        match config.strategy {
            CacheStrategy::Lru => LocalStore::Lru(LruCache::new(config, hasher)),
            CacheStrategy::MultiTable => {
                LocalStore::MultiTable(Arc::new(MultiTableCache::new(config, hasher)))
            }
        }
    }

    pub fn strategy(&self) -> CacheStrategy {
        match self {
            LocalStore::Lru(_) => CacheStrategy::Lru,
            LocalStore::MultiTable(_) => CacheStrategy::MultiTable,
        }
    }

    /// Looks a key up, updating its recency on a hit.
    pub fn fetch(&self, key: &Key) -> Option<Value> {
        match self {
            LocalStore::Lru(cache) => cache.fetch(key),
            LocalStore::MultiTable(cache) => cache.fetch(key),
        }
    }

    /// Looks a key up without touching recency. Used by the migration copy.
    pub fn peek(&self, key: &Key) -> Option<Value> {
        match self {
            LocalStore::Lru(cache) => cache.peek(key),
            LocalStore::MultiTable(cache) => cache.peek(key),
        }
    }

    pub fn store(&self, key: Key, value: Value) -> CacheResult<()> {
        match self {
            LocalStore::Lru(cache) => cache.store(key, value),
            LocalStore::MultiTable(cache) => cache.store(key, value),
        }
    }

    pub fn remove(&self, key: &Key) -> Option<Value> {
        match self {
            LocalStore::Lru(cache) => cache.remove(key),
            LocalStore::MultiTable(cache) => cache.remove(key),
        }
    }

    pub fn clear(&self) {
        match self {
            LocalStore::Lru(cache) => cache.clear(),
            LocalStore::MultiTable(cache) => cache.clear(),
        }
    }

    pub fn info(&self) -> CacheInfo {
        match self {
            LocalStore::Lru(cache) => cache.info(),
            LocalStore::MultiTable(cache) => cache.info(),
        }
    }

    pub fn keys_in_range(&self, range: &HashRange) -> Vec<Key> {
        match self {
            LocalStore::Lru(cache) => cache.keys_in_range(range),
            LocalStore::MultiTable(cache) => cache.keys_in_range(range),
        }
    }

    /// One eviction pass. Returns the number of entries dropped.
    pub fn run_monitor(&self) -> usize {
        match self {
            LocalStore::Lru(cache) => cache.run_monitor(),
            LocalStore::MultiTable(cache) => cache.run_monitor(),
        }
    }

    pub fn memory_usage(&self) -> MemoryUsageInfo {
        match self {
            LocalStore::Lru(cache) => cache.memory().sample(),
            LocalStore::MultiTable(cache) => cache.memory().sample(),
        }
    }
}
