//! Generational Multi-Table Cache
//!
//! `N` tables form a circular array. The base index points at the hottest table; walking
//! backwards from it reaches colder generations, so the coldest table sits at
//! `base + 1`. Evicting means clearing the coldest table and advancing the base so that
//! table becomes the new hottest one.
//!
//! The base index lives behind its own lock. Fetches and stores hold it for reading while
//! they touch tables; `rotate_evict` holds it for writing, so nobody observes a
//! half-rotated array.

use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;

use super::memory::ProcessMemory;
use super::table::{Lookup, Table, TableStatus};
use super::types::{CacheInfo, Key, Value, entry_size};
use crate::config::{CacheConfig, FullPolicy};
use crate::error::{CacheError, CacheResult};
use crate::hashing::hasher::NodeHasher;
use crate::hashing::types::HashRange;

pub struct MultiTableCache {
    tables: Vec<Table>,
    base: RwLock<usize>,
    hasher: NodeHasher,
    max_entries: usize,
    max_bytes: usize,
    /// Byte ceiling of a single table; no entry larger than this can ever be stored.
    table_bytes: usize,
    full_policy: FullPolicy,
    high_water: f64,
    low_water: f64,
    memory: ProcessMemory,
}

impl MultiTableCache {
    /// Splits the configured ceilings evenly across `config.table_count` tables.
    pub fn new(config: &CacheConfig, hasher: NodeHasher) -> Self {
        let count = config.table_count.max(2);
        let per_entries = (config.max_entries / count).max(1);
        let per_bytes = (config.max_bytes / count).max(1);

        Self {
            tables: (0..count)
                .map(|_| Table::new(per_entries, per_bytes))
                .collect(),
            base: RwLock::new(0),
            hasher,
            max_entries: config.max_entries,
            max_bytes: config.max_bytes,
            table_bytes: per_bytes,
            full_policy: config.full_policy,
            high_water: config.high_water,
            low_water: config.low_water,
            memory: ProcessMemory::new(config.process_memory_limit),
        }
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Table index `offset` generations colder than the hottest.
    fn slot(&self, base: usize, offset: usize) -> usize {
        let n = self.tables.len();
        (base + n - offset) % n
    }

    /// Scans hottest to coldest. A hit below the hottest table is promoted in the
    /// background into every hotter table that lacks it.
    pub fn fetch(self: &Arc<Self>, key: &Key) -> Option<Value> {
        let (value, base, offset) = self.lookup(key)?;

        if offset > 0 {
            let cache = Arc::clone(self);
            let key = key.clone();
            let promoted = value.clone();
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn_blocking(move || cache.promote(&key, &promoted, base, offset));
                }
                Err(_) => cache.promote(&key, &promoted, base, offset),
            }
        }

        Some(value)
    }

    /// Same scan as `fetch`, without promotion.
    pub fn peek(&self, key: &Key) -> Option<Value> {
        self.lookup(key).map(|(value, _, _)| value)
    }

    fn lookup(&self, key: &Key) -> Option<(Value, usize, usize)> {
        let base = self.base.read();
        for offset in 0..self.tables.len() {
            match self.tables[self.slot(*base, offset)].fetch(key) {
                Lookup::Hit(value) => return Some((value, *base, offset)),
                Lookup::Miss => continue,
                Lookup::Invalid => {
                    tracing::trace!("Skipping invalid table at offset {}", offset);
                    continue;
                }
            }
        }
        None
    }

    fn promote(&self, key: &Key, value: &[u8], observed_base: usize, hit_offset: usize) {
        let base = self.base.read();
        if *base != observed_base {
            // Tables rotated since the hit; the hotness order no longer applies.
            return;
        }
        for offset in 0..hit_offset {
            let table = &self.tables[self.slot(*base, offset)];
            if !table.contains(key) {
                let status = table.store(key.clone(), value.to_vec());
                tracing::trace!("Promoted {} to offset {}: {:?}", key, offset, status);
            }
        }
    }

    /// Writes into the hottest table, rotating out the coldest table when it is full.
    pub fn store(&self, key: Key, value: Value) -> CacheResult<()> {
        let size = entry_size(&key, &value);
        if size > self.table_bytes {
            tracing::warn!(
                "Entry {} of {} bytes exceeds the table ceiling of {} bytes",
                key,
                size,
                self.table_bytes
            );
            return Err(CacheError::CacheFull);
        }

        for _ in 0..=self.tables.len() {
            let observed = {
                let base = self.base.read();
                match self.tables[*base].store(key.clone(), value.clone()) {
                    TableStatus::Success => return Ok(()),
                    TableStatus::Mutation => return Err(CacheError::Mutation(key.to_string())),
                    TableStatus::Invalid => return Err(CacheError::TableInvalid),
                    TableStatus::Full => *base,
                }
            };

            if self.full_policy == FullPolicy::Reject {
                tracing::debug!("Hottest table full, rejecting {}", key);
                return Err(CacheError::CacheFull);
            }
            self.rotate_evict(observed);
        }

        tracing::warn!("Entry {} of {} bytes does not fit any table", key, size);
        Err(CacheError::CacheFull)
    }

    /// Clears the coldest table and makes it the hottest. A no-op if another caller
    /// already rotated past `observed_base`. Returns the number of dropped entries.
    pub fn rotate_evict(&self, observed_base: usize) -> usize {
        let mut base = self.base.write();
        if *base != observed_base {
            return 0;
        }

        let coldest = self.slot(*base, self.tables.len() - 1);
        let table = &self.tables[coldest];
        table.invalidate();
        let dropped = table.clear().unwrap_or(0);
        table.validate();
        *base = coldest;

        tracing::info!(
            "Rotated out table {} with {} entries, new base {}",
            coldest,
            dropped,
            coldest
        );
        dropped
    }

    pub fn remove(&self, key: &Key) -> Option<Value> {
        let _base = self.base.read();
        // Promotion may have left copies in several tables; drop them all.
        let removed: Vec<Value> = self
            .tables
            .iter()
            .filter_map(|table| table.remove(key))
            .collect();
        removed.into_iter().next()
    }

    pub fn clear(&self) {
        let mut base = self.base.write();
        for table in &self.tables {
            table.invalidate();
            table.clear();
            table.validate();
        }
        *base = 0;
        tracing::info!("Cleared all {} tables", self.tables.len());
    }

    pub fn info(&self) -> CacheInfo {
        self.tables
            .iter()
            .map(Table::info)
            .fold(CacheInfo::default(), CacheInfo::merge)
    }

    pub fn keys_in_range(&self, range: &HashRange) -> Vec<Key> {
        let _base = self.base.read();
        let keys: BTreeSet<Key> = self
            .tables
            .iter()
            .flat_map(|table| table.keys_in_range(&self.hasher, range))
            .collect();
        keys.into_iter().collect()
    }

    /// Rotates out cold tables while utilization is above the high-water mark, until it
    /// drops under the low-water mark. Also rotates once when the process is over its
    /// memory ceiling. Returns the number of dropped entries.
    pub fn run_monitor(&self) -> usize {
        let mut dropped = 0;

        let over = |info: CacheInfo, mark: f64| {
            info.total_keys as f64 > self.max_entries as f64 * mark
                || info.kv_bytes as f64 > self.max_bytes as f64 * mark
        };

        if over(self.info(), self.high_water) {
            // At most every table but the hottest.
            for _ in 1..self.tables.len() {
                if !over(self.info(), self.low_water) {
                    break;
                }
                let base = *self.base.read();
                dropped += self.rotate_evict(base);
            }
        }

        if let Some(excess) = self.memory.excess(self.high_water, self.low_water) {
            let base = *self.base.read();
            let released = self.rotate_evict(base);
            tracing::info!(
                "Process memory over ceiling by {} bytes, rotated out {} entries",
                excess,
                released
            );
            dropped += released;
        }

        if dropped > 0 {
            tracing::info!("Monitor dropped {} entries", dropped);
        }
        dropped
    }

    pub fn memory(&self) -> &ProcessMemory {
        &self.memory
    }

    #[cfg(test)]
    pub(crate) fn base(&self) -> usize {
        *self.base.read()
    }
}
