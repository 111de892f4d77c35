//! Strict LRU Local Cache
//!
//! Entries live in an arena of slots linked into a recency list with two sentinels:
//! `HEAD` (most recently used side) and `TAIL` (least recently used side). A hash index
//! maps each key to its slot, and a second index orders keys by ring hash so a scale-out
//! can find every key in a migrating range.
//!
//! All three structures sit behind one mutex, so an entry is in the index if and only if
//! it is linked into the list.

use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::memory::ProcessMemory;
use super::types::{CacheInfo, Key, Value, entry_size};
use crate::config::{CacheConfig, FullPolicy};
use crate::error::{CacheError, CacheResult};
use crate::hashing::hasher::NodeHasher;
use crate::hashing::types::HashRange;

const HEAD: usize = 0;
const TAIL: usize = 1;

struct Entry {
    key: Key,
    value: Value,
    size: usize,
    hash: u32,
}

struct Slot {
    entry: Option<Entry>,
    prev: usize,
    next: usize,
}

struct LruState {
    index: HashMap<Key, usize>,
    slots: Vec<Slot>,
    free: Vec<usize>,
    by_hash: BTreeMap<u32, BTreeSet<Key>>,
    bytes: usize,
}

impl LruState {
    fn new() -> Self {
        let slots = vec![
            Slot {
                entry: None,
                prev: HEAD,
                next: TAIL,
            },
            Slot {
                entry: None,
                prev: HEAD,
                next: TAIL,
            },
        ];

        Self {
            index: HashMap::new(),
            slots,
            free: Vec::new(),
            by_hash: BTreeMap::new(),
            bytes: 0,
        }
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = (self.slots[slot].prev, self.slots[slot].next);
        self.slots[prev].next = next;
        self.slots[next].prev = prev;
    }

    fn push_front(&mut self, slot: usize) {
        let first = self.slots[HEAD].next;
        self.slots[slot].prev = HEAD;
        self.slots[slot].next = first;
        self.slots[first].prev = slot;
        self.slots[HEAD].next = slot;
    }

    fn touch(&mut self, slot: usize) {
        self.unlink(slot);
        self.push_front(slot);
    }

    fn insert(&mut self, entry: Entry) {
        self.bytes += entry.size;
        self.by_hash
            .entry(entry.hash)
            .or_default()
            .insert(entry.key.clone());

        let key = entry.key.clone();
        let slot = Slot {
            entry: Some(entry),
            prev: HEAD,
            next: TAIL,
        };
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index] = slot;
                index
            }
            None => {
                self.slots.push(slot);
                self.slots.len() - 1
            }
        };

        self.index.insert(key, index);
        self.push_front(index);
    }

    fn release(&mut self, slot: usize) -> Option<Entry> {
        self.unlink(slot);
        let entry = self.slots[slot].entry.take()?;
        self.free.push(slot);

        self.index.remove(&entry.key);
        if let Some(keys) = self.by_hash.get_mut(&entry.hash) {
            keys.remove(&entry.key);
            if keys.is_empty() {
                self.by_hash.remove(&entry.hash);
            }
        }
        self.bytes -= entry.size;
        Some(entry)
    }

    fn pop_lru(&mut self) -> Option<Entry> {
        let last = self.slots[TAIL].prev;
        if last == HEAD {
            return None;
        }
        self.release(last)
    }

    fn clear(&mut self) {
        *self = LruState::new();
    }
}

/// Bounded local store with strict least-recently-used eviction.
pub struct LruCache {
    state: Mutex<LruState>,
    hasher: NodeHasher,
    max_entries: usize,
    max_bytes: usize,
    full_policy: FullPolicy,
    high_water: f64,
    low_water: f64,
    memory: ProcessMemory,
}

impl LruCache {
    pub fn new(config: &CacheConfig, hasher: NodeHasher) -> Self {
        Self {
            state: Mutex::new(LruState::new()),
            hasher,
            max_entries: config.max_entries,
            max_bytes: config.max_bytes,
            full_policy: config.full_policy,
            high_water: config.high_water,
            low_water: config.low_water,
            memory: ProcessMemory::new(config.process_memory_limit),
        }
    }

    /// Returns the value and marks the entry most recently used.
    pub fn fetch(&self, key: &Key) -> Option<Value> {
        let mut state = self.state.lock();
        let slot = *state.index.get(key)?;
        state.touch(slot);
        state.slots[slot]
            .entry
            .as_ref()
            .map(|entry| entry.value.clone())
    }

    /// Reads a value without changing its recency.
    pub fn peek(&self, key: &Key) -> Option<Value> {
        let state = self.state.lock();
        let slot = *state.index.get(key)?;
        state.slots[slot]
            .entry
            .as_ref()
            .map(|entry| entry.value.clone())
    }

    pub fn store(&self, key: Key, value: Value) -> CacheResult<()> {
        let size = entry_size(&key, &value);
        if size > self.max_bytes {
            tracing::warn!("Entry {} of {} bytes can never fit", key, size);
            return Err(CacheError::CacheFull);
        }

        let mut state = self.state.lock();

        if let Some(&slot) = state.index.get(&key) {
            let old_size = state.slots[slot].entry.as_ref().map_or(0, |e| e.size);
            if self.full_policy == FullPolicy::Reject
                && state.bytes - old_size + size > self.max_bytes
            {
                return Err(CacheError::CacheFull);
            }
            if let Some(entry) = state.slots[slot].entry.as_mut() {
                entry.value = value;
                entry.size = size;
            }
            state.bytes = state.bytes - old_size + size;
            state.touch(slot);
        } else {
            if self.full_policy == FullPolicy::Reject
                && (state.len() + 1 > self.max_entries || state.bytes + size > self.max_bytes)
            {
                tracing::debug!("Cache full, unable to store {}", key);
                return Err(CacheError::CacheFull);
            }
            let hash = self.hasher.key_hash(&key);
            state.insert(Entry {
                key,
                value,
                size,
                hash,
            });
        }

        // The entry just stored sits at the head and fits on its own, so it survives.
        while state.len() > self.max_entries || state.bytes > self.max_bytes {
            match state.pop_lru() {
                Some(evicted) => tracing::debug!("Evicted {} on capacity breach", evicted.key),
                None => break,
            }
        }

        Ok(())
    }

    pub fn remove(&self, key: &Key) -> Option<Value> {
        let mut state = self.state.lock();
        let slot = *state.index.get(key)?;
        state.release(slot).map(|entry| entry.value)
    }

    pub fn clear(&self) {
        self.state.lock().clear();
        tracing::info!("Cleared local LRU cache");
    }

    pub fn info(&self) -> CacheInfo {
        let state = self.state.lock();
        CacheInfo {
            total_keys: state.len(),
            kv_bytes: state.bytes,
        }
    }

    /// Keys whose ring hash falls in `range`, in hash order.
    pub fn keys_in_range(&self, range: &HashRange) -> Vec<Key> {
        let state = self.state.lock();
        let collect = |keys: &BTreeSet<Key>| keys.iter().cloned().collect::<Vec<_>>();

        if range.wraps() {
            state
                .by_hash
                .range(range.start..)
                .chain(state.by_hash.range(..range.end))
                .flat_map(|(_, keys)| collect(keys))
                .collect()
        } else {
            state
                .by_hash
                .range(range.start..range.end)
                .flat_map(|(_, keys)| collect(keys))
                .collect()
        }
    }

    /// Evicts from the cold end until both ceilings are under the low-water mark, if
    /// either crossed the high-water mark, then releases memory if the process itself is
    /// over its ceiling. Returns the number of evicted entries.
    pub fn run_monitor(&self) -> usize {
        let mut evicted = 0;

        {
            let mut state = self.state.lock();
            let high_entries = (self.max_entries as f64 * self.high_water) as usize;
            let high_bytes = (self.max_bytes as f64 * self.high_water) as usize;

            if state.len() > high_entries || state.bytes > high_bytes {
                let low_entries = (self.max_entries as f64 * self.low_water) as usize;
                let low_bytes = (self.max_bytes as f64 * self.low_water) as usize;

                while state.len() > low_entries || state.bytes > low_bytes {
                    if state.pop_lru().is_none() {
                        break;
                    }
                    evicted += 1;
                }
            }
        }

        // Sampled outside the lock; the sample can take a syscall.
        if let Some(excess) = self.memory.excess(self.high_water, self.low_water) {
            let mut state = self.state.lock();
            let mut released = 0u64;
            while released < excess {
                match state.pop_lru() {
                    Some(entry) => {
                        released += entry.size as u64;
                        evicted += 1;
                    }
                    None => break,
                }
            }
            tracing::info!(
                "Process memory over ceiling, released {} of {} estimated bytes",
                released,
                excess
            );
        }

        if evicted > 0 {
            tracing::info!("Monitor evicted {} entries", evicted);
        }
        evicted
    }

    pub fn memory(&self) -> &ProcessMemory {
        &self.memory
    }

    /// Keys from most to least recently used.
    #[cfg(test)]
    pub(crate) fn recency_order(&self) -> Vec<Key> {
        let state = self.state.lock();
        let mut keys = Vec::new();
        let mut slot = state.slots[HEAD].next;
        while slot != TAIL {
            if let Some(entry) = &state.slots[slot].entry {
                keys.push(entry.key.clone());
            }
            slot = state.slots[slot].next;
        }
        keys
    }

    /// Index, list, hash index and byte total all describe the same entries.
    #[cfg(test)]
    pub(crate) fn is_consistent(&self) -> bool {
        let state = self.state.lock();

        let mut walked = std::collections::HashSet::new();
        let mut bytes = 0;
        let mut prev = HEAD;
        let mut slot = state.slots[HEAD].next;
        while slot != TAIL {
            if state.slots[slot].prev != prev {
                return false;
            }
            let Some(entry) = &state.slots[slot].entry else {
                return false;
            };
            if state.index.get(&entry.key) != Some(&slot) || !walked.insert(entry.key.clone()) {
                return false;
            }
            bytes += entry.size;
            prev = slot;
            slot = state.slots[slot].next;
        }

        let hashed: usize = state.by_hash.values().map(BTreeSet::len).sum();
        walked.len() == state.index.len() && hashed == walked.len() && bytes == state.bytes
    }
}
