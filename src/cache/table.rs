use parking_lot::RwLock;
use std::collections::HashMap;

use super::types::{CacheInfo, Key, Value, entry_size};
use crate::hashing::hasher::NodeHasher;
use crate::hashing::types::HashRange;

/// Outcome of a store into one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStatus {
    Success,
    /// Table reached its entry or byte ceiling.
    Full,
    /// Table is being cleared.
    Invalid,
    /// Same key and version already present with a different value.
    Mutation,
}

/// Outcome of a lookup in one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Hit(Value),
    Miss,
    Invalid,
}

struct TableBody {
    valid: bool,
    entries: HashMap<Key, Value>,
    bytes: usize,
}

/// One generation of the multi-table cache.
///
/// Lifecycle: created empty and valid, invalidated before being cleared, validated again
/// afterwards. No read or write goes through while the table is invalid.
pub struct Table {
    body: RwLock<TableBody>,
    max_entries: usize,
    max_bytes: usize,
}

impl Table {
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            body: RwLock::new(TableBody {
                valid: true,
                entries: HashMap::new(),
                bytes: 0,
            }),
            max_entries,
            max_bytes,
        }
    }

    /// Returns false if the table was already invalid.
    pub fn invalidate(&self) -> bool {
        let mut body = self.body.write();
        std::mem::replace(&mut body.valid, false)
    }

    /// Returns false if the table was already valid.
    pub fn validate(&self) -> bool {
        let mut body = self.body.write();
        !std::mem::replace(&mut body.valid, true)
    }

    pub fn fetch(&self, key: &Key) -> Lookup {
        let body = self.body.read();
        if !body.valid {
            return Lookup::Invalid;
        }
        match body.entries.get(key) {
            Some(value) => Lookup::Hit(value.clone()),
            None => Lookup::Miss,
        }
    }

    pub fn contains(&self, key: &Key) -> bool {
        let body = self.body.read();
        body.valid && body.entries.contains_key(key)
    }

    pub fn store(&self, key: Key, value: Value) -> TableStatus {
        let mut body = self.body.write();
        if !body.valid {
            return TableStatus::Invalid;
        }

        if let Some(existing) = body.entries.get(&key) {
            return if *existing == value {
                TableStatus::Success
            } else {
                TableStatus::Mutation
            };
        }

        let size = entry_size(&key, &value);
        if body.entries.len() + 1 > self.max_entries || body.bytes + size > self.max_bytes {
            return TableStatus::Full;
        }

        body.bytes += size;
        body.entries.insert(key, value);
        TableStatus::Success
    }

    pub fn remove(&self, key: &Key) -> Option<Value> {
        let mut body = self.body.write();
        if !body.valid {
            return None;
        }
        let value = body.entries.remove(key)?;
        body.bytes -= entry_size(key, &value);
        Some(value)
    }

    /// Drops every entry of an invalidated table and returns how many were dropped.
    /// Refuses, returning `None`, while the table is still valid.
    pub fn clear(&self) -> Option<usize> {
        let mut body = self.body.write();
        if body.valid {
            return None;
        }
        let dropped = body.entries.len();
        body.entries.clear();
        body.bytes = 0;
        Some(dropped)
    }

    pub fn info(&self) -> CacheInfo {
        let body = self.body.read();
        CacheInfo {
            total_keys: body.entries.len(),
            kv_bytes: body.bytes,
        }
    }

    pub fn keys_in_range(&self, hasher: &NodeHasher, range: &HashRange) -> Vec<Key> {
        let body = self.body.read();
        if !body.valid {
            return Vec::new();
        }
        body.entries
            .keys()
            .filter(|key| range.contains(hasher.key_hash(key)))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_same_value_is_idempotent() {
        let table = Table::new(4, 1024);
        let key = Key::new("a", 1);

        assert_eq!(table.store(key.clone(), b"x".to_vec()), TableStatus::Success);
        assert_eq!(table.store(key.clone(), b"x".to_vec()), TableStatus::Success);
        assert_eq!(table.info().total_keys, 1);
    }

    #[test]
    fn test_store_different_value_is_mutation() {
        let table = Table::new(4, 1024);
        let key = Key::new("a", 1);

        table.store(key.clone(), b"x".to_vec());

        assert_eq!(table.store(key.clone(), b"y".to_vec()), TableStatus::Mutation);
        assert_eq!(table.fetch(&key), Lookup::Hit(b"x".to_vec()));
    }

    #[test]
    fn test_full_on_entry_ceiling() {
        let table = Table::new(1, 1024);

        assert_eq!(table.store(Key::new("a", 1), vec![1]), TableStatus::Success);
        assert_eq!(table.store(Key::new("b", 1), vec![2]), TableStatus::Full);
    }

    #[test]
    fn test_invalid_table_refuses_access() {
        let table = Table::new(4, 1024);
        let key = Key::new("a", 1);
        table.store(key.clone(), vec![1]);

        assert!(table.invalidate());
        assert!(!table.invalidate());
        assert_eq!(table.fetch(&key), Lookup::Invalid);
        assert_eq!(table.store(Key::new("b", 1), vec![2]), TableStatus::Invalid);

        assert_eq!(table.clear(), Some(1));
        assert!(table.validate());
        assert_eq!(table.fetch(&key), Lookup::Miss);
        assert_eq!(table.info(), CacheInfo::default());
    }

    #[test]
    fn test_clear_requires_invalidation() {
        let table = Table::new(4, 1024);
        table.store(Key::new("a", 1), vec![1]);

        assert_eq!(table.clear(), None);
        assert_eq!(table.info().total_keys, 1);
    }
}
