use std::io::Cursor;

use crate::cache::types::Key;
use crate::cluster::types::NodeId;

/// Seed shared by every node. Changing it reshuffles the whole cluster.
pub const HASH_SEED: u32 = 0;

/// Stable, seed-fixed hashing of keys and node identifiers onto the ring.
#[derive(Debug, Clone, Copy)]
pub struct NodeHasher {
    seed: u32,
}

impl NodeHasher {
    pub fn new() -> Self {
        Self { seed: HASH_SEED }
    }

    pub fn hash(&self, bytes: &[u8]) -> u32 {
        // Reading from an in-memory cursor cannot fail.
        murmur3::murmur3_32(&mut Cursor::new(bytes), self.seed).unwrap_or_default()
    }

    /// Hashes the key string only; the version does not affect placement.
    pub fn key_hash(&self, key: &Key) -> u32 {
        self.hash(key.key.as_bytes())
    }

    pub fn node_hash(&self, node_id: NodeId) -> u32 {
        self.hash(format!("node-{}", node_id.0).as_bytes())
    }

    /// Salted position for a node; used to move a node off an occupied position.
    pub fn node_hash_salted(&self, node_id: NodeId, index: u32) -> u32 {
        self.hash(format!("node-{}#{}", node_id.0, index).as_bytes())
    }
}

impl Default for NodeHasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_does_not_affect_key_hash() {
        let hasher = NodeHasher::new();
        let v1 = Key::new("user:42", 1);
        let v2 = Key::new("user:42", 2);

        assert_eq!(hasher.key_hash(&v1), hasher.key_hash(&v2));
    }

    #[test]
    fn test_known_murmur_vectors() {
        let hasher = NodeHasher::new();

        assert_eq!(hasher.hash(b""), 0);
        assert_eq!(hasher.hash(b"hello"), 0x248b_fa47);
    }

    #[test]
    fn test_salt_moves_node_position() {
        let hasher = NodeHasher::new();
        let node = NodeId(3);

        assert_ne!(hasher.node_hash(node), hasher.node_hash_salted(node, 1));
        assert_ne!(
            hasher.node_hash_salted(node, 1),
            hasher.node_hash_salted(node, 2)
        );
    }
}
