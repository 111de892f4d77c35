use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};

use super::hasher::NodeHasher;
use super::types::{AddedNode, HashRange};
use crate::cache::types::Key;
use crate::cluster::types::NodeId;
use crate::error::{CacheError, CacheResult};

/// Upper bound on salted retries when a node position collides.
const MAX_POSITION_PROBES: u32 = 64;

struct Ring {
    /// Ring position -> owning node. Exactly one entry per live node.
    positions: BTreeMap<u32, NodeId>,
    /// Node added by the last scale-out; keys it owns were owned by its successor before.
    latest: Option<(u32, NodeId)>,
    node_count: usize,
}

impl Ring {
    fn successor(&self, hash: u32) -> Option<(u32, NodeId)> {
        self.positions
            .range(hash..)
            .next()
            .or_else(|| self.positions.iter().next())
            .map(|(position, node)| (*position, *node))
    }

    fn successor_after(&self, position: u32) -> Option<(u32, NodeId)> {
        self.positions
            .range((Excluded(position), Unbounded))
            .next()
            .or_else(|| self.positions.iter().next())
            .map(|(position, node)| (*position, *node))
    }

    fn predecessor_of(&self, position: u32) -> Option<u32> {
        self.positions
            .range(..position)
            .next_back()
            .or_else(|| self.positions.iter().next_back())
            .map(|(position, _)| *position)
    }

    fn free_position(&self, hasher: &NodeHasher, node_id: NodeId) -> Option<u32> {
        let first = hasher.node_hash(node_id);
        if !self.positions.contains_key(&first) {
            return Some(first);
        }

        (1..=MAX_POSITION_PROBES)
            .map(|index| hasher.node_hash_salted(node_id, index))
            .find(|position| !self.positions.contains_key(position))
    }
}

/// Consistent-hash ring mapping keys to the node responsible for them.
///
/// All reads and the insertion in [`KeyDistributor::add_node`] go through the same
/// lock, so an ownership query never observes a half-inserted node.
pub struct KeyDistributor {
    hasher: NodeHasher,
    ring: RwLock<Ring>,
}

impl KeyDistributor {
    /// Builds a ring for nodes `0..node_count`, inserted in id order.
    ///
    /// On a position collision the node inserted first keeps the position and the later
    /// one is moved to a salted position.
    pub fn new(hasher: NodeHasher, node_count: usize) -> CacheResult<Self> {
        let mut ring = Ring {
            positions: BTreeMap::new(),
            latest: None,
            node_count: 0,
        };

        for id in 0..node_count {
            let node_id = NodeId(id);
            let position = ring.free_position(&hasher, node_id).ok_or_else(|| {
                CacheError::Configuration(format!("No free ring position for node {}", node_id))
            })?;
            ring.positions.insert(position, node_id);
            ring.node_count += 1;
        }

        Ok(Self {
            hasher,
            ring: RwLock::new(ring),
        })
    }

    pub fn hasher(&self) -> &NodeHasher {
        &self.hasher
    }

    pub fn key_hash(&self, key: &Key) -> u32 {
        self.hasher.key_hash(key)
    }

    pub fn node_count(&self) -> usize {
        self.ring.read().node_count
    }

    /// Node currently responsible for `key`.
    pub fn primary_owner(&self, key: &Key) -> CacheResult<NodeId> {
        let hash = self.hasher.key_hash(key);
        self.ring
            .read()
            .successor(hash)
            .map(|(_, node)| node)
            .ok_or_else(|| CacheError::Configuration("Ring has no nodes".to_string()))
    }

    /// Current owner of `key` and the node that owned it before the most recent
    /// addition. Both are the same node unless the key moved in the last scale-out.
    pub fn owner_and_predecessor(&self, key: &Key) -> CacheResult<(NodeId, NodeId)> {
        let hash = self.hasher.key_hash(key);
        let ring = self.ring.read();

        let (_, owner) = ring
            .successor(hash)
            .ok_or_else(|| CacheError::Configuration("Ring has no nodes".to_string()))?;

        let previous = match ring.latest {
            Some((position, latest)) if latest == owner => ring
                .successor_after(position)
                .map(|(_, node)| node)
                .unwrap_or(owner),
            _ => owner,
        };

        Ok((owner, previous))
    }

    /// Inserts the next node id into the ring and returns the range it takes over.
    pub fn add_node(&self) -> CacheResult<AddedNode> {
        let mut ring = self.ring.write();

        if ring.positions.is_empty() {
            return Err(CacheError::Configuration(
                "Cannot add a node to an empty ring".to_string(),
            ));
        }

        let node_id = NodeId(ring.node_count);
        let position = ring.free_position(&self.hasher, node_id).ok_or_else(|| {
            CacheError::Configuration(format!("No free ring position for node {}", node_id))
        })?;

        let (_, previous_owner) = ring
            .successor(position)
            .ok_or_else(|| CacheError::Configuration("Ring has no nodes".to_string()))?;
        let predecessor = ring
            .predecessor_of(position)
            .ok_or_else(|| CacheError::Configuration("Ring has no nodes".to_string()))?;

        // Keys in (predecessor, position] move; as half-open: [predecessor + 1, position + 1).
        let range = HashRange::new(predecessor.wrapping_add(1), position.wrapping_add(1));

        ring.positions.insert(position, node_id);
        ring.latest = Some((position, node_id));
        ring.node_count += 1;

        tracing::info!(
            "Added node {} at ring position {} taking range [{}, {}) from node {}",
            node_id,
            position,
            range.start,
            range.end,
            previous_owner
        );

        Ok(AddedNode {
            node_id,
            position,
            previous_owner,
            range,
        })
    }

    /// Snapshot of `(position, node)` pairs in ring order.
    pub fn positions(&self) -> Vec<(u32, NodeId)> {
        self.ring
            .read()
            .positions
            .iter()
            .map(|(position, node)| (*position, *node))
            .collect()
    }
}
