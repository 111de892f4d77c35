//! Key Placement Tests
//!
//! ## Test Scopes
//! - **Ownership**: deterministic successor search with wrap-around.
//! - **Scale-out**: `add_node` moves exactly the reported range and nothing else.
//! - **Ranges**: half-open intervals, wrapping and whole-ring.

#[cfg(test)]
mod tests {
    use crate::cache::types::Key;
    use crate::cluster::types::NodeId;
    use crate::error::CacheError;
    use crate::hashing::distributor::KeyDistributor;
    use crate::hashing::hasher::NodeHasher;
    use crate::hashing::types::HashRange;

    fn keys(count: usize) -> Vec<Key> {
        (0..count).map(|i| Key::new(format!("user:{}", i), 1)).collect()
    }

    /// Smallest position >= hash, else the first position.
    fn expected_owner(positions: &[(u32, NodeId)], hash: u32) -> NodeId {
        positions
            .iter()
            .find(|(position, _)| *position >= hash)
            .or_else(|| positions.first())
            .map(|(_, node)| *node)
            .unwrap()
    }

    // ============================================================
    // OWNERSHIP TESTS
    // ============================================================

    #[test]
    fn test_owner_is_deterministic() {
        let distributor = KeyDistributor::new(NodeHasher::new(), 3).unwrap();
        let key = Key::new("user:42", 1);

        let first = distributor.primary_owner(&key).unwrap();
        for _ in 0..100 {
            assert_eq!(distributor.primary_owner(&key).unwrap(), first);
        }

        // Same topology built again agrees
        let again = KeyDistributor::new(NodeHasher::new(), 3).unwrap();
        assert_eq!(again.primary_owner(&key).unwrap(), first);
    }

    #[test]
    fn test_owner_is_clockwise_successor() {
        let distributor = KeyDistributor::new(NodeHasher::new(), 5).unwrap();
        let positions = distributor.positions();

        for key in keys(1000) {
            let hash = distributor.key_hash(&key);
            assert_eq!(
                distributor.primary_owner(&key).unwrap(),
                expected_owner(&positions, hash),
                "Wrong owner for {}",
                key
            );
        }
    }

    #[test]
    fn test_one_position_per_node() {
        let distributor = KeyDistributor::new(NodeHasher::new(), 8).unwrap();
        let mut nodes: Vec<NodeId> = distributor.positions().iter().map(|(_, n)| *n).collect();
        nodes.sort();

        assert_eq!(nodes, (0..8).map(NodeId).collect::<Vec<_>>());
        assert_eq!(distributor.node_count(), 8);
    }

    #[test]
    fn test_every_node_owns_something() {
        let distributor = KeyDistributor::new(NodeHasher::new(), 3).unwrap();
        let mut seen = std::collections::HashSet::new();

        for key in keys(5000) {
            seen.insert(distributor.primary_owner(&key).unwrap());
        }

        assert_eq!(seen.len(), 3, "Keys should spread over all nodes");
    }

    #[test]
    fn test_single_node_is_its_own_predecessor() {
        let distributor = KeyDistributor::new(NodeHasher::new(), 1).unwrap();

        for key in keys(50) {
            assert_eq!(
                distributor.owner_and_predecessor(&key).unwrap(),
                (NodeId(0), NodeId(0))
            );
        }
    }

    #[test]
    fn test_initial_nodes_have_no_previous_owner() {
        let distributor = KeyDistributor::new(NodeHasher::new(), 4).unwrap();

        for key in keys(1000) {
            let (owner, previous) = distributor.owner_and_predecessor(&key).unwrap();
            assert_eq!(owner, previous, "Nothing has moved before the first scale-out");
        }
    }

    #[test]
    fn test_empty_ring_is_a_configuration_error() {
        let distributor = KeyDistributor::new(NodeHasher::new(), 0).unwrap();

        assert!(matches!(
            distributor.add_node(),
            Err(CacheError::Configuration(_))
        ));
        assert!(matches!(
            distributor.primary_owner(&Key::new("a", 1)),
            Err(CacheError::Configuration(_))
        ));
    }

    // ============================================================
    // SCALE-OUT TESTS
    // ============================================================

    #[test]
    fn test_add_node_moves_only_reported_range() {
        // ARRANGE
        let distributor = KeyDistributor::new(NodeHasher::new(), 3).unwrap();
        let keys = keys(5000);
        let before: Vec<NodeId> = keys
            .iter()
            .map(|k| distributor.primary_owner(k).unwrap())
            .collect();

        // ACT
        let added = distributor.add_node().unwrap();

        // ASSERT
        assert_eq!(added.node_id, NodeId(3));
        assert_eq!(distributor.node_count(), 4);
        for (key, old_owner) in keys.iter().zip(before) {
            let hash = distributor.key_hash(key);
            let owner = distributor.primary_owner(key).unwrap();
            if added.range.contains(hash) {
                assert_eq!(owner, added.node_id, "{} should move to the new node", key);
                assert_eq!(old_owner, added.previous_owner, "{} came from elsewhere", key);
            } else {
                assert_eq!(owner, old_owner, "{} should keep its owner", key);
            }
        }
    }

    #[test]
    fn test_range_ends_at_new_position() {
        let distributor = KeyDistributor::new(NodeHasher::new(), 3).unwrap();

        let added = distributor.add_node().unwrap();

        assert!(added.range.contains(added.position));
        assert!(!added.range.contains(added.range.end));
        assert_eq!(added.range.end, added.position.wrapping_add(1));
    }

    #[test]
    fn test_predecessor_reports_previous_owner_for_moved_keys() {
        let distributor = KeyDistributor::new(NodeHasher::new(), 3).unwrap();
        let added = distributor.add_node().unwrap();

        for key in keys(3000) {
            let (owner, previous) = distributor.owner_and_predecessor(&key).unwrap();
            if owner == added.node_id {
                assert_eq!(previous, added.previous_owner);
            } else {
                assert_eq!(previous, owner, "Unmoved keys have no other previous owner");
            }
        }
    }

    #[test]
    fn test_repeated_additions_assign_next_ids() {
        let distributor = KeyDistributor::new(NodeHasher::new(), 2).unwrap();

        assert_eq!(distributor.add_node().unwrap().node_id, NodeId(2));
        assert_eq!(distributor.add_node().unwrap().node_id, NodeId(3));
        assert_eq!(distributor.positions().len(), 4);
    }

    // ============================================================
    // RANGE TESTS
    // ============================================================

    #[test]
    fn test_plain_range_is_half_open() {
        let range = HashRange::new(10, 20);

        assert!(range.contains(10));
        assert!(range.contains(19));
        assert!(!range.contains(20));
        assert!(!range.contains(9));
        assert!(!range.wraps());
    }

    #[test]
    fn test_wrapping_range() {
        let range = HashRange::new(u32::MAX - 5, 5);

        assert!(range.wraps());
        assert!(range.contains(u32::MAX));
        assert!(range.contains(0));
        assert!(range.contains(4));
        assert!(!range.contains(5));
        assert!(!range.contains(1000));
    }

    #[test]
    fn test_equal_bounds_cover_whole_ring() {
        let range = HashRange::new(42, 42);

        assert!(range.contains(0));
        assert!(range.contains(42));
        assert!(range.contains(u32::MAX));
    }
}
