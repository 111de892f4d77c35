use serde::{Deserialize, Serialize};

use crate::cluster::types::NodeId;

/// Half-open interval `[start, end)` of ring positions. Wraps when `start > end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashRange {
    pub start: u32,
    pub end: u32,
}

impl HashRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// `start == end` is the whole ring.
    pub fn contains(&self, hash: u32) -> bool {
        if self.start < self.end {
            hash >= self.start && hash < self.end
        } else {
            hash >= self.start || hash < self.end
        }
    }

    pub fn wraps(&self) -> bool {
        self.start >= self.end
    }
}

/// Result of inserting a node into the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddedNode {
    pub node_id: NodeId,
    /// Ring position the new node landed on.
    pub position: u32,
    /// Node that owned `range` before the insertion.
    pub previous_owner: NodeId,
    /// Positions that moved from `previous_owner` to `node_id`.
    pub range: HashRange,
}
