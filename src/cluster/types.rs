use serde::{Deserialize, Serialize};
use std::fmt;

use crate::cache::types::KeyValuePair;
use crate::hashing::types::HashRange;

/// Position of a node in the ordered node list. Stable for the node's lifetime.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Messages exchanged while a node is being added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScaleMessageKind {
    /// An existing node intends to launch a new one.
    LaunchNode,
    /// The new node booted and is ready to receive copies.
    Ready,
    /// An existing node finished copying to the new node.
    CopyComplete,
    /// The new node received every copy; routing may stop double-checking.
    ScaleComplete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleMessage {
    pub node_id: NodeId,
    pub host_name: String,
    pub kind: ScaleMessageKind,
}

impl ScaleMessage {
    pub fn new(node_id: NodeId, kind: ScaleMessageKind) -> Self {
        Self {
            node_id,
            host_name: String::new(),
            kind,
        }
    }

    pub fn ready(node_id: NodeId, host_name: impl Into<String>) -> Self {
        Self {
            node_id,
            host_name: host_name.into(),
            kind: ScaleMessageKind::Ready,
        }
    }
}

/// One batch of migrated entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkCopyRequest {
    pub node_id: NodeId,
    pub values: Vec<KeyValuePair>,
}

/// Migration state of this node as a copy source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationState {
    pub copy_in_progress: bool,
    /// Range being copied out of this node.
    pub range: Option<HashRange>,
    /// Node receiving the range.
    pub target: Option<NodeId>,
    /// Index of the next key to stream.
    pub cursor: usize,
}

impl MigrationState {
    /// True if `hash` is currently being copied from this node to `owner`.
    pub fn is_copying(&self, hash: u32, owner: NodeId) -> bool {
        self.copy_in_progress
            && self.target == Some(owner)
            && self.range.is_some_and(|range| range.contains(hash))
    }
}

/// Counters for outbound requests. Only ever increase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderUsageInfo {
    pub fetch_attempts: u64,
    pub fetch_successes: u64,
    pub store_attempts: u64,
    pub store_successes: u64,
    pub remove_attempts: u64,
    pub remove_successes: u64,
    pub clear_attempts: u64,
    pub clear_successes: u64,
    pub bulk_copy_attempts: u64,
    pub bulk_copy_successes: u64,
}

/// Counters for inbound requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverUsageInfo {
    pub fetch_attempts: u64,
    pub fetch_successes: u64,
    pub store_attempts: u64,
    pub store_successes: u64,
    pub invalid_requests: u64,
}

/// Snapshot served by `/v1/node-info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub node_id: NodeId,
    pub host_name: String,
    pub memory_usage: crate::cache::types::MemoryUsageInfo,
    pub cache_info: crate::cache::types::CacheInfo,
    pub sender_usage: SenderUsageInfo,
    pub receiver_usage: ReceiverUsageInfo,
    pub scale_in_progress: bool,
    pub copy_in_progress: bool,
}
