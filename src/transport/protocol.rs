//! Cache Network Protocol
//!
//! API endpoints and DTOs shared by clients and peers.
//!
//! Blob bodies travel as raw bytes. Scale-out messages and replies are JSON. Bulk copies
//! are `bincode`-encoded `BulkCopyRequest`s, since they carry binary values in bulk.

use serde::{Deserialize, Serialize};

use crate::cluster::types::NodeId;

// --- API Endpoints ---

/// Fetch (GET), store (POST) or remove (DELETE) one key-version pair.
pub const ENDPOINT_BLOBS: &str = "/v1/blobs/:key/:version";
/// Clears the cache; a client request fans out to every node.
pub const ENDPOINT_CLEAR: &str = "/v1/clear";
/// Usage and memory statistics of one node.
pub const ENDPOINT_NODE_INFO: &str = "/v1/node-info";
/// Statistics of every node, gathered by the node that was asked.
pub const ENDPOINT_GLOBAL_INFO: &str = "/v1/global-info";
/// Scale-out protocol messages between nodes.
pub const ENDPOINT_INFORM: &str = "/v1/inform";
/// Batch of migrated entries pushed to a new node.
pub const ENDPOINT_BULK_COPY: &str = "/v1/bulk-copy";
/// Operator trigger for adding a node.
pub const ENDPOINT_LAUNCH_NODE: &str = "/v1/launch-node";
/// Liveness check.
pub const ENDPOINT_HELLO: &str = "/v1/hello-world";

/// Query parameter naming the peer that forwarded a request.
pub const SENDER_ID_PARAM: &str = "senderId";

// --- Data Transfer Objects ---

/// Optional `?senderId=` on peer-forwarded requests.
///
/// Signed so that a negative id can be rejected explicitly instead of failing to parse.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SenderQuery {
    #[serde(rename = "senderId")]
    pub sender_id: Option<i64>,
}

/// Body of every error response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    /// Stable error tag, e.g. `key_not_found` or `remote_server_error`.
    pub error: String,
    /// Human-readable description.
    pub message: String,
    /// Node that produced the error.
    pub node: NodeId,
}

/// Acknowledgment for writes and administrative calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AckResponse {
    pub success: bool,
}

/// Reply to a scale-out message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InformResponse {
    /// False when a launch intent lost the tie-break.
    pub accepted: bool,
}
