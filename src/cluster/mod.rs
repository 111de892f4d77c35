//! Cluster Module
//!
//! Routes requests across nodes and grows the cluster at runtime.
//!
//! ## Core Concepts
//! - **Registry**: `NodeRegistry` maps node ids to `host:port`; a node's id is its
//!   position in the node list.
//! - **Routing**: `DistributedCache` sends each key to its ring owner. Reads may check two
//!   places while a range is migrating; writes always go to the owner under the current
//!   ring.
//! - **Hop limit**: requests forwarded by a peer carry the peer's id and are served from
//!   the local store. During a scale-out, peers whose rings disagree on a moved key pass
//!   the request once between the previous and the new owner.
//! - **Scale-out**: `ScaleCoordinator` runs the launch tie-break, grows the ring and
//!   streams the split range to the new node.
//! - **Usage**: atomic counters for inbound and outbound requests feed `SystemInfo`.

pub mod launcher;
pub mod registry;
pub mod router;
pub mod scaling;
pub mod types;
pub mod usage;
