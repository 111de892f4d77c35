//! CacheCow: Distributed In-Memory Cache
//!
//! This library crate defines the modules that make up a cache node. It serves as the
//! foundation for the binary executable (`main.rs`).
//!
//! ## Architecture Modules
//! - **`hashing`**: The consistent-hash ring. Maps every key-version pair to one owner node
//!   and reports which range moves when a node is added.
//! - **`cache`**: The node-local store. A strict LRU cache or a generational multi-table
//!   cache, both bounded by entry count and estimated bytes, plus the eviction monitor.
//! - **`cluster`**: Routing and topology. Forwards requests to owners, double-checks the
//!   previous owner during migration and coordinates online scale-out.
//! - **`transport`**: The HTTP API served to clients and peers and the client used to
//!   reach peers.
//! - **`config`** / **`error`**: Node configuration and the error taxonomy.

pub mod cache;
pub mod cluster;
pub mod config;
pub mod error;
pub mod hashing;
pub mod transport;
