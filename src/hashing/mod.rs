//! Key Placement Module
//!
//! Maps keys to the nodes that own them.
//!
//! ## Core Concepts
//! - **Hashing**: `NodeHasher` turns key strings and node ids into stable 32-bit ring
//!   positions (MurmurHash3 x86_32, fixed seed). Versions are excluded so that every
//!   version of a key lands on the same node.
//! - **Ring**: `KeyDistributor` keeps one position per live node in a sorted map. A key is
//!   owned by the first node position at or after the key's hash, wrapping at the top.
//! - **Scale-out**: adding a node splits exactly one existing range; the distributor reports
//!   that range so it can be migrated.

pub mod distributor;
pub mod hasher;
pub mod types;

#[cfg(test)]
mod tests;
