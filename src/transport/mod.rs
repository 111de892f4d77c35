//! Transport Module
//!
//! HTTP surface of a node and the client it uses to reach its peers.
//!
//! ## Core Concepts
//! - **Sender**: the trait the router and coordinator use to talk to peers. `HttpSender`
//!   implements it with `reqwest`, retrying transport failures with jittered backoff.
//! - **Hop marker**: every keyed request a peer sends carries `?senderId=`, so the
//!   receiver serves it locally. Only a scale-out may pass it on once more, between the
//!   previous and the new owner of the key.
//! - **Handlers**: axum handlers translate requests into router calls and map every
//!   `CacheError` to its status with a JSON body naming the error class.
//! - **Wire formats**: blob bodies are raw bytes, control messages are JSON, bulk copies
//!   are `bincode`.

pub mod handlers;
pub mod protocol;
pub mod sender;
pub mod server;

#[cfg(test)]
mod tests;
