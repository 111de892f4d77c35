use axum::{
    Router,
    extract::{DefaultBodyLimit, Extension},
    routing::{delete, get, post},
};
use std::sync::Arc;

use super::handlers::{
    handle_bulk_copy, handle_clear, handle_fetch, handle_global_info, handle_hello,
    handle_inform, handle_launch_node, handle_node_info, handle_remove, handle_store,
};
use super::protocol::{
    ENDPOINT_BLOBS, ENDPOINT_BULK_COPY, ENDPOINT_CLEAR, ENDPOINT_GLOBAL_INFO, ENDPOINT_HELLO,
    ENDPOINT_INFORM, ENDPOINT_LAUNCH_NODE, ENDPOINT_NODE_INFO,
};
use crate::cluster::router::DistributedCache;
use crate::cluster::scaling::ScaleCoordinator;

/// Largest request body accepted, blobs and bulk copies included.
pub const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Every client and peer endpoint of a node.
pub fn router(cache: Arc<DistributedCache>, coordinator: Arc<ScaleCoordinator>) -> Router {
    Router::new()
        .route(
            ENDPOINT_BLOBS,
            get(handle_fetch).post(handle_store).delete(handle_remove),
        )
        .route(ENDPOINT_CLEAR, delete(handle_clear))
        .route(ENDPOINT_NODE_INFO, get(handle_node_info))
        .route(ENDPOINT_GLOBAL_INFO, get(handle_global_info))
        .route(ENDPOINT_INFORM, post(handle_inform))
        .route(ENDPOINT_BULK_COPY, post(handle_bulk_copy))
        .route(ENDPOINT_LAUNCH_NODE, post(handle_launch_node))
        .route(ENDPOINT_HELLO, get(handle_hello))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(Extension(cache))
        .layer(Extension(coordinator))
}
