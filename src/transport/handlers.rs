use axum::{
    Json,
    body::Bytes,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use super::protocol::{AckResponse, ErrorResponse, InformResponse, SenderQuery};
use crate::cache::types::Key;
use crate::cluster::router::DistributedCache;
use crate::cluster::scaling::ScaleCoordinator;
use crate::cluster::types::{BulkCopyRequest, NodeId, ScaleMessage};
use crate::error::CacheError;

/// JSON error body with the status of the error's class.
fn error_response(node: NodeId, error: CacheError) -> Response {
    let status = error.status();
    if status.is_server_error() {
        tracing::error!("Request failed: {}", error);
    } else {
        tracing::debug!("Request rejected: {}", error);
    }

    (
        status,
        Json(ErrorResponse {
            error: error.kind().to_string(),
            message: error.to_string(),
            node,
        }),
    )
        .into_response()
}

fn invalid(cache: &DistributedCache, reason: String) -> Response {
    cache.record_invalid_request();
    error_response(cache.node_id(), CacheError::InvalidInput(reason))
}

/// Checks `?senderId=`: it must name a known node.
fn parse_sender(cache: &DistributedCache, query: &SenderQuery) -> Result<Option<NodeId>, Response> {
    match query.sender_id {
        None => Ok(None),
        Some(id) if id >= 0 && (id as usize) < cache.registry().len() => {
            Ok(Some(NodeId(id as usize)))
        }
        Some(id) => Err(invalid(cache, format!("Invalid sender id {}", id))),
    }
}

fn parse_key(cache: &DistributedCache, key: String, version: &str) -> Result<Key, Response> {
    if key.is_empty() {
        return Err(invalid(cache, "Empty key".to_string()));
    }
    let version: i64 = version
        .parse()
        .map_err(|_| invalid(cache, format!("Version {} is not a number", version)))?;
    let version = u32::try_from(version)
        .map_err(|_| invalid(cache, format!("Invalid version {}", version)))?;
    Ok(Key::new(key, version))
}

// ============================================================
// BLOBS
// ============================================================

pub async fn handle_fetch(
    Extension(cache): Extension<Arc<DistributedCache>>,
    Path((key, version)): Path<(String, String)>,
    Query(query): Query<SenderQuery>,
) -> Response {
    let (key, origin) = match parse_key(&cache, key, &version)
        .and_then(|key| parse_sender(&cache, &query).map(|origin| (key, origin)))
    {
        Ok(parsed) => parsed,
        Err(response) => return response,
    };

    match cache.fetch(&key, origin).await {
        Ok(value) => (StatusCode::OK, value).into_response(),
        Err(e) => error_response(cache.node_id(), e),
    }
}

pub async fn handle_store(
    Extension(cache): Extension<Arc<DistributedCache>>,
    Path((key, version)): Path<(String, String)>,
    Query(query): Query<SenderQuery>,
    body: Bytes,
) -> Response {
    let (key, origin) = match parse_key(&cache, key, &version)
        .and_then(|key| parse_sender(&cache, &query).map(|origin| (key, origin)))
    {
        Ok(parsed) => parsed,
        Err(response) => return response,
    };
    if body.is_empty() {
        return invalid(&cache, format!("Empty value for {}", key));
    }

    match cache.store(key, body.to_vec(), origin).await {
        Ok(()) => (StatusCode::OK, Json(AckResponse { success: true })).into_response(),
        Err(e) => error_response(cache.node_id(), e),
    }
}

pub async fn handle_remove(
    Extension(cache): Extension<Arc<DistributedCache>>,
    Path((key, version)): Path<(String, String)>,
    Query(query): Query<SenderQuery>,
) -> Response {
    let (key, origin) = match parse_key(&cache, key, &version)
        .and_then(|key| parse_sender(&cache, &query).map(|origin| (key, origin)))
    {
        Ok(parsed) => parsed,
        Err(response) => return response,
    };

    match cache.remove(&key, origin).await {
        Ok(()) => (StatusCode::OK, Json(AckResponse { success: true })).into_response(),
        Err(e) => error_response(cache.node_id(), e),
    }
}

// ============================================================
// ADMINISTRATION
// ============================================================

/// A client clear fans out to every node; a peer's clear stays local.
pub async fn handle_clear(
    Extension(cache): Extension<Arc<DistributedCache>>,
    Query(query): Query<SenderQuery>,
) -> Response {
    let origin = match parse_sender(&cache, &query) {
        Ok(origin) => origin,
        Err(response) => return response,
    };

    match cache.clear(origin.is_none()).await {
        Ok(()) => (StatusCode::OK, Json(AckResponse { success: true })).into_response(),
        Err(e) => error_response(cache.node_id(), e),
    }
}

pub async fn handle_node_info(Extension(cache): Extension<Arc<DistributedCache>>) -> Response {
    (StatusCode::OK, Json(cache.system_info())).into_response()
}

pub async fn handle_global_info(Extension(cache): Extension<Arc<DistributedCache>>) -> Response {
    (StatusCode::OK, Json(cache.global_info().await)).into_response()
}

pub async fn handle_launch_node(
    Extension(coordinator): Extension<Arc<ScaleCoordinator>>,
) -> (StatusCode, Json<AckResponse>) {
    if coordinator.initiate_launch().await {
        (StatusCode::ACCEPTED, Json(AckResponse { success: true }))
    } else {
        (StatusCode::CONFLICT, Json(AckResponse { success: false }))
    }
}

pub async fn handle_hello(Extension(cache): Extension<Arc<DistributedCache>>) -> String {
    format!("Hello from node {}", cache.node_id())
}

// ============================================================
// SCALE-OUT
// ============================================================

/// 202 when the message is accepted, 409 when a launch intent lost the tie-break.
pub async fn handle_inform(
    Extension(coordinator): Extension<Arc<ScaleCoordinator>>,
    Json(message): Json<ScaleMessage>,
) -> Response {
    let cache = coordinator.cache();
    match coordinator.handle_message(message) {
        Ok(accepted) => {
            let status = if accepted {
                StatusCode::ACCEPTED
            } else {
                StatusCode::CONFLICT
            };
            (status, Json(InformResponse { accepted })).into_response()
        }
        Err(e) => {
            if matches!(e, CacheError::InvalidInput(_)) {
                cache.record_invalid_request();
            }
            error_response(cache.node_id(), e)
        }
    }
}

pub async fn handle_bulk_copy(
    Extension(coordinator): Extension<Arc<ScaleCoordinator>>,
    body: Bytes,
) -> Response {
    let cache = coordinator.cache();
    let request: BulkCopyRequest = match bincode::deserialize(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::error!("Failed to decode bulk copy: {}", e);
            return invalid(cache, format!("Malformed bulk copy: {}", e));
        }
    };

    match coordinator.handle_bulk_copy(request) {
        Ok(stored) => {
            tracing::debug!("Accepted bulk copy of {} entries", stored);
            (StatusCode::OK, Json(AckResponse { success: true })).into_response()
        }
        Err(e) => {
            cache.record_invalid_request();
            error_response(cache.node_id(), e)
        }
    }
}
