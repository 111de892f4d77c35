//! Cache Error Taxonomy
//!
//! Every failure the core can produce is folded into a single tagged error,
//! [`CacheError`], at the router boundary. The transport layer maps each
//! variant to an HTTP status via [`CacheError::status`] and echoes
//! [`CacheError::kind`] in the JSON body so that callers can distinguish a
//! data error from an infrastructure error.
//!
//! None of these errors crash the node.

use axum::http::StatusCode;
use thiserror::Error;

use crate::cluster::types::NodeId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Local miss on a key this node owns.
    #[error("Key {0} not found in cache")]
    KeyNotFound(String),

    /// Local store rejected by the capacity policy.
    #[error("Cache is full")]
    CacheFull,

    /// A peer could not be reached.
    #[error("Connection refused by node {0}")]
    ConnectionRefused(NodeId),

    /// A peer answered with a 5xx.
    #[error("Node {0} reported an internal error")]
    RemoteServerError(NodeId),

    /// A peer answered with a 4xx other than not-found.
    #[error("Node {0} rejected the request")]
    RemoteClientError(NodeId),

    /// Key-version pair already cached with a different value.
    #[error("Key-version pair {0} already cached with a different value, update the version number")]
    Mutation(String),

    /// Table being cleared; the operation may be retried.
    #[error("Table is being cleared, retry the request")]
    TableInvalid,

    /// Invalid topology operation.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Scaling in progress: {0}")]
    ScaleInProgress(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CacheError {
    pub fn status(&self) -> StatusCode {
        match self {
            CacheError::KeyNotFound(_) => StatusCode::NOT_FOUND,
            CacheError::CacheFull
            | CacheError::Mutation(_)
            | CacheError::ScaleInProgress(_) => StatusCode::CONFLICT,
            CacheError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            CacheError::TableInvalid => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::ConnectionRefused(_)
            | CacheError::RemoteServerError(_)
            | CacheError::RemoteClientError(_)
            | CacheError::Configuration(_)
            | CacheError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable tag for the error body.
    pub fn kind(&self) -> &'static str {
        match self {
            CacheError::KeyNotFound(_) => "key_not_found",
            CacheError::CacheFull => "cache_full",
            CacheError::ConnectionRefused(_) => "connection_refused",
            CacheError::RemoteServerError(_) => "remote_server_error",
            CacheError::RemoteClientError(_) => "remote_client_error",
            CacheError::Mutation(_) => "mutation",
            CacheError::TableInvalid => "table_invalid",
            CacheError::Configuration(_) => "configuration",
            CacheError::ScaleInProgress(_) => "scale_in_progress",
            CacheError::InvalidInput(_) => "invalid_input",
            CacheError::Serialization(_) => "serialization",
        }
    }

    /// The peer a cross-node error came from, if any.
    pub fn remote_node(&self) -> Option<NodeId> {
        match self {
            CacheError::ConnectionRefused(node)
            | CacheError::RemoteServerError(node)
            | CacheError::RemoteClientError(node) => Some(*node),
            _ => None,
        }
    }

    /// Whether retrying the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CacheError::TableInvalid
                | CacheError::ConnectionRefused(_)
                | CacheError::RemoteServerError(_)
        )
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
