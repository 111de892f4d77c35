use async_trait::async_trait;
use reqwest::{Response, StatusCode, Url};
use std::sync::Arc;
use std::time::Duration;

use super::protocol::{
    ENDPOINT_BULK_COPY, ENDPOINT_CLEAR, ENDPOINT_INFORM, ENDPOINT_NODE_INFO, SENDER_ID_PARAM,
};
use crate::cache::types::{Key, Value};
use crate::cluster::registry::NodeRegistry;
use crate::cluster::types::{BulkCopyRequest, NodeId, ScaleMessage, SenderUsageInfo, SystemInfo};
use crate::cluster::usage::{SenderCounters, bump, record};
use crate::config::ScalingConfig;
use crate::error::{CacheError, CacheResult};

/// Issues requests to peer nodes.
///
/// Every request that carries a key is sent as a forwarded request, so the peer serves
/// it from its local cache and never forwards it again.
#[async_trait]
pub trait Sender: Send + Sync {
    async fn fetch(&self, key: &Key, dest: NodeId) -> CacheResult<Value>;

    async fn store(&self, key: &Key, value: &Value, dest: NodeId) -> CacheResult<()>;

    async fn remove(&self, key: &Key, dest: NodeId) -> CacheResult<()>;

    /// Clears a peer's local cache only.
    async fn clear(&self, dest: NodeId) -> CacheResult<()>;

    async fn bulk_copy(&self, request: &BulkCopyRequest, dest: NodeId) -> CacheResult<()>;

    /// `Ok` if the peer accepted the message, `RemoteClientError` if it rejected it.
    async fn send_scale_message(&self, message: &ScaleMessage, dest: NodeId) -> CacheResult<()>;

    async fn node_info(&self, dest: NodeId) -> CacheResult<SystemInfo>;

    fn usage(&self) -> SenderUsageInfo;

    /// Sends `message` to each node in turn and reports every outcome.
    async fn broadcast(
        &self,
        message: &ScaleMessage,
        nodes: &[NodeId],
    ) -> Vec<(NodeId, CacheResult<()>)> {
        let mut results = Vec::with_capacity(nodes.len());
        for node in nodes {
            let result = self.send_scale_message(message, *node).await;
            if let Err(e) = &result {
                tracing::warn!("Broadcast of {:?} to node {} failed: {}", message.kind, node, e);
            }
            results.push((*node, result));
        }
        results
    }
}

/// `Sender` over HTTP, addressing peers through the node registry.
pub struct HttpSender {
    node_id: NodeId,
    registry: Arc<NodeRegistry>,
    client: reqwest::Client,
    attempts: usize,
    timeout: Duration,
    counters: SenderCounters,
}

impl HttpSender {
    pub fn new(node_id: NodeId, registry: Arc<NodeRegistry>, config: &ScalingConfig) -> Self {
        Self {
            node_id,
            registry,
            client: reqwest::Client::new(),
            attempts: config.rpc_attempts.max(1),
            timeout: config.rpc_timeout,
            counters: SenderCounters::default(),
        }
    }

    fn base_url(&self, dest: NodeId) -> CacheResult<Url> {
        let host = self
            .registry
            .host(dest)
            .ok_or_else(|| CacheError::Configuration(format!("Unknown node {}", dest)))?;
        Url::parse(&format!("http://{}", host)).map_err(|e| {
            CacheError::Configuration(format!("Bad address {} for node {}: {}", host, dest, e))
        })
    }

    /// `/v1/blobs/{key}/{version}?senderId={self}` with the key percent-encoded.
    fn blob_url(&self, key: &Key, dest: NodeId) -> CacheResult<Url> {
        let mut url = self.base_url(dest)?;
        let version = key.version.to_string();
        url.path_segments_mut()
            .map_err(|_| CacheError::Configuration(format!("Node {} address cannot be a base", dest)))?
            .pop_if_empty()
            .extend(["v1", "blobs", key.key.as_str(), version.as_str()]);
        self.with_sender_id(url)
    }

    fn endpoint_url(&self, path: &str, dest: NodeId) -> CacheResult<Url> {
        let url = self.base_url(dest)?;
        url.join(path)
            .map_err(|e| CacheError::Configuration(format!("Bad endpoint {}: {}", path, e)))
    }

    fn with_sender_id(&self, mut url: Url) -> CacheResult<Url> {
        url.query_pairs_mut()
            .append_pair(SENDER_ID_PARAM, &self.node_id.to_string());
        Ok(url)
    }

    /// Sends with jittered exponential backoff. Only transport failures are retried; any
    /// HTTP response is returned as is.
    async fn send_with_retry<F>(&self, dest: NodeId, build: F) -> CacheResult<Response>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder + Send + Sync,
    {
        let mut delay_ms = 150u64;

        for attempt in 0..self.attempts {
            match build(&self.client).timeout(self.timeout).send().await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    tracing::warn!(
                        "Request to node {} failed (attempt {}/{}): {}",
                        dest,
                        attempt + 1,
                        self.attempts,
                        e
                    );
                    if attempt + 1 == self.attempts {
                        break;
                    }
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(CacheError::ConnectionRefused(dest))
    }

    /// Maps a peer's status code onto the error taxonomy. `missing` names the key for a 404.
    fn check(response: Response, dest: NodeId, missing: Option<&Key>) -> CacheResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        tracing::debug!("Node {} answered {}", dest, status);
        match (status, missing) {
            (StatusCode::NOT_FOUND, Some(key)) => Err(CacheError::KeyNotFound(key.to_string())),
            (status, _) if status.is_client_error() => Err(CacheError::RemoteClientError(dest)),
            _ => Err(CacheError::RemoteServerError(dest)),
        }
    }
}

#[async_trait]
impl Sender for HttpSender {
    async fn fetch(&self, key: &Key, dest: NodeId) -> CacheResult<Value> {
        bump(&self.counters.fetch_attempts);
        let url = self.blob_url(key, dest)?;

        let result: CacheResult<Value> = async {
            let response = self
                .send_with_retry(dest, |client| client.get(url.clone()))
                .await?;
            let response = Self::check(response, dest, Some(key))?;
            let body = response
                .bytes()
                .await
                .map_err(|_| CacheError::RemoteServerError(dest))?;
            Ok(body.to_vec())
        }
        .await;

        record(&self.counters.fetch_successes, result)
    }

    async fn store(&self, key: &Key, value: &Value, dest: NodeId) -> CacheResult<()> {
        bump(&self.counters.store_attempts);
        let url = self.blob_url(key, dest)?;

        let result: CacheResult<()> = async {
            let response = self
                .send_with_retry(dest, |client| client.post(url.clone()).body(value.clone()))
                .await?;
            Self::check(response, dest, None).map(|_| ())
        }
        .await;

        record(&self.counters.store_successes, result)
    }

    async fn remove(&self, key: &Key, dest: NodeId) -> CacheResult<()> {
        bump(&self.counters.remove_attempts);
        let url = self.blob_url(key, dest)?;

        let result: CacheResult<()> = async {
            let response = self
                .send_with_retry(dest, |client| client.delete(url.clone()))
                .await?;
            Self::check(response, dest, Some(key)).map(|_| ())
        }
        .await;

        record(&self.counters.remove_successes, result)
    }

    async fn clear(&self, dest: NodeId) -> CacheResult<()> {
        bump(&self.counters.clear_attempts);
        let url = self.with_sender_id(self.endpoint_url(ENDPOINT_CLEAR, dest)?)?;

        let result: CacheResult<()> = async {
            let response = self
                .send_with_retry(dest, |client| client.delete(url.clone()))
                .await?;
            Self::check(response, dest, None).map(|_| ())
        }
        .await;

        record(&self.counters.clear_successes, result)
    }

    async fn bulk_copy(&self, request: &BulkCopyRequest, dest: NodeId) -> CacheResult<()> {
        bump(&self.counters.bulk_copy_attempts);
        let url = self.endpoint_url(ENDPOINT_BULK_COPY, dest)?;
        let body =
            bincode::serialize(request).map_err(|e| CacheError::Serialization(e.to_string()))?;

        let result: CacheResult<()> = async {
            let response = self
                .send_with_retry(dest, |client| {
                    client
                        .post(url.clone())
                        .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                        .body(body.clone())
                })
                .await?;
            Self::check(response, dest, None).map(|_| ())
        }
        .await;

        record(&self.counters.bulk_copy_successes, result)
    }

    async fn send_scale_message(&self, message: &ScaleMessage, dest: NodeId) -> CacheResult<()> {
        let url = self.endpoint_url(ENDPOINT_INFORM, dest)?;
        let response = self
            .send_with_retry(dest, |client| client.post(url.clone()).json(message))
            .await?;
        Self::check(response, dest, None).map(|_| ())
    }

    async fn node_info(&self, dest: NodeId) -> CacheResult<SystemInfo> {
        let url = self.endpoint_url(ENDPOINT_NODE_INFO, dest)?;
        let response = self
            .send_with_retry(dest, |client| client.get(url.clone()))
            .await?;
        Self::check(response, dest, None)?
            .json::<SystemInfo>()
            .await
            .map_err(|e| CacheError::Serialization(e.to_string()))
    }

    fn usage(&self) -> SenderUsageInfo {
        self.counters.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> HttpSender {
        let registry = Arc::new(NodeRegistry::new(vec![
            "localhost:7070".into(),
            "localhost:7071".into(),
        ]));
        HttpSender::new(NodeId(0), registry, &ScalingConfig::default())
    }

    #[test]
    fn test_blob_url_encodes_key_and_sender() {
        let url = sender().blob_url(&Key::new("user/42 x", 3), NodeId(1)).unwrap();

        assert_eq!(
            url.as_str(),
            "http://localhost:7071/v1/blobs/user%2F42%20x/3?senderId=0"
        );
    }

    #[test]
    fn test_unknown_node_is_configuration_error() {
        let result = sender().blob_url(&Key::new("a", 1), NodeId(5));

        assert!(matches!(result, Err(CacheError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_connection_refused() {
        let registry = Arc::new(NodeRegistry::new(vec![
            "127.0.0.1:1".into(),
            "127.0.0.1:1".into(),
        ]));
        let config = ScalingConfig {
            rpc_attempts: 1,
            ..ScalingConfig::default()
        };
        let sender = HttpSender::new(NodeId(0), registry, &config);

        let result = sender.fetch(&Key::new("a", 1), NodeId(1)).await;

        assert_eq!(result, Err(CacheError::ConnectionRefused(NodeId(1))));
        assert_eq!(sender.usage().fetch_attempts, 1);
        assert_eq!(sender.usage().fetch_successes, 0);
    }
}
