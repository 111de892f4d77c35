//! Transport Module Tests
//!
//! Boots real nodes on ephemeral ports with `axum::serve` and drives them over HTTP,
//! peers talking through `HttpSender`.
//!
//! ## Test Scopes
//! - **Blobs**: store/fetch/remove across nodes, error bodies.
//! - **Validation**: malformed versions, sender ids and bodies.
//! - **Control plane**: clear, info, scale-out messages, bulk copy.

#[cfg(test)]
mod tests {
    use crate::cache::LocalStore;
    use crate::cache::types::{Key, KeyValuePair};
    use crate::cluster::launcher::NodeLauncher;
    use crate::cluster::registry::NodeRegistry;
    use crate::cluster::router::DistributedCache;
    use crate::cluster::scaling::ScaleCoordinator;
    use crate::cluster::types::{
        BulkCopyRequest, NodeId, ScaleMessage, ScaleMessageKind, SystemInfo,
    };
    use crate::config::{CacheConfig, ScalingConfig};
    use crate::hashing::distributor::KeyDistributor;
    use crate::hashing::hasher::NodeHasher;
    use crate::transport::protocol::{ErrorResponse, InformResponse};
    use crate::transport::sender::HttpSender;
    use crate::transport::server::router;
    use reqwest::StatusCode;
    use std::sync::Arc;

    struct NoLauncher;

    impl NodeLauncher for NoLauncher {
        fn launch(&self, _node_id: NodeId) -> anyhow::Result<()> {
            Ok(())
        }
    }

    /// Starts `size` nodes and returns their addresses in node-id order.
    async fn start_cluster(size: usize) -> Vec<String> {
        let mut listeners = Vec::new();
        for _ in 0..size {
            listeners.push(tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap());
        }
        let hosts: Vec<String> = listeners
            .iter()
            .map(|l| l.local_addr().unwrap().to_string())
            .collect();

        for (id, listener) in listeners.into_iter().enumerate() {
            let registry = Arc::new(NodeRegistry::new(hosts.clone()));
            let distributor = Arc::new(KeyDistributor::new(NodeHasher::new(), size).unwrap());
            let store = Arc::new(LocalStore::new(&CacheConfig::default(), NodeHasher::new()));
            let sender = Arc::new(HttpSender::new(
                NodeId(id),
                Arc::clone(&registry),
                &ScalingConfig::default(),
            ));
            let cache = Arc::new(DistributedCache::new(
                NodeId(id),
                hosts[id].clone(),
                registry,
                distributor,
                store,
                sender,
            ));
            let coordinator =
                ScaleCoordinator::new(Arc::clone(&cache), Arc::new(NoLauncher), ScalingConfig::default());
            let app = router(cache, coordinator);

            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });
        }
        hosts
    }

    fn blob(host: &str, key: &str, version: &str) -> String {
        format!("http://{}/v1/blobs/{}/{}", host, key, version)
    }

    async fn node_info(client: &reqwest::Client, host: &str) -> SystemInfo {
        client
            .get(format!("http://{}/v1/node-info", host))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    // ============================================================
    // BLOB TESTS
    // ============================================================

    #[tokio::test]
    async fn test_value_stored_on_one_node_is_readable_from_all() {
        // ARRANGE
        let hosts = start_cluster(2).await;
        let client = reqwest::Client::new();

        // ACT
        let response = client
            .post(blob(&hosts[0], "user:42", "1"))
            .body("alice")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // ASSERT
        for host in &hosts {
            let response = client.get(blob(host, "user:42", "1")).send().await.unwrap();
            assert_eq!(response.status(), StatusCode::OK, "Fetch via {} failed", host);
            assert_eq!(response.bytes().await.unwrap().as_ref(), b"alice");

            let missing = client.get(blob(host, "user:42", "2")).send().await.unwrap();
            assert_eq!(missing.status(), StatusCode::NOT_FOUND);
            let body: ErrorResponse = missing.json().await.unwrap();
            assert_eq!(body.error, "key_not_found");
        }

        let total: usize = [
            node_info(&client, &hosts[0]).await,
            node_info(&client, &hosts[1]).await,
        ]
        .iter()
        .map(|info| info.cache_info.total_keys)
        .sum();
        assert_eq!(total, 1, "The value lives on its owner only");
    }

    #[tokio::test]
    async fn test_remove_and_clear_over_http() {
        let hosts = start_cluster(2).await;
        let client = reqwest::Client::new();
        for i in 0..20 {
            let response = client
                .post(blob(&hosts[0], &format!("k{}", i), "1"))
                .body(vec![i as u8 + 1])
                .send()
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let removed = client.delete(blob(&hosts[1], "k3", "1")).send().await.unwrap();
        assert_eq!(removed.status(), StatusCode::OK);
        let gone = client.get(blob(&hosts[0], "k3", "1")).send().await.unwrap();
        assert_eq!(gone.status(), StatusCode::NOT_FOUND);
        let again = client.delete(blob(&hosts[0], "k3", "1")).send().await.unwrap();
        assert_eq!(again.status(), StatusCode::NOT_FOUND);

        let cleared = client
            .delete(format!("http://{}/v1/clear", hosts[1]))
            .send()
            .await
            .unwrap();
        assert_eq!(cleared.status(), StatusCode::OK);
        for host in &hosts {
            assert_eq!(node_info(&client, host).await.cache_info.total_keys, 0);
        }
    }

    #[tokio::test]
    async fn test_malformed_requests_are_rejected() {
        let hosts = start_cluster(2).await;
        let client = reqwest::Client::new();

        let requests = vec![
            client.get(blob(&hosts[0], "a", "-1")),
            client.get(blob(&hosts[0], "a", "one")),
            client.get(format!("{}?senderId=-1", blob(&hosts[0], "a", "1"))),
            client.get(format!("{}?senderId=9", blob(&hosts[0], "a", "1"))),
            client.post(blob(&hosts[0], "a", "1")),
        ];
        let count = requests.len() as u64;

        for request in requests {
            let response = request.send().await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let body: ErrorResponse = response.json().await.unwrap();
            assert_eq!(body.error, "invalid_input");
            assert_eq!(body.node, NodeId(0));
        }

        let info = node_info(&client, &hosts[0]).await;
        assert_eq!(info.receiver_usage.invalid_requests, count);
    }

    // ============================================================
    // CONTROL PLANE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_global_info_and_hello() {
        let hosts = start_cluster(2).await;
        let client = reqwest::Client::new();

        let infos: Vec<SystemInfo> = client
            .get(format!("http://{}/v1/global-info", hosts[1]))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].node_id, NodeId(1));
        assert_eq!(infos[1].host_name, hosts[0]);

        let hello = client
            .get(format!("http://{}/v1/hello-world", hosts[0]))
            .send()
            .await
            .unwrap();
        assert_eq!(hello.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_inform_tie_break_and_scale_guard() {
        let hosts = start_cluster(2).await;
        let client = reqwest::Client::new();
        let inform = format!("http://{}/v1/inform", hosts[0]);

        // No scale-out yet: only a launch intent is acceptable
        let early = client
            .post(&inform)
            .json(&ScaleMessage::ready(NodeId(2), "localhost:7072"))
            .send()
            .await
            .unwrap();
        assert_eq!(early.status(), StatusCode::BAD_REQUEST);

        let launch = ScaleMessage::new(NodeId(1), ScaleMessageKind::LaunchNode);
        let first = client.post(&inform).json(&launch).send().await.unwrap();
        assert_eq!(first.status(), StatusCode::ACCEPTED);
        let second = client.post(&inform).json(&launch).send().await.unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
        let body: InformResponse = second.json().await.unwrap();
        assert!(!body.accepted);

        // Removal is refused while scaling
        let removed = client.delete(blob(&hosts[0], "a", "1")).send().await.unwrap();
        assert_eq!(removed.status(), StatusCode::CONFLICT);
        let body: ErrorResponse = removed.json().await.unwrap();
        assert_eq!(body.error, "scale_in_progress");
    }

    #[tokio::test]
    async fn test_bulk_copy_validation() {
        let hosts = start_cluster(2).await;
        let client = reqwest::Client::new();
        let url = format!("http://{}/v1/bulk-copy", hosts[0]);

        let garbage = client.post(&url).body(vec![0xff; 3]).send().await.unwrap();
        assert_eq!(garbage.status(), StatusCode::BAD_REQUEST);

        let request = BulkCopyRequest {
            node_id: NodeId(1),
            values: vec![KeyValuePair::new(Key::new("a", 1), b"x".to_vec())],
        };
        let not_new_node = client
            .post(&url)
            .body(bincode::serialize(&request).unwrap())
            .send()
            .await
            .unwrap();
        assert_eq!(not_new_node.status(), StatusCode::BAD_REQUEST);
    }
}
