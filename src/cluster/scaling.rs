//! Scale-out Coordination
//!
//! Drives the addition of one node at a time:
//!
//! 1. An old node announces a launch intent (`LaunchNode`) to every peer and arms a
//!    launch timer. Peers keep the lowest announcing id; a node that learns about a lower
//!    id cancels its own timer, so exactly one node launches.
//! 2. The new node boots, places itself on the ring and broadcasts `Ready`.
//! 3. Every old node registers the new host and grows its ring. The previous owner of
//!    the split range streams those keys to the new node in batches; every old node then
//!    sends `CopyComplete`.
//! 4. Once all old nodes completed, the new node broadcasts `ScaleComplete` and routing
//!    stops double-checking the previous owner.

use dashmap::DashSet;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::launcher::NodeLauncher;
use super::router::DistributedCache;
use super::types::{BulkCopyRequest, NodeId, ScaleMessage, ScaleMessageKind};
use crate::cache::types::{Key, KeyValuePair};
use crate::config::ScalingConfig;
use crate::error::{CacheError, CacheResult};
use crate::hashing::types::AddedNode;
use crate::transport::sender::Sender;

struct LaunchState {
    /// This node armed a launch timer that has not fired or been cancelled.
    desire: bool,
    /// Lowest node id that announced a launch in the current round.
    min_launching: Option<NodeId>,
    timer: Option<JoinHandle<()>>,
    /// Nodes in the cluster before the current scale-out; also the new node's id.
    base_count: usize,
}

pub struct ScaleCoordinator {
    cache: Arc<DistributedCache>,
    launcher: Arc<dyn NodeLauncher>,
    config: ScalingConfig,
    state: Mutex<LaunchState>,
    /// Old nodes that finished copying to this (new) node.
    copy_complete: DashSet<NodeId>,
}

impl ScaleCoordinator {
    pub fn new(
        cache: Arc<DistributedCache>,
        launcher: Arc<dyn NodeLauncher>,
        config: ScalingConfig,
    ) -> Arc<Self> {
        let base_count = cache.distributor().node_count();
        Arc::new(Self {
            cache,
            launcher,
            config,
            state: Mutex::new(LaunchState {
                desire: false,
                min_launching: None,
                timer: None,
                base_count,
            }),
            copy_complete: DashSet::new(),
        })
    }

    pub fn cache(&self) -> &Arc<DistributedCache> {
        &self.cache
    }

    /// Id the node being added in the current round gets.
    pub fn new_node_id(&self) -> NodeId {
        NodeId(self.state.lock().base_count)
    }

    fn node_id(&self) -> NodeId {
        self.cache.node_id()
    }

    // ============================================================
    // LAUNCH TIE-BREAK
    // ============================================================

    /// Starts a scale-out from this node. Returns false if one is already under way.
    pub async fn initiate_launch(self: &Arc<Self>) -> bool {
        {
            let mut state = self.state.lock();
            if state.min_launching.is_some() || self.cache.is_scale_in_progress() {
                tracing::info!("Scale-out already under way, not launching");
                return false;
            }
            state.min_launching = Some(self.node_id());
            state.desire = true;
            self.cache.set_scale_in_progress(true);
            self.copy_complete.clear();

            let coordinator = Arc::clone(self);
            let delay = self.config.launch_delay;
            state.timer = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                coordinator.fire_launch();
            }));
        }

        tracing::info!("Announcing launch intent from node {}", self.node_id());
        let message = ScaleMessage::new(self.node_id(), ScaleMessageKind::LaunchNode);
        let peers = self.cache.registry().peers(self.node_id());
        for (peer, result) in self.cache.sender().broadcast(&message, &peers).await {
            if let Err(CacheError::RemoteClientError(_)) = result {
                tracing::info!("Node {} already follows a lower launching node", peer);
            }
        }
        true
    }

    fn fire_launch(&self) {
        let new_node = {
            let mut state = self.state.lock();
            if !state.desire {
                return;
            }
            state.desire = false;
            state.timer = None;
            NodeId(state.base_count)
        };

        match self.launcher.launch(new_node) {
            Ok(()) => tracing::info!("Won the launch tie-break, launched node {}", new_node),
            Err(e) => tracing::error!("Failed to launch node {}: {}", new_node, e),
        }
    }

    /// Records a peer's launch intent. True if it is the lowest seen so far.
    fn handle_launch_notice(&self, sender: NodeId) -> bool {
        let mut state = self.state.lock();
        self.cache.set_scale_in_progress(true);

        if state.min_launching.is_some_and(|min| sender >= min) {
            return false;
        }
        if state.min_launching.is_none() {
            self.copy_complete.clear();
        }
        state.min_launching = Some(sender);

        if state.desire {
            state.desire = false;
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            tracing::info!("Node {} has a lower id, cancelled own launch", sender);
        }
        true
    }

    // ============================================================
    // MESSAGE HANDLING
    // ============================================================

    /// Validates and applies a scale-out message. `Ok(false)` means a launch intent lost
    /// the tie-break.
    pub fn handle_message(self: &Arc<Self>, message: ScaleMessage) -> CacheResult<bool> {
        self.validate(&message)?;
        tracing::info!("Got {:?} from node {}", message.kind, message.node_id);

        match message.kind {
            ScaleMessageKind::LaunchNode => Ok(self.handle_launch_notice(message.node_id)),
            ScaleMessageKind::Ready => {
                self.handle_ready(&message.host_name)?;
                Ok(true)
            }
            ScaleMessageKind::CopyComplete => {
                self.handle_copy_complete(message.node_id);
                Ok(true)
            }
            ScaleMessageKind::ScaleComplete => {
                self.handle_scale_complete();
                Ok(true)
            }
        }
    }

    fn validate(&self, message: &ScaleMessage) -> CacheResult<()> {
        let new_node = self.new_node_id();
        let invalid = |reason: &str| Err(CacheError::InvalidInput(reason.to_string()));

        if !self.cache.is_scale_in_progress() && message.kind != ScaleMessageKind::LaunchNode {
            return invalid("Scaling not currently in progress");
        }
        if message.node_id > new_node {
            return invalid("Invalid node id");
        }

        match message.kind {
            ScaleMessageKind::LaunchNode | ScaleMessageKind::CopyComplete => {
                if message.node_id == new_node {
                    return invalid("New node cannot send this message type");
                }
            }
            ScaleMessageKind::Ready | ScaleMessageKind::ScaleComplete => {
                if message.node_id != new_node {
                    return invalid("Only new node can send this message type");
                }
            }
        }

        if message.kind == ScaleMessageKind::Ready && message.host_name.trim().is_empty() {
            return invalid("Missing host name");
        }
        if message.kind == ScaleMessageKind::CopyComplete && self.node_id() != new_node {
            return invalid("Only new node can accept this message type");
        }
        Ok(())
    }

    /// The new node is up: register it, grow the ring, start copying.
    fn handle_ready(self: &Arc<Self>, host: &str) -> CacheResult<()> {
        let new_node = self.new_node_id();
        if self.cache.distributor().node_count() > new_node.0 {
            tracing::warn!("Node {} already on the ring, ignoring repeated Ready", new_node);
            return Ok(());
        }

        let registered = self.cache.registry().append(host)?;
        if registered != new_node {
            return Err(CacheError::InvalidInput(format!(
                "Host {} is already registered as node {}",
                host, registered
            )));
        }

        let added = self.cache.grow_ring()?;
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            coordinator.run_copy(added).await;
        });
        Ok(())
    }

    fn handle_copy_complete(self: &Arc<Self>, sender: NodeId) {
        let base_count = self.state.lock().base_count;
        if !self.copy_complete.insert(sender) {
            return;
        }
        tracing::info!(
            "Node {} finished copying ({}/{})",
            sender,
            self.copy_complete.len(),
            base_count
        );

        if self.copy_complete.len() == base_count {
            self.finish_scale();
            let coordinator = Arc::clone(self);
            tokio::spawn(async move {
                let message =
                    ScaleMessage::new(coordinator.node_id(), ScaleMessageKind::ScaleComplete);
                let peers = coordinator.cache.registry().peers(coordinator.node_id());
                coordinator.cache.sender().broadcast(&message, &peers).await;
                tracing::info!("Scale-out complete");
            });
        }
    }

    fn handle_scale_complete(&self) {
        self.finish_scale();
    }

    fn finish_scale(&self) {
        let mut state = self.state.lock();
        state.base_count = self.cache.distributor().node_count();
        state.min_launching = None;
        state.desire = false;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        self.cache.set_scale_in_progress(false);
    }

    // ============================================================
    // NEW NODE
    // ============================================================

    /// Places this freshly launched node on the ring and in the registry. Must run before
    /// the node serves requests.
    pub fn join(&self) -> CacheResult<()> {
        let registered = self.cache.registry().append(self.cache.host_name())?;
        let added = self.cache.grow_ring()?;
        if registered != self.node_id() || added.node_id != self.node_id() {
            return Err(CacheError::Configuration(format!(
                "Node {} joined as registry entry {} and ring node {}",
                self.node_id(),
                registered,
                added.node_id
            )));
        }

        let mut state = self.state.lock();
        state.base_count = self.node_id().0;
        state.min_launching = None;
        self.copy_complete.clear();
        self.cache.set_scale_in_progress(true);
        tracing::info!(
            "Joined ring at position {} taking over from node {}",
            added.position,
            added.previous_owner
        );
        Ok(())
    }

    /// Tells every old node that this node is ready to receive its range.
    pub async fn announce_ready(&self) -> CacheResult<()> {
        let message = ScaleMessage::ready(self.node_id(), self.cache.host_name());
        let peers = self.cache.registry().peers(self.node_id());

        let mut first_error = None;
        for (_, result) in self.cache.sender().broadcast(&message, &peers).await {
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Stores a batch copied from an old node.
    pub fn handle_bulk_copy(&self, request: BulkCopyRequest) -> CacheResult<usize> {
        let new_node = self.new_node_id();
        if !self.cache.is_scale_in_progress() || self.node_id() != new_node {
            return Err(CacheError::InvalidInput(
                "New node can only receive bulk copy requests while scaling is in progress"
                    .to_string(),
            ));
        }
        if request.node_id >= new_node {
            return Err(CacheError::InvalidInput("Invalid node id".to_string()));
        }
        Ok(self.cache.bulk_local_store(request.values))
    }

    // ============================================================
    // COPY TASK
    // ============================================================

    /// Streams the split range to the new node if this node owned it, then reports
    /// completion and drops the copied entries.
    async fn run_copy(self: Arc<Self>, added: AddedNode) {
        let target = added.node_id;
        let mut copied: Vec<Key> = Vec::new();
        let copying = added.previous_owner == self.node_id()
            && self.cache.begin_copy(added.range, target);

        if copying {
            let store = Arc::clone(self.cache.local());
            let keys = store.keys_in_range(&added.range);
            tracing::info!(
                "Copying {} keys in [{}, {}) to node {}",
                keys.len(),
                added.range.start,
                added.range.end,
                target
            );

            let mut cursor = 0;
            for batch in keys.chunks(self.config.batch_size.max(1)) {
                let values: Vec<KeyValuePair> = batch
                    .iter()
                    .filter_map(|key| {
                        store
                            .peek(key)
                            .map(|value| KeyValuePair::new(key.clone(), value))
                    })
                    .collect();
                cursor += batch.len();

                if !values.is_empty() {
                    let sent: Vec<Key> = values
                        .iter()
                        .map(|pair| Key::new(pair.key.clone(), pair.version))
                        .collect();
                    let request = BulkCopyRequest {
                        node_id: self.node_id(),
                        values,
                    };
                    if self.send_batch(&request, target).await {
                        copied.extend(sent);
                    } else {
                        tracing::error!(
                            "Batch of {} keys never reached node {}, keeping them locally",
                            sent.len(),
                            target
                        );
                    }
                }
                self.cache.advance_copy(cursor);
            }
        }

        let message = ScaleMessage::new(self.node_id(), ScaleMessageKind::CopyComplete);
        if let Err(e) = self.send_with_resend(target, |sender| {
            let message = message.clone();
            async move { sender.send_scale_message(&message, target).await }
        })
        .await
        {
            tracing::error!("Node {} was not told that copying finished: {}", target, e);
        }

        if copying {
            for key in &copied {
                self.cache.local().remove(key);
            }
            self.cache.finish_copy();
            tracing::info!("Copy to node {} done, released {} keys", target, copied.len());
        }
    }

    async fn send_batch(&self, request: &BulkCopyRequest, target: NodeId) -> bool {
        let request = request.clone();
        self.send_with_resend(target, |sender| {
            let request = request.clone();
            async move { sender.bulk_copy(&request, target).await }
        })
        .await
        .is_ok()
    }

    /// Resends after retryable failures with a growing pause, up to the configured
    /// number of attempts.
    async fn send_with_resend<F, Fut>(&self, target: NodeId, send: F) -> CacheResult<()>
    where
        F: Fn(Arc<dyn Sender>) -> Fut,
        Fut: std::future::Future<Output = CacheResult<()>>,
    {
        let attempts = self.config.rpc_attempts.max(1);
        let mut pause = Duration::from_millis(100);
        let mut last = CacheError::ConnectionRefused(target);

        for attempt in 1..=attempts {
            match send(Arc::clone(self.cache.sender())).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    tracing::warn!(
                        "Attempt {} to node {} failed: {}, resending",
                        attempt,
                        target,
                        e
                    );
                    tokio::time::sleep(pause).await;
                    pause *= 2;
                    last = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last)
    }
}
