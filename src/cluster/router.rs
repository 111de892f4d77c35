use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::registry::NodeRegistry;
use super::types::{MigrationState, NodeId, SystemInfo};
use super::usage::{ReceiverCounters, bump, record};
use crate::cache::LocalStore;
use crate::cache::types::{Key, KeyValuePair, Value};
use crate::error::{CacheError, CacheResult};
use crate::hashing::distributor::KeyDistributor;
use crate::hashing::types::{AddedNode, HashRange};
use crate::transport::sender::Sender;

/// Entry point for every cache operation on a node.
///
/// Resolves the owner of each key and serves it from the local store or forwards it
/// to the owner. `origin` is the peer that forwarded a request; such requests are served
/// locally, except that during a scale-out a miss or a moved key is passed once between
/// the previous and the new owner. No request takes more than two hops.
pub struct DistributedCache {
    node_id: NodeId,
    host_name: String,
    registry: Arc<NodeRegistry>,
    distributor: Arc<KeyDistributor>,
    store: Arc<LocalStore>,
    sender: Arc<dyn Sender>,
    migration: RwLock<MigrationState>,
    scale_in_progress: AtomicBool,
    /// Held shared by local stores while they resolve ownership and write, and
    /// exclusively while the ring grows, so no write lands on a stale owner unseen by
    /// the migration snapshot.
    redistribute: RwLock<()>,
    counters: ReceiverCounters,
}

impl DistributedCache {
    pub fn new(
        node_id: NodeId,
        host_name: String,
        registry: Arc<NodeRegistry>,
        distributor: Arc<KeyDistributor>,
        store: Arc<LocalStore>,
        sender: Arc<dyn Sender>,
    ) -> Self {
        Self {
            node_id,
            host_name,
            registry,
            distributor,
            store,
            sender,
            migration: RwLock::new(MigrationState::default()),
            scale_in_progress: AtomicBool::new(false),
            redistribute: RwLock::new(()),
            counters: ReceiverCounters::default(),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn distributor(&self) -> &Arc<KeyDistributor> {
        &self.distributor
    }

    pub fn local(&self) -> &Arc<LocalStore> {
        &self.store
    }

    pub fn sender(&self) -> &Arc<dyn Sender> {
        &self.sender
    }

    // ============================================================
    // KEY OPERATIONS
    // ============================================================

    pub async fn fetch(&self, key: &Key, origin: Option<NodeId>) -> CacheResult<Value> {
        bump(&self.counters.fetch_attempts);
        let result = self.route_fetch(key, origin).await;
        record(&self.counters.fetch_successes, result)
    }

    async fn route_fetch(&self, key: &Key, origin: Option<NodeId>) -> CacheResult<Value> {
        if let Some(origin) = origin {
            tracing::trace!("Serving {} locally for node {}", key, origin);
            return match self.local_fetch(key) {
                Err(CacheError::KeyNotFound(_)) if self.is_scale_in_progress() => {
                    self.fetch_from_counterpart(key, origin).await
                }
                result => result,
            };
        }

        let (owner, previous) = self.distributor.owner_and_predecessor(key)?;

        if owner == self.node_id {
            return match self.local_fetch(key) {
                Err(CacheError::KeyNotFound(_))
                    if previous != self.node_id && self.is_scale_in_progress() =>
                {
                    // The entry may not have been copied over yet.
                    tracing::debug!("Miss on {} during scale-out, asking node {}", key, previous);
                    self.sender.fetch(key, previous).await
                }
                result => result,
            };
        }

        if previous == self.node_id {
            let hash = self.distributor.key_hash(key);
            let copying = self.migration.read().is_copying(hash, owner);
            if copying && let Some(value) = self.store.fetch(key) {
                tracing::debug!("Served {} from migration source", key);
                return Ok(value);
            }
        }

        tracing::debug!("Forwarding fetch of {} to node {}", key, owner);
        self.sender.fetch(key, owner).await
    }

    /// A forwarded miss during scale-out. The sender's ring may disagree with ours about
    /// whether the key already moved, so ask the other end of the migration once, unless
    /// that is where the request came from.
    async fn fetch_from_counterpart(&self, key: &Key, origin: NodeId) -> CacheResult<Value> {
        let (owner, previous) = self.distributor.owner_and_predecessor(key)?;
        let counterpart = if owner == self.node_id { previous } else { owner };

        if (owner != self.node_id && previous != self.node_id)
            || counterpart == self.node_id
            || counterpart == origin
        {
            return Err(CacheError::KeyNotFound(key.to_string()));
        }

        tracing::debug!(
            "Forwarded miss on {} during scale-out, asking node {}",
            key,
            counterpart
        );
        self.sender.fetch(key, counterpart).await
    }

    fn local_fetch(&self, key: &Key) -> CacheResult<Value> {
        self.store
            .fetch(key)
            .ok_or_else(|| CacheError::KeyNotFound(key.to_string()))
    }

    /// Writes always go to the owner under the current topology, even mid-migration.
    pub async fn store(&self, key: Key, value: Value, origin: Option<NodeId>) -> CacheResult<()> {
        bump(&self.counters.store_attempts);
        let result = self.route_store(key, value, origin).await;
        record(&self.counters.store_successes, result)
    }

    /// A forwarded store is passed on once more if this node's ring already gave the key
    /// to another node; the sender's ring may not have caught up with a scale-out.
    async fn route_store(&self, key: Key, value: Value, origin: Option<NodeId>) -> CacheResult<()> {
        let owner = {
            let _guard = self.redistribute.read();
            let owner = self.distributor.primary_owner(&key)?;
            if owner == self.node_id || origin == Some(owner) {
                return self.store.store(key, value);
            }
            owner
        };

        match origin {
            Some(origin) => tracing::debug!(
                "Node {} sent {} under an older ring, passing it to node {}",
                origin,
                key,
                owner
            ),
            None => tracing::debug!("Forwarding store of {} to node {}", key, owner),
        }
        self.sender.store(&key, &value, owner).await
    }

    /// Refused while a scale-out is running.
    pub async fn remove(&self, key: &Key, origin: Option<NodeId>) -> CacheResult<()> {
        if origin.is_none() && self.is_scale_in_progress() {
            return Err(CacheError::ScaleInProgress(
                "wait for scaling to complete before removing".to_string(),
            ));
        }

        if origin.is_some() {
            return self.local_remove(key);
        }

        let owner = self.distributor.primary_owner(key)?;
        if owner == self.node_id {
            self.local_remove(key)
        } else {
            self.sender.remove(key, owner).await
        }
    }

    fn local_remove(&self, key: &Key) -> CacheResult<()> {
        self.store
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| CacheError::KeyNotFound(key.to_string()))
    }

    /// Clears this node, and every other node too when a client asked.
    pub async fn clear(&self, client_request: bool) -> CacheResult<()> {
        if self.is_scale_in_progress() {
            return Err(CacheError::ScaleInProgress(
                "wait for scaling to complete before clearing".to_string(),
            ));
        }

        self.store.clear();
        if !client_request {
            return Ok(());
        }

        let mut first_error = None;
        for peer in self.registry.peers(self.node_id) {
            if let Err(e) = self.sender.clear(peer).await {
                tracing::warn!("Failed to clear node {}: {}", peer, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    // ============================================================
    // STATISTICS
    // ============================================================

    pub fn system_info(&self) -> SystemInfo {
        SystemInfo {
            node_id: self.node_id,
            host_name: self.host_name.clone(),
            memory_usage: self.store.memory_usage(),
            cache_info: self.store.info(),
            sender_usage: self.sender.usage(),
            receiver_usage: self.counters.snapshot(),
            scale_in_progress: self.is_scale_in_progress(),
            copy_in_progress: self.migration.read().copy_in_progress,
        }
    }

    /// This node's info followed by every reachable peer's.
    pub async fn global_info(&self) -> Vec<SystemInfo> {
        let mut infos = vec![self.system_info()];
        for peer in self.registry.peers(self.node_id) {
            match self.sender.node_info(peer).await {
                Ok(info) => infos.push(info),
                Err(e) => tracing::warn!("No info from node {}: {}", peer, e),
            }
        }
        infos
    }

    pub fn record_invalid_request(&self) {
        bump(&self.counters.invalid_requests);
    }

    // ============================================================
    // SCALE-OUT SUPPORT
    // ============================================================

    pub fn is_scale_in_progress(&self) -> bool {
        self.scale_in_progress.load(Ordering::SeqCst)
    }

    pub fn set_scale_in_progress(&self, value: bool) {
        self.scale_in_progress.store(value, Ordering::SeqCst);
    }

    pub fn migration(&self) -> MigrationState {
        self.migration.read().clone()
    }

    /// Adds the next node to the ring once in-flight local stores have finished.
    pub fn grow_ring(&self) -> CacheResult<AddedNode> {
        let _guard = self.redistribute.write();
        self.distributor.add_node()
    }

    /// Marks `range` as being copied to `target`. Returns false if a copy is already running.
    pub fn begin_copy(&self, range: HashRange, target: NodeId) -> bool {
        let mut migration = self.migration.write();
        if migration.copy_in_progress {
            return false;
        }
        *migration = MigrationState {
            copy_in_progress: true,
            range: Some(range),
            target: Some(target),
            cursor: 0,
        };
        true
    }

    pub fn advance_copy(&self, cursor: usize) {
        self.migration.write().cursor = cursor;
    }

    pub fn finish_copy(&self) {
        let mut migration = self.migration.write();
        migration.copy_in_progress = false;
        migration.range = None;
        migration.target = None;
    }

    /// Stores a migrated batch locally. Returns how many entries were stored.
    pub fn bulk_local_store(&self, values: Vec<KeyValuePair>) -> usize {
        let total = values.len();
        let mut stored = 0;
        for pair in values {
            let (key, value) = pair.into_parts();
            match self.store.store(key.clone(), value) {
                Ok(()) => stored += 1,
                Err(e) => tracing::warn!("Dropped migrated entry {}: {}", key, e),
            }
        }
        tracing::debug!("Bulk stored {}/{} entries", stored, total);
        stored
    }
}
