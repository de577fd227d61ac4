use crate::anti_entropy::{AntiEntropy, RepairQueue};
use crate::config::NodeConfig;
use crate::consistency::ConsistencyLevel;
use crate::coordinator::{ReplicationCoordinator, ReplicationTimeouts};
use crate::error::KvError;
use crate::heartbeat::Heartbeater;
use crate::membership::{Membership, PeerTransition};
use crate::store::StorageTable;
use crate::task::PeriodicTask;
use crate::transport::{
    Heartbeat, HeartbeatAck, PeerTransport, ReplicateAck, ReplicateRequest, SnapshotMessage,
};
use crate::types::{now_millis, NodeId, PeerMetadata, ReadResult, WriteResult};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub id: NodeId,
    pub address: String,
    pub epoch: u64,
    pub n_kvs: usize,
    pub revision: u64,
    pub cluster_size: usize,
    pub active_peers: usize,
    pub pending_repair: Vec<String>,
    pub peers: Vec<PeerMetadata>,
}

/// One replica of the store.
///
/// Wires the storage table, membership, replication coordinator and
/// anti-entropy together, and owns the background heartbeat and anti-entropy
/// loops. The storage table and membership sit behind independent locks.
pub struct Node<T: PeerTransport> {
    id: NodeId,
    address: String,
    epoch: u64,
    config: NodeConfig,
    store: Arc<StorageTable>,
    membership: Arc<Membership>,
    repair: Arc<RepairQueue>,
    coordinator: ReplicationCoordinator<T>,
    heartbeater: Arc<Heartbeater<T>>,
    anti_entropy: Arc<AntiEntropy<T>>,
    tasks: Mutex<Vec<PeriodicTask>>,
    /// Set from the first `start` until `shutdown`
    starting: AtomicBool,
}

impl<T: PeerTransport> Node<T> {
    pub fn new(config: NodeConfig, transport: Arc<T>) -> Self {
        let id = config
            .node_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let address = config.address.clone();
        let epoch = u64::try_from(now_millis()).unwrap_or_default();

        let store = Arc::new(StorageTable::new(id.clone()));
        let membership = Arc::new(Membership::new(
            address.clone(),
            config.seed_nodes.iter().cloned(),
        ));
        let repair = Arc::new(RepairQueue::new());
        let coordinator = ReplicationCoordinator::new(
            store.clone(),
            membership.clone(),
            transport.clone(),
            repair.clone(),
            ReplicationTimeouts {
                peer: config.peer_timeout,
                write_deadline: config.write_deadline,
            },
        );
        let heartbeater = Arc::new(Heartbeater::new(
            id.clone(),
            address.clone(),
            epoch,
            membership.clone(),
            transport.clone(),
            config.peer_timeout,
            config.heartbeat_timeout,
        ));
        let anti_entropy = Arc::new(AntiEntropy::new(
            address.clone(),
            store.clone(),
            membership.clone(),
            transport,
            repair.clone(),
            config.peer_timeout,
        ));

        info!(%id, %address, "Node created");
        Self {
            id,
            address,
            epoch,
            config,
            store,
            membership,
            repair,
            coordinator,
            heartbeater,
            anti_entropy,
            tasks: Mutex::new(vec![]),
            starting: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn default_consistency(&self) -> ConsistencyLevel {
        self.config.default_consistency
    }

    pub fn store(&self) -> &Arc<StorageTable> {
        &self.store
    }

    pub fn membership(&self) -> &Arc<Membership> {
        &self.membership
    }

    pub async fn create(
        &self,
        key: &str,
        value: impl Into<Vec<u8>>,
        level: ConsistencyLevel,
    ) -> Result<WriteResult, KvError> {
        self.coordinator.create(key, value, level).await
    }

    pub fn read(&self, key: &str) -> Option<ReadResult> {
        self.coordinator.read(key)
    }

    pub async fn update(
        &self,
        key: &str,
        value: impl Into<Vec<u8>>,
        level: ConsistencyLevel,
    ) -> Result<WriteResult, KvError> {
        self.coordinator.update(key, value, level).await
    }

    pub async fn delete(&self, key: &str, level: ConsistencyLevel) -> Result<WriteResult, KvError> {
        self.coordinator.delete(key, level).await
    }

    pub fn register_node(&self, address: &str) -> bool {
        self.membership.register_node(address)
    }

    pub fn remove_node(&self, address: &str) -> bool {
        self.repair.clear(address);
        self.membership.remove_node(address)
    }

    pub fn get_nodes(&self) -> Vec<String> {
        self.membership.get_nodes()
    }

    pub fn peers(&self) -> Vec<PeerMetadata> {
        self.membership.peers()
    }

    /// Inbound heartbeat from another node
    pub fn handle_heartbeat(&self, msg: Heartbeat) -> HeartbeatAck {
        self.membership
            .record_heartbeat(&msg.sender_address, Some(msg.sender_id), msg.epoch);
        HeartbeatAck {
            node_id: self.id.clone(),
            address: self.address.clone(),
            epoch: self.epoch,
        }
    }

    /// Inbound replicated mutation from another node
    pub fn handle_replicate(&self, request: ReplicateRequest) -> ReplicateAck {
        self.coordinator.handle_replicate(request)
    }

    /// Inbound snapshot exchange, answered with our own snapshot
    pub fn handle_merge_snapshot(&self, msg: SnapshotMessage) -> SnapshotMessage {
        self.anti_entropy.handle_merge_snapshot(msg)
    }

    /// Run one heartbeat round now, outside the background loop
    pub async fn heartbeat_round(&self) -> Vec<PeerTransition> {
        self.heartbeater.round().await
    }

    /// Run one anti-entropy round now, outside the background loop
    pub async fn anti_entropy_round(&self) -> usize {
        self.anti_entropy.round().await
    }

    /// Exchange snapshots with one peer
    pub async fn sync_with(&self, peer: &str) -> Result<usize> {
        self.anti_entropy.exchange(peer).await
    }

    /// Contact every known peer and pull its state before serving.
    /// Failures are logged, an isolated node still starts.
    pub async fn bootstrap(&self) {
        let peers = self.membership.get_nodes();
        if peers.is_empty() {
            info!("No peers to bootstrap from, starting fresh");
            return;
        }

        info!("Bootstrapping from {} peers...", peers.len());
        let mut success_count = 0;
        for peer in &peers {
            if let Err(e) = self.heartbeater.ping(peer).await {
                warn!("Failed to bootstrap from peer {peer}: {e}");
                continue;
            }
            match self.anti_entropy.exchange(peer).await {
                Ok(merged) => {
                    success_count += 1;
                    info!("Bootstrapped {merged} entries from peer {peer}");
                }
                Err(e) => warn!("Failed to bootstrap from peer {peer}: {e:#}"),
            }
        }

        if success_count == 0 {
            warn!("Bootstrap: failed to sync from any peer, proceeding anyway");
        } else {
            info!(
                "Bootstrap: synced from {}/{} peers",
                success_count,
                peers.len()
            );
        }
    }

    /// Bootstrap, then start the heartbeat and anti-entropy loops
    pub async fn start(&self) {
        if self.starting.swap(true, Ordering::AcqRel) {
            warn!("Node already started");
            return;
        }
        // Bootstrap runs without the task lock held
        self.bootstrap().await;
        let mut tasks = self.tasks.lock().await;
        tasks.push(
            self.heartbeater
                .clone()
                .spawn(self.config.heartbeat_interval),
        );
        tasks.push(
            self.anti_entropy
                .clone()
                .spawn(self.config.anti_entropy_interval),
        );
        info!(id = %self.id, "Node started");
    }

    /// Stop the background loops, waiting for their in-flight rounds
    pub async fn shutdown(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        self.starting.store(false, Ordering::Release);
        for task in tasks {
            let name = task.name();
            task.stop().await;
            info!(task = name, "Stopped");
        }
        info!(id = %self.id, "Node shut down");
    }

    pub async fn is_running(&self) -> bool {
        !self.tasks.lock().await.is_empty()
    }

    /// Get node status (for debugging/monitoring)
    pub fn status(&self) -> NodeStatus {
        let peers = self.membership.peers();
        NodeStatus {
            id: self.id.clone(),
            address: self.address.clone(),
            epoch: self.epoch,
            n_kvs: self.store.len(),
            revision: self.store.revision(),
            cluster_size: self.membership.cluster_size(),
            active_peers: peers.iter().filter(|p| p.is_active()).count(),
            pending_repair: self.repair.pending(),
            peers,
        }
    }
}
