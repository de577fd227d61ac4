use crate::anti_entropy::RepairQueue;
use crate::consistency::ConsistencyLevel;
use crate::error::KvError;
use crate::membership::Membership;
use crate::store::StorageTable;
use crate::transport::{Operation, PeerTransport, ReplicateAck, ReplicateRequest};
use crate::types::{now_micros, NodeId, ReadResult, StorageEntry, WriteResult};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, trace, warn};

/// Timeouts bounding one replicated write
#[derive(Debug, Clone, Copy)]
pub struct ReplicationTimeouts {
    /// Per peer call
    pub peer: Duration,
    /// Whole ack collection
    pub write_deadline: Duration,
}

/// Orchestrates one logical write across the cluster:
/// 1. Apply locally (a local failure aborts before any fan-out)
/// 2. Send the mutation to every Active peer concurrently
/// 3. Count distinct acks, the local apply included
/// 4. Succeed once the consistency level's threshold is reached
///
/// Peers that fail are flagged for anti-entropy repair, never evicted here.
pub struct ReplicationCoordinator<T: PeerTransport> {
    store: Arc<StorageTable>,
    membership: Arc<Membership>,
    transport: Arc<T>,
    repair: Arc<RepairQueue>,
    timeouts: ReplicationTimeouts,
}

impl<T: PeerTransport> ReplicationCoordinator<T> {
    pub fn new(
        store: Arc<StorageTable>,
        membership: Arc<Membership>,
        transport: Arc<T>,
        repair: Arc<RepairQueue>,
        timeouts: ReplicationTimeouts,
    ) -> Self {
        Self {
            store,
            membership,
            transport,
            repair,
            timeouts,
        }
    }

    fn node_id(&self) -> &NodeId {
        self.store.node_id()
    }

    pub async fn create(
        &self,
        key: &str,
        value: impl Into<Vec<u8>>,
        level: ConsistencyLevel,
    ) -> Result<WriteResult, KvError> {
        let entry = self.store.create(key, value)?;
        self.replicate(key, entry, Operation::Create, level).await
    }

    pub async fn update(
        &self,
        key: &str,
        value: impl Into<Vec<u8>>,
        level: ConsistencyLevel,
    ) -> Result<WriteResult, KvError> {
        let entry = self.store.update(key, value)?;
        self.replicate(key, entry, Operation::Update, level).await
    }

    pub async fn delete(&self, key: &str, level: ConsistencyLevel) -> Result<WriteResult, KvError> {
        let removed = self.store.delete(key)?;
        let revision = StorageEntry::new(
            vec![],
            removed.version + 1,
            now_micros(),
            self.node_id().clone(),
        );
        self.replicate(key, revision, Operation::Delete, level).await
    }

    /// Local read, served without contacting peers
    pub fn read(&self, key: &str) -> Option<ReadResult> {
        self.store.read_versioned(key).map(|entry| ReadResult {
            value: entry.value,
            version: entry.version,
            timestamp: entry.timestamp,
            node_id: self.node_id().clone(),
        })
    }

    fn spawn_replicate(
        &self,
        peer: String,
        request: ReplicateRequest,
    ) -> JoinHandle<Result<ReplicateAck, KvError>> {
        let transport = self.transport.clone();
        let repair = self.repair.clone();
        let peer_timeout = self.timeouts.peer;
        tokio::spawn(async move {
            let reason = match timeout(peer_timeout, transport.replicate(&peer, request)).await {
                Ok(Ok(ack)) => return Ok(ack),
                Ok(Err(e)) => format!("{e:#}"),
                Err(_) => format!("no ack within {peer_timeout:?}"),
            };
            repair.flag(&peer);
            Err(KvError::PeerUnreachable {
                address: peer,
                reason,
            })
        })
    }

    #[tracing::instrument(skip(self, entry), fields(version = entry.version))]
    async fn replicate(
        &self,
        key: &str,
        entry: StorageEntry,
        operation: Operation,
        level: ConsistencyLevel,
    ) -> Result<WriteResult, KvError> {
        let required = level.required_acks(self.membership.cluster_size());
        let mut result = WriteResult::new(key.to_string(), entry.version, required);
        result.add_ack(self.node_id().clone());

        let request =
            ReplicateRequest::from_entry(self.node_id().clone(), key.to_string(), entry, operation);
        let peers = self.membership.active_peers();
        debug!(peers = peers.len(), required, "Fanning out {operation:?}");

        // Spawned so stragglers still get the write after we return
        let mut pending: FuturesUnordered<_> = peers
            .into_iter()
            .map(|peer| self.spawn_replicate(peer.address, request.clone()))
            .collect();

        let deadline = Instant::now() + self.timeouts.write_deadline;
        while !result.quorum_met() {
            match timeout_at(deadline, pending.next()).await {
                Ok(Some(Ok(Ok(ack)))) => {
                    trace!(node = %ack.node_id, applied = ack.applied, "Ack");
                    result.add_ack(ack.node_id);
                }
                Ok(Some(Ok(Err(e)))) => warn!("Replication failed: {e}"),
                Ok(Some(Err(e))) => warn!("Replication task failed: {e}"),
                Ok(None) => break,
                Err(_) => {
                    warn!("Write deadline of {:?} reached", self.timeouts.write_deadline);
                    break;
                }
            }
        }

        result.success = result.quorum_met();
        if !result.success {
            warn!(
                required,
                acked = result.ack_count(),
                "Quorum not met, local write is kept"
            );
            return Err(KvError::QuorumNotMet {
                required,
                acked: result.ack_count(),
            });
        }
        Ok(result)
    }

    /// Apply a mutation sent by another node.
    ///
    /// Idempotent by key and version: creates and updates are single-key
    /// merges, deletes only remove an older local revision.
    #[tracing::instrument(skip(self, request), fields(from = %request.sender_id, key = %request.key))]
    pub fn handle_replicate(&self, request: ReplicateRequest) -> ReplicateAck {
        let applied = match request.operation {
            Operation::Create | Operation::Update => {
                let entry = request.entry();
                self.store.merge_entry(request.key, entry)
            }
            Operation::Delete => self.store.apply_delete(&request.key, request.version),
        };
        debug!(applied, "Handled replicated {:?}", request.operation);
        ReplicateAck {
            node_id: self.node_id().clone(),
            applied,
        }
    }
}
