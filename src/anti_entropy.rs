use crate::membership::Membership;
use crate::store::StorageTable;
use crate::task::PeriodicTask;
use crate::transport::{PeerTransport, SnapshotMessage};
use crate::types::NodeId;
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Peers that missed a replicated write and need a snapshot push
#[derive(Default)]
pub struct RepairQueue {
    peers: Mutex<BTreeSet<String>>,
}

impl RepairQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.peers.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn flag(&self, address: &str) {
        if self.lock().insert(address.to_string()) {
            debug!(address, "Peer flagged for repair");
        }
    }

    pub fn clear(&self, address: &str) {
        self.lock().remove(address);
    }

    pub fn is_flagged(&self, address: &str) -> bool {
        self.lock().contains(address)
    }

    pub fn pending(&self) -> Vec<String> {
        self.lock().iter().cloned().collect()
    }
}

/// Snapshot exchange between replicas.
///
/// Protocol:
/// - Initiator sends its full snapshot
/// - Responder merges it and answers with its own snapshot
/// - Initiator merges the answer
///
/// After one exchange both sides hold the newer revision of every key either
/// of them had.
pub struct AntiEntropy<T: PeerTransport> {
    node_id: NodeId,
    address: String,
    store: Arc<StorageTable>,
    membership: Arc<Membership>,
    transport: Arc<T>,
    repair: Arc<RepairQueue>,
    peer_timeout: Duration,
    cursor: AtomicUsize,
}

impl<T: PeerTransport> AntiEntropy<T> {
    pub fn new(
        address: String,
        store: Arc<StorageTable>,
        membership: Arc<Membership>,
        transport: Arc<T>,
        repair: Arc<RepairQueue>,
        peer_timeout: Duration,
    ) -> Self {
        Self {
            node_id: store.node_id().clone(),
            address,
            store,
            membership,
            transport,
            repair,
            peer_timeout,
            cursor: AtomicUsize::new(0),
        }
    }

    fn snapshot_message(&self) -> SnapshotMessage {
        SnapshotMessage {
            sender_id: self.node_id.clone(),
            sender_address: self.address.clone(),
            entries: self.store.snapshot(),
        }
    }

    /// Exchange snapshots with `peer`. Returns how many local keys changed.
    #[tracing::instrument(skip(self), fields(node = %self.node_id))]
    pub async fn exchange(&self, peer: &str) -> Result<usize> {
        let msg = self.snapshot_message();
        info!("Sending snapshot ({} entries) to {peer}", msg.entries.len());
        let response = timeout(self.peer_timeout, self.transport.merge_snapshot(peer, msg))
            .await
            .with_context(|| format!("Snapshot exchange with {peer} timed out"))?
            .with_context(|| format!("Snapshot exchange with {peer} failed"))?;

        self.membership
            .record_heartbeat(peer, Some(response.sender_id), 0);
        let merged = self.store.merge(response.entries);
        self.repair.clear(peer);
        info!("Merged {merged} entries from {peer}");
        Ok(merged)
    }

    /// Handle an incoming snapshot and answer with ours
    #[tracing::instrument(skip(self, msg), fields(from = %msg.sender_address))]
    pub fn handle_merge_snapshot(&self, msg: SnapshotMessage) -> SnapshotMessage {
        self.membership
            .record_heartbeat(&msg.sender_address, Some(msg.sender_id), 0);
        let merged = self.store.merge(msg.entries);
        debug!("Merged {merged} entries from incoming snapshot");
        self.snapshot_message()
    }

    /// Pick this round's targets: every active peer waiting for repair, plus
    /// one active peer in round-robin order.
    fn targets(&self) -> Vec<String> {
        let active: Vec<String> = self
            .membership
            .active_peers()
            .into_iter()
            .map(|p| p.address)
            .collect();
        if active.is_empty() {
            return vec![];
        }
        let mut targets: BTreeSet<String> = active
            .iter()
            .filter(|addr| self.repair.is_flagged(addr))
            .cloned()
            .collect();
        let next = self.cursor.fetch_add(1, Ordering::Relaxed) % active.len();
        targets.insert(active[next].clone());
        targets.into_iter().collect()
    }

    /// One anti-entropy round. Returns the total number of keys changed.
    pub async fn round(&self) -> usize {
        let mut merged = 0;
        for peer in self.targets() {
            match self.exchange(&peer).await {
                Ok(n) => merged += n,
                Err(e) => warn!("Anti-entropy with {peer} failed: {e:#}"),
            }
        }
        merged
    }

    pub fn spawn(self: Arc<Self>, period: Duration) -> PeriodicTask {
        PeriodicTask::spawn("anti-entropy", period, move || {
            let anti_entropy = self.clone();
            async move {
                anti_entropy.round().await;
            }
        })
    }
}
