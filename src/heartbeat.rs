use crate::error::KvError;
use crate::membership::{Membership, PeerTransition};
use crate::task::PeriodicTask;
use crate::transport::{Heartbeat, PeerTransport};
use crate::types::NodeId;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Outbound side of the failure detector
pub struct Heartbeater<T: PeerTransport> {
    node_id: NodeId,
    address: String,
    epoch: u64,
    membership: Arc<Membership>,
    transport: Arc<T>,
    peer_timeout: Duration,
    heartbeat_timeout: Duration,
}

impl<T: PeerTransport> Heartbeater<T> {
    pub fn new(
        node_id: NodeId,
        address: String,
        epoch: u64,
        membership: Arc<Membership>,
        transport: Arc<T>,
        peer_timeout: Duration,
        heartbeat_timeout: Duration,
    ) -> Self {
        Self {
            node_id,
            address,
            epoch,
            membership,
            transport,
            peer_timeout,
            heartbeat_timeout,
        }
    }

    fn message(&self) -> Heartbeat {
        Heartbeat {
            sender_id: self.node_id.clone(),
            sender_address: self.address.clone(),
            epoch: self.epoch,
        }
    }

    /// Contact one peer. Unreachable peers are only reported, demotion is
    /// left to the staleness sweep.
    pub async fn ping(&self, peer: &str) -> Result<(), KvError> {
        let unreachable = |reason: String| KvError::PeerUnreachable {
            address: peer.to_string(),
            reason,
        };
        let ack = timeout(self.peer_timeout, self.transport.heartbeat(peer, self.message()))
            .await
            .map_err(|_| unreachable(format!("no answer within {:?}", self.peer_timeout)))?
            .map_err(|e| unreachable(format!("{e:#}")))?;
        self.membership
            .record_heartbeat(peer, Some(ack.node_id), ack.epoch);
        Ok(())
    }

    /// One heartbeat round: ping every known peer, inactive ones included so
    /// they can recover, then sweep for staleness.
    pub async fn round(&self) -> Vec<PeerTransition> {
        let peers = self.membership.get_nodes();
        let results = join_all(peers.iter().map(|peer| self.ping(peer))).await;
        for err in results.into_iter().filter_map(Result::err) {
            warn!("Heartbeat failed: {err}");
        }
        let transitions = self.membership.sweep(self.heartbeat_timeout);
        debug!(
            peers = peers.len(),
            transitions = transitions.len(),
            "Heartbeat round done"
        );
        transitions
    }

    pub fn spawn(self: Arc<Self>, period: Duration) -> PeriodicTask {
        PeriodicTask::spawn("heartbeat", period, move || {
            let heartbeater = self.clone();
            async move {
                heartbeater.round().await;
            }
        })
    }
}
