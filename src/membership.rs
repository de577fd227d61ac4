use crate::types::{now_millis, NodeId, PeerMetadata, PeerState};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// A state change made by the failure detector
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerTransition {
    pub address: String,
    pub from: PeerState,
    pub to: PeerState,
}

/// Per-node view of the cluster, keyed by peer address.
///
/// Guarded by its own lock, independent of the storage table. Every read
/// returns an owned copy, so callers never observe a peer mid-update.
pub struct Membership {
    self_address: String,
    peers: RwLock<HashMap<String, PeerMetadata>>,
}

impl Membership {
    pub fn new(self_address: impl Into<String>, seeds: impl IntoIterator<Item = String>) -> Self {
        let membership = Self {
            self_address: self_address.into(),
            peers: RwLock::new(HashMap::new()),
        };
        for seed in seeds {
            membership.register_node(&seed);
        }
        membership
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, PeerMetadata>> {
        self.peers.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, PeerMetadata>> {
        self.peers.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn self_address(&self) -> &str {
        &self.self_address
    }

    /// Register a peer. Returns false if the address is already known or is
    /// this node's own address.
    pub fn register_node(&self, address: &str) -> bool {
        let address = address.trim();
        if address.is_empty() || address == self.self_address {
            return false;
        }
        let mut peers = self.write();
        if peers.contains_key(address) {
            debug!(address, "Node already known");
            return false;
        }
        peers.insert(
            address.to_string(),
            PeerMetadata::new(address.to_string(), now_millis()),
        );
        info!("Registered new node: {address}");
        true
    }

    /// Remove a peer immediately, bypassing the failure detector
    pub fn remove_node(&self, address: &str) -> bool {
        let removed = self.write().remove(address).is_some();
        if removed {
            info!("Removed node: {address}");
        }
        removed
    }

    /// Addresses of every known peer, whatever its state
    pub fn get_nodes(&self) -> Vec<String> {
        let mut nodes: Vec<String> = self.read().keys().cloned().collect();
        nodes.sort();
        nodes
    }

    pub fn peers(&self) -> Vec<PeerMetadata> {
        let mut peers: Vec<PeerMetadata> = self.read().values().cloned().collect();
        peers.sort_by(|a, b| a.address.cmp(&b.address));
        peers
    }

    pub fn get_peer(&self, address: &str) -> Option<PeerMetadata> {
        self.read().get(address).cloned()
    }

    pub fn active_peers(&self) -> Vec<PeerMetadata> {
        let mut peers: Vec<PeerMetadata> = self
            .read()
            .values()
            .filter(|p| p.is_active())
            .cloned()
            .collect();
        peers.sort_by(|a, b| a.address.cmp(&b.address));
        peers
    }

    /// Nodes that count towards quorum: this node plus every peer that is not
    /// Inactive. Suspect peers still count.
    pub fn cluster_size(&self) -> usize {
        1 + self
            .read()
            .values()
            .filter(|p| p.state != PeerState::Inactive)
            .count()
    }

    pub fn record_heartbeat(&self, address: &str, node_id: Option<NodeId>, epoch: u64) -> bool {
        self.record_heartbeat_at(address, node_id, epoch, now_millis())
    }

    /// Record a fresh successful contact with `address`.
    ///
    /// Unknown senders are registered. Any demoted peer is promoted straight
    /// back to Active. Returns true if the peer was new or was promoted.
    pub fn record_heartbeat_at(
        &self,
        address: &str,
        node_id: Option<NodeId>,
        epoch: u64,
        now: i64,
    ) -> bool {
        if address == self.self_address {
            return false;
        }
        let mut peers = self.write();
        let mut changed = false;
        let peer = peers.entry(address.to_string()).or_insert_with(|| {
            info!("Registered node on first contact: {address}");
            changed = true;
            PeerMetadata::new(address.to_string(), now)
        });

        peer.last_heartbeat = peer.last_heartbeat.max(now);
        peer.version = peer.version.max(epoch);
        if let Some(node_id) = node_id {
            if peer.node_id.as_ref() != Some(&node_id) {
                if let Some(old) = &peer.node_id {
                    warn!(address, %old, new = %node_id, "Peer changed node id");
                }
                peer.node_id = Some(node_id);
            }
        }
        if peer.state != PeerState::Active {
            info!(address, from = ?peer.state, "Peer is active again");
            peer.state = PeerState::Active;
            peer.state_since = now;
            changed = true;
        }
        changed
    }

    pub fn sweep(&self, timeout: Duration) -> Vec<PeerTransition> {
        self.sweep_at(now_millis(), timeout)
    }

    /// Passive sweep: demote every peer silent for longer than `timeout`.
    ///
    /// A peer moves at most one step per sweep, and a further step needs
    /// another full `timeout` since the previous one, so Active to Inactive
    /// spans two missed intervals.
    pub fn sweep_at(&self, now: i64, timeout: Duration) -> Vec<PeerTransition> {
        let timeout_ms = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
        let mut transitions = vec![];
        let mut peers = self.write();
        for peer in peers.values_mut() {
            if peer.state == PeerState::Inactive {
                continue;
            }
            let quiet_since = peer.last_heartbeat.max(peer.state_since);
            if now.saturating_sub(quiet_since) <= timeout_ms {
                continue;
            }
            let to = peer.state.demoted();
            warn!(address = peer.address, from = ?peer.state, ?to, "Peer missed heartbeats");
            transitions.push(PeerTransition {
                address: peer.address.clone(),
                from: peer.state,
                to,
            });
            peer.state = to;
            peer.state_since = now;
        }
        transitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(100);

    fn membership_with(peers: &[&str], now: i64) -> Membership {
        let m = Membership::new("self:1", Vec::<String>::new());
        for peer in peers {
            m.record_heartbeat_at(peer, None, 0, now);
        }
        m
    }

    #[test]
    fn register_is_idempotent() {
        let m = Membership::new("self:1", vec!["a:1".to_string()]);
        assert!(!m.register_node("a:1"));
        assert!(m.register_node("b:1"));
        assert!(!m.register_node("b:1"));
        assert!(!m.register_node("self:1"));
        assert_eq!(m.get_nodes(), vec!["a:1".to_string(), "b:1".to_string()]);
    }

    #[test]
    fn remove_bypasses_detector() {
        let m = membership_with(&["a:1"], 0);
        assert!(m.remove_node("a:1"));
        assert!(!m.remove_node("a:1"));
        assert!(m.get_nodes().is_empty());
        assert_eq!(m.cluster_size(), 1);
    }

    #[test]
    fn two_missed_intervals_reach_inactive() {
        let m = membership_with(&["a:1"], 1_000);

        // Within the timeout nothing changes
        assert!(m.sweep_at(1_050, TIMEOUT).is_empty());

        let first = m.sweep_at(1_150, TIMEOUT);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].to, PeerState::Suspect);

        // Sweeping again right away must not skip straight to Inactive
        assert!(m.sweep_at(1_160, TIMEOUT).is_empty());
        assert_eq!(m.get_peer("a:1").unwrap().state, PeerState::Suspect);

        let second = m.sweep_at(1_300, TIMEOUT);
        assert_eq!(second[0].from, PeerState::Suspect);
        assert_eq!(second[0].to, PeerState::Inactive);

        // Inactive peers stay visible
        assert_eq!(m.get_nodes(), vec!["a:1".to_string()]);
        assert!(m.sweep_at(10_000, TIMEOUT).is_empty());
    }

    #[test]
    fn heartbeat_promotes_from_any_state() {
        let m = membership_with(&["a:1", "b:1"], 0);
        m.sweep_at(200, TIMEOUT);
        m.sweep_at(400, TIMEOUT);
        assert_eq!(m.get_peer("a:1").unwrap().state, PeerState::Inactive);
        assert_eq!(m.cluster_size(), 1);

        assert!(m.record_heartbeat_at("a:1", Some("node-a".into()), 3, 500));
        let a = m.get_peer("a:1").unwrap();
        assert_eq!(a.state, PeerState::Active);
        assert_eq!(a.node_id.as_deref(), Some("node-a"));
        assert_eq!(a.version, 3);
        assert_eq!(m.cluster_size(), 2);

        // Suspect peers come back too
        m.sweep_at(650, TIMEOUT);
        assert_eq!(m.get_peer("a:1").unwrap().state, PeerState::Suspect);
        m.record_heartbeat_at("a:1", None, 1, 700);
        let a = m.get_peer("a:1").unwrap();
        assert_eq!(a.state, PeerState::Active);
        // Epoch never goes backwards
        assert_eq!(a.version, 3);
    }

    #[test]
    fn suspect_counts_towards_cluster_size_but_is_not_active() {
        let m = membership_with(&["a:1", "b:1"], 0);
        m.record_heartbeat_at("b:1", None, 0, 150);
        m.sweep_at(150, TIMEOUT);
        assert_eq!(m.get_peer("a:1").unwrap().state, PeerState::Suspect);
        assert_eq!(m.cluster_size(), 3);
        let active: Vec<String> = m.active_peers().into_iter().map(|p| p.address).collect();
        assert_eq!(active, vec!["b:1".to_string()]);
    }

    #[test]
    fn heartbeat_from_unknown_sender_registers_it() {
        let m = Membership::new("self:1", Vec::<String>::new());
        assert!(m.record_heartbeat("c:1", Some("node-c".into()), 1));
        assert_eq!(m.get_nodes(), vec!["c:1".to_string()]);
        assert!(!m.record_heartbeat("self:1", None, 1));
    }
}
