//! In-process transport.
//!
//! A shared `LocalNetwork` routes peer calls straight to the handlers of the
//! nodes attached to it, keyed by address. Nodes can be taken down or slowed
//! down to exercise partitions and timeouts without sockets.

use crate::config::NodeConfig;
use crate::node::Node;
use crate::transport::{
    Heartbeat, HeartbeatAck, PeerTransport, ReplicateAck, ReplicateRequest, SnapshotMessage,
};
use anyhow::{anyhow, bail, Result};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;
use tokio::time::sleep;

pub type LocalNode = Node<LocalNetwork>;

#[derive(Default)]
struct Inner {
    nodes: RwLock<HashMap<String, Weak<LocalNode>>>,
    down: RwLock<HashSet<String>>,
    delays: RwLock<HashMap<String, Duration>>,
}

#[derive(Clone, Default)]
pub struct LocalNetwork {
    inner: Arc<Inner>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a node on this network and make it reachable at its address
    pub fn spawn_node(&self, config: NodeConfig) -> Arc<LocalNode> {
        let node = Arc::new(Node::new(config, Arc::new(self.clone())));
        self.attach(&node);
        node
    }

    pub fn attach(&self, node: &Arc<LocalNode>) {
        self.inner
            .nodes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(node.address().to_string(), Arc::downgrade(node));
    }

    /// Make every call to `address` fail until brought back up
    pub fn set_down(&self, address: &str, down: bool) {
        let mut set = self.inner.down.write().unwrap_or_else(|e| e.into_inner());
        if down {
            set.insert(address.to_string());
        } else {
            set.remove(address);
        }
    }

    /// Delay every call to `address` by `delay`
    pub fn set_delay(&self, address: &str, delay: Duration) {
        self.inner
            .delays
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(address.to_string(), delay);
    }

    pub fn clear_delay(&self, address: &str) {
        self.inner
            .delays
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(address);
    }

    async fn reach(&self, address: &str) -> Result<Arc<LocalNode>> {
        let delay = self
            .inner
            .delays
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(address)
            .copied();
        if let Some(delay) = delay {
            sleep(delay).await;
        }
        if self
            .inner
            .down
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(address)
        {
            bail!("connection to {address} refused");
        }
        self.inner
            .nodes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(address)
            .and_then(Weak::upgrade)
            .ok_or_else(|| anyhow!("no node at {address}"))
    }
}

impl PeerTransport for LocalNetwork {
    async fn heartbeat(&self, peer: &str, msg: Heartbeat) -> Result<HeartbeatAck> {
        Ok(self.reach(peer).await?.handle_heartbeat(msg))
    }

    async fn replicate(&self, peer: &str, msg: ReplicateRequest) -> Result<ReplicateAck> {
        Ok(self.reach(peer).await?.handle_replicate(msg))
    }

    async fn merge_snapshot(&self, peer: &str, msg: SnapshotMessage) -> Result<SnapshotMessage> {
        Ok(self.reach(peer).await?.handle_merge_snapshot(msg))
    }
}
