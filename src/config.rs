use crate::consistency::ConsistencyLevel;
use crate::types::NodeId;
use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Node settings. Usually filled in by the host program, `from_env` covers
/// the common case of one process per node configured through the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Stable identifier; a random UUID is generated when absent
    pub node_id: Option<NodeId>,
    /// This node's own address (host:port used for peer RPC)
    pub address: String,
    pub seed_nodes: Vec<String>,
    pub heartbeat_interval: Duration,
    /// Silence longer than this demotes a peer one step
    pub heartbeat_timeout: Duration,
    /// Bound on every single peer call
    pub peer_timeout: Duration,
    /// Bound on collecting acks for one write
    pub write_deadline: Duration,
    pub anti_entropy_interval: Duration,
    pub default_consistency: ConsistencyLevel,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            address: "127.0.0.1:8000".to_string(),
            seed_nodes: vec![],
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(10),
            peer_timeout: Duration::from_secs(2),
            write_deadline: Duration::from_secs(3),
            anti_entropy_interval: Duration::from_secs(30),
            default_consistency: ConsistencyLevel::Quorum,
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env_var(name)
        .map(|v| v.trim().parse::<T>())
        .transpose()
        .with_context(|| format!("Invalid value for {name}"))
}

impl NodeConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    pub fn with_seeds(mut self, seeds: impl IntoIterator<Item = String>) -> Self {
        self.seed_nodes = seeds.into_iter().collect();
        self
    }

    /// Read the configuration from the environment, keeping defaults for
    /// anything unset:
    /// `NODE_ID`, `NODE_ADDRESS`, `SEED_NODES` (comma separated),
    /// `HEARTBEAT_INTERVAL_SECS`, `HEARTBEAT_TIMEOUT_SECS`, `PEER_TIMEOUT_MS`,
    /// `WRITE_DEADLINE_MS`, `ANTI_ENTROPY_INTERVAL_SECS`, `DEFAULT_CONSISTENCY`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self {
            node_id: env_var("NODE_ID"),
            ..Default::default()
        };
        if let Some(address) = env_var("NODE_ADDRESS") {
            config.address = address;
        }
        if let Some(seeds) = env_var("SEED_NODES") {
            config.seed_nodes = parse_seed_list(&seeds);
        }
        if let Some(secs) = env_parse::<u64>("HEARTBEAT_INTERVAL_SECS")? {
            config.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("HEARTBEAT_TIMEOUT_SECS")? {
            config.heartbeat_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = env_parse::<u64>("PEER_TIMEOUT_MS")? {
            config.peer_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("WRITE_DEADLINE_MS")? {
            config.write_deadline = Duration::from_millis(ms);
        }
        if let Some(secs) = env_parse::<u64>("ANTI_ENTROPY_INTERVAL_SECS")? {
            config.anti_entropy_interval = Duration::from_secs(secs);
        }
        if let Some(level) = env_var("DEFAULT_CONSISTENCY") {
            config.default_consistency = ConsistencyLevel::parse_lenient(&level);
        }
        ensure!(
            !config.heartbeat_interval.is_zero(),
            "HEARTBEAT_INTERVAL_SECS must be non-zero"
        );
        ensure!(
            !config.anti_entropy_interval.is_zero(),
            "ANTI_ENTROPY_INTERVAL_SECS must be non-zero"
        );
        Ok(config)
    }
}

/// Split a comma separated address list, dropping blanks
pub fn parse_seed_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
