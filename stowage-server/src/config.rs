use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use stowage_core::{
    Membership, NodeInfo, ReplicationSettings, Result, StowError, WatchdogSettings,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub current_node: String,
    pub group: String,
    pub file_root: PathBuf,
    #[serde(default)]
    pub meta_root: Option<PathBuf>,
    pub nodes: Vec<NodeConfig>,
    #[serde(default)]
    pub meta: MetaConfig,
    #[serde(default)]
    pub replication: ReplicationConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node_id: String,
    pub bind_addr: String,
    #[serde(default)]
    pub advertise_addr: Option<String>,
}

impl NodeConfig {
    pub fn address(&self) -> &str {
        self.advertise_addr
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(&self.bind_addr)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MetaConfig {
    #[serde(default)]
    pub backend: MetaBackend,
    pub etcd: Option<EtcdConfig>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MetaBackend {
    /// Process-local map, for single node development.
    #[default]
    Memory,
    Etcd,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtcdConfig {
    pub endpoints: Vec<String>,
    #[serde(default = "default_etcd_prefix")]
    pub prefix: String,
}

fn default_etcd_prefix() -> String {
    "/stowage".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    #[serde(default = "default_partition_count")]
    pub partition_count: u32,
    #[serde(default = "default_quorum")]
    pub default_quorum: usize,
    /// Passed through to substrates that replicate map data themselves.
    #[serde(default = "default_backup_factor")]
    pub backup_factor: usize,
    #[serde(default = "default_quorum_max_wait_ms")]
    pub quorum_max_wait_ms: u64,
    #[serde(default = "default_cas_max_attempts")]
    pub cas_max_attempts: usize,
    #[serde(default = "default_wait_cache_ttl_secs")]
    pub wait_cache_ttl_secs: u64,
    #[serde(default = "default_wait_cache_capacity")]
    pub wait_cache_capacity: usize,
    #[serde(default = "default_peer_timeout_secs")]
    pub peer_timeout_secs: u64,
}

fn default_partition_count() -> u32 {
    16
}

fn default_quorum() -> usize {
    2
}

fn default_backup_factor() -> usize {
    1
}

fn default_quorum_max_wait_ms() -> u64 {
    5000
}

fn default_cas_max_attempts() -> usize {
    8
}

fn default_wait_cache_ttl_secs() -> u64 {
    300
}

fn default_wait_cache_capacity() -> usize {
    4096
}

fn default_peer_timeout_secs() -> u64 {
    30
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            partition_count: default_partition_count(),
            default_quorum: default_quorum(),
            backup_factor: default_backup_factor(),
            quorum_max_wait_ms: default_quorum_max_wait_ms(),
            cas_max_attempts: default_cas_max_attempts(),
            wait_cache_ttl_secs: default_wait_cache_ttl_secs(),
            wait_cache_capacity: default_wait_cache_capacity(),
            peer_timeout_secs: default_peer_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    #[serde(default = "default_period_secs")]
    pub period_secs: u64,
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_verify_holdings")]
    pub verify_holdings: bool,
}

fn default_period_secs() -> u64 {
    30
}

fn default_stale_after_secs() -> u64 {
    60
}

fn default_page_size() -> usize {
    256
}

fn default_verify_holdings() -> bool {
    true
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            period_secs: default_period_secs(),
            stale_after_secs: default_stale_after_secs(),
            page_size: default_page_size(),
            verify_holdings: default_verify_holdings(),
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(::config::Environment::with_prefix("STOWAGE"))
            .build()
            .map_err(|e| StowError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| StowError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Apply the `--node` override and check the result is usable.
    pub fn resolve(mut self, current_node: Option<String>) -> Result<Self> {
        if let Some(node_id) = current_node {
            self.current_node = node_id;
        }

        if self.current_node.trim().is_empty() {
            return Err(StowError::Config(
                "current_node is required (set it in the file or pass --node)".to_string(),
            ));
        }
        self.local_node()?;

        if self.meta.backend == MetaBackend::Etcd && self.meta.etcd.is_none() {
            return Err(StowError::Config(
                "etcd configuration is required for etcd backend".to_string(),
            ));
        }

        Ok(self)
    }

    pub fn local_node(&self) -> Result<&NodeConfig> {
        self.nodes
            .iter()
            .find(|node| node.node_id == self.current_node)
            .ok_or_else(|| {
                StowError::Config(format!(
                    "current_node {} is not listed in nodes",
                    self.current_node
                ))
            })
    }

    pub fn membership(&self) -> Result<Membership> {
        let nodes = self
            .nodes
            .iter()
            .map(|node| NodeInfo {
                node_id: node.node_id.clone(),
                address: node.address().to_string(),
            })
            .collect();
        Membership::new(self.group.clone(), nodes)
    }

    pub fn meta_root(&self) -> PathBuf {
        self.meta_root
            .clone()
            .unwrap_or_else(|| self.file_root.join("meta"))
    }

    pub fn replication_settings(&self) -> ReplicationSettings {
        let replication = &self.replication;
        ReplicationSettings {
            partition_count: replication.partition_count,
            default_quorum: replication.default_quorum,
            quorum_max_wait: Duration::from_millis(replication.quorum_max_wait_ms),
            cas_max_attempts: replication.cas_max_attempts,
            wait_cache_ttl: Duration::from_secs(replication.wait_cache_ttl_secs),
            wait_cache_capacity: replication.wait_cache_capacity,
            peer_timeout: Duration::from_secs(replication.peer_timeout_secs),
        }
    }

    pub fn watchdog_settings(&self) -> WatchdogSettings {
        let watchdog = &self.watchdog;
        WatchdogSettings {
            period: Duration::from_secs(watchdog.period_secs.max(1)),
            stale_after: Duration::from_secs(watchdog.stale_after_secs),
            page_size: watchdog.page_size,
            verify_holdings: watchdog.verify_holdings,
        }
    }
}
