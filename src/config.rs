//! Configuration loading and types.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct. Each subsection governs a different part of the
//! system: the admin listener, message size limits, local storage, the
//! node layout of the local cluster, the write workload, and logging.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;

use anyhow::{bail, Context};
use serde::Deserialize;

use crate::cluster::coordinator::ConsistencyLevel;
use crate::messaging::{CURRENT_VERSION, VERSION_30, VERSION_40};
use crate::mutation::payload::COMMITLOG_ENTRY_OVERHEAD_SIZE;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Admin HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Inter-node messaging settings.
    #[serde(default)]
    pub messaging: MessagingConfig,

    /// Local applier settings, shared by every node.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Nodes making up the local cluster.
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Write workload driven through a coordinator.
    #[serde(default)]
    pub simulation: SimulationConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Admin HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Messaging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MessagingConfig {
    /// Protocol version used to size mutations.
    #[serde(default = "default_version")]
    pub version: u32,

    /// Largest mutation accepted, append-log overhead included.
    #[serde(default = "default_max_mutation_size")]
    pub max_mutation_size: usize,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            max_mutation_size: default_max_mutation_size(),
        }
    }
}

/// Local applier configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Milliseconds a write may wait before it times out.
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// In-flight writes allowed per node (0 = unlimited).
    #[serde(default)]
    pub max_pending_writes: usize,

    /// Upper bound of a random delay added to each write, in milliseconds.
    #[serde(default)]
    pub simulated_latency_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            write_timeout_ms: default_write_timeout_ms(),
            max_pending_writes: 0,
            simulated_latency_ms: 0,
        }
    }
}

/// One node of the local cluster.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Human-readable node name, unique in the cluster.
    pub name: String,

    /// Messaging address.
    pub address: SocketAddr,

    /// Datacenter the node belongs to.
    #[serde(default = "default_datacenter")]
    pub datacenter: String,
}

/// Cluster layout.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_nodes")]
    pub nodes: Vec<NodeConfig>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            nodes: default_nodes(),
        }
    }
}

/// Workload configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfig {
    /// Number of writes to issue.
    #[serde(default = "default_mutations")]
    pub mutations: u64,

    /// Acknowledgments required per write.
    #[serde(default)]
    pub consistency: ConsistencyLevel,

    /// Milliseconds the coordinator waits for acknowledgments.
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Size in bytes of each written value.
    #[serde(default = "default_value_size")]
    pub value_size: usize,

    /// Name of the coordinating node (defaults to the first node).
    #[serde(default)]
    pub coordinator: Option<String>,

    /// Names of nodes cut off from the network for the whole run.
    #[serde(default)]
    pub isolated: Vec<String>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            mutations: default_mutations(),
            consistency: ConsistencyLevel::default(),
            write_timeout_ms: default_write_timeout_ms(),
            value_size: default_value_size(),
            coordinator: None,
            isolated: Vec::new(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and the `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { metrics: true }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9170
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_max_mutation_size() -> usize {
    16 * 1024 * 1024 // 16 MiB
}

fn default_write_timeout_ms() -> u64 {
    2000
}

fn default_datacenter() -> String {
    "dc1".to_string()
}

fn default_nodes() -> Vec<NodeConfig> {
    [("node1", 1, "dc1"), ("node2", 2, "dc1"), ("node3", 3, "dc1")]
        .into_iter()
        .map(|(name, last, dc)| NodeConfig {
            name: name.to_string(),
            address: SocketAddr::from(([127, 0, 0, last], 7000)),
            datacenter: dc.to_string(),
        })
        .collect()
}

fn default_mutations() -> u64 {
    100
}

fn default_value_size() -> usize {
    64
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Validation --------------------------------------------------------------

impl Config {
    /// Reject settings the node cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if ![VERSION_30, VERSION_40].contains(&self.messaging.version) {
            bail!("unsupported messaging.version {}", self.messaging.version);
        }
        if self.messaging.max_mutation_size <= COMMITLOG_ENTRY_OVERHEAD_SIZE {
            bail!(
                "messaging.max_mutation_size must exceed the {} byte record overhead",
                COMMITLOG_ENTRY_OVERHEAD_SIZE
            );
        }
        if self.cluster.nodes.is_empty() {
            bail!("cluster.nodes must list at least one node");
        }

        let mut names = HashSet::new();
        let mut addresses = HashSet::new();
        for node in &self.cluster.nodes {
            if !names.insert(node.name.as_str()) {
                bail!("duplicate node name '{}'", node.name);
            }
            if !addresses.insert(node.address) {
                bail!("duplicate node address {}", node.address);
            }
        }

        if let Some(coordinator) = &self.simulation.coordinator {
            if !names.contains(coordinator.as_str()) {
                bail!("simulation.coordinator '{}' is not a cluster node", coordinator);
            }
        }
        for name in &self.simulation.isolated {
            if !names.contains(name.as_str()) {
                bail!("simulation.isolated names unknown node '{}'", name);
            }
        }
        Ok(())
    }
}

// -- Loader ------------------------------------------------------------------

/// Load, parse and validate configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&contents)
        .with_context(|| format!("parsing config file {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("failed to create temp file");
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.cluster.nodes.len(), 3);
        assert_eq!(config.messaging.version, CURRENT_VERSION);
        assert_eq!(config.simulation.consistency, ConsistencyLevel::Quorum);
    }

    #[test]
    fn test_load_full_config() {
        let file = write_config(
            r#"
server:
  port: 9999
messaging:
  max_mutation_size: 4096
storage:
  write_timeout_ms: 50
  max_pending_writes: 8
cluster:
  nodes:
    - { name: a, address: "127.0.0.1:7001", datacenter: east }
    - { name: b, address: "127.0.0.1:7002", datacenter: west }
simulation:
  mutations: 5
  consistency: all
  coordinator: b
  isolated: [a]
logging:
  format: json
"#,
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.messaging.max_mutation_size, 4096);
        assert_eq!(config.storage.max_pending_writes, 8);
        assert_eq!(config.cluster.nodes[1].datacenter, "west");
        assert_eq!(config.simulation.consistency, ConsistencyLevel::All);
        assert_eq!(config.simulation.coordinator.as_deref(), Some("b"));
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let file = write_config("{}");
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.cluster.nodes.len(), 3);
        assert_eq!(config.messaging.max_mutation_size, 16 * 1024 * 1024);
    }

    #[test]
    fn test_duplicate_address_rejected() {
        let file = write_config(
            r#"
cluster:
  nodes:
    - { name: a, address: "127.0.0.1:7001" }
    - { name: b, address: "127.0.0.1:7001" }
"#,
        );
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("duplicate node address"));
    }

    #[test]
    fn test_unknown_isolated_node_rejected() {
        let mut config = Config::default();
        config.simulation.isolated = vec!["ghost".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut config = Config::default();
        config.messaging.version = 99;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(load_config("/definitely/not/here.yaml").is_err());
    }
}
