//! ClusterCtl Configuration
//!
//! Configuration structures for the cluster control tool. Every section has
//! defaults, so a missing file still produces a working configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::network::NodeName;

/// Main ClusterCtl configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterCtlConfig {
    /// Cluster membership
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Local management daemon connection
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Known hosts used for direct node checks
    #[serde(default)]
    pub hosts: BTreeMap<NodeName, HostConfig>,

    /// Restart verification timing
    #[serde(default)]
    pub restart: RestartConfig,

    /// Local file locations
    #[serde(default)]
    pub paths: PathsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Cluster membership configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// All cluster member nodes, used when a command names no nodes
    #[serde(default)]
    pub nodes: Vec<NodeName>,
}

/// Management daemon connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Local daemon endpoint that fans commands out to the cluster
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Port the daemon listens on for nodes without a host entry
    #[serde(default = "default_daemon_port")]
    pub port: u16,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Accept self-signed daemon certificates
    #[serde(default = "default_true")]
    pub accept_invalid_certs: bool,
}

/// A known host entry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    /// Address to reach the node at (defaults to the node name)
    #[serde(default)]
    pub address: Option<String>,

    /// Daemon port on this node
    #[serde(default)]
    pub port: Option<u16>,

    /// Authentication token for this node
    #[serde(default)]
    pub token: Option<String>,
}

/// Restart verification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartConfig {
    /// Seconds between verification rounds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Total seconds to wait for all nodes to restart
    #[serde(default = "default_wait_budget")]
    pub wait_budget_secs: u64,
}

/// Local file locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Daemon TLS certificate
    #[serde(default = "default_cert_path")]
    pub cert: PathBuf,

    /// Daemon TLS private key
    #[serde(default = "default_key_path")]
    pub key: PathBuf,

    /// Authorized token store
    #[serde(default = "default_tokens_path")]
    pub tokens: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_endpoint() -> String {
    "https://127.0.0.1:2224".to_string()
}

fn default_daemon_port() -> u16 {
    2224
}

fn default_request_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    3
}

fn default_wait_budget() -> u64 {
    300
}

fn default_cert_path() -> PathBuf {
    PathBuf::from("/var/lib/clusterd/clusterd.crt")
}

fn default_key_path() -> PathBuf {
    PathBuf::from("/var/lib/clusterd/clusterd.key")
}

fn default_tokens_path() -> PathBuf {
    PathBuf::from("/var/lib/clusterd/tokens")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            port: default_daemon_port(),
            request_timeout_secs: default_request_timeout(),
            accept_invalid_certs: true,
        }
    }
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            wait_budget_secs: default_wait_budget(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            cert: default_cert_path(),
            key: default_key_path(),
            tokens: default_tokens_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ClusterCtlConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a file, falling back to defaults if it does not exist
    pub fn load_or_default(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::debug!("No configuration at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: ClusterCtlConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.daemon.endpoint.is_empty() {
            return Err(crate::Error::Config("daemon.endpoint cannot be empty".into()));
        }

        if self.restart.poll_interval_secs == 0 {
            return Err(crate::Error::Config(
                "restart.poll_interval_secs must be greater than 0".into(),
            ));
        }

        if self.restart.wait_budget_secs < self.restart.poll_interval_secs {
            return Err(crate::Error::Config(
                "restart.wait_budget_secs must not be shorter than restart.poll_interval_secs".into(),
            ));
        }

        if self.cluster.nodes.iter().any(|n| n.is_empty()) {
            return Err(crate::Error::Config("cluster.nodes cannot contain empty names".into()));
        }

        Ok(())
    }

    /// Get the request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.daemon.request_timeout_secs)
    }

    /// Get the verification poll interval as Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.restart.poll_interval_secs)
    }

    /// Get the verification wait budget as Duration
    pub fn wait_budget(&self) -> Duration {
        Duration::from_secs(self.restart.wait_budget_secs)
    }

    /// Resolve the nodes a command targets: the given list, or the whole cluster
    pub fn target_nodes(&self, requested: &[NodeName]) -> Vec<NodeName> {
        if requested.is_empty() {
            self.cluster.nodes.clone()
        } else {
            requested.to_vec()
        }
    }
}
