//! Configuration for logsync nodes.
//!
//! Configuration is loaded from a TOML file, or built in code with
//! [`NodeConfig`] and [`ReconnectConfig`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use logsync_core::NodeIdentity;
use logsync_types::{NodeId, ProtocolVersion};
use serde::Deserialize;
use serde_json::Value;

/// Root of a TOML configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Sync node settings.
    #[serde(default)]
    pub node: NodeSection,
    /// Reconnection settings.
    #[serde(default)]
    pub reconnect: ReconnectSection,
}

/// `[node]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeSection {
    /// Node id (default: a random UUID).
    pub node_id: Option<String>,
    /// Credentials sent in `connect`.
    pub credentials: Option<Value>,
    /// Sub-protocol both sides must announce.
    pub subprotocol: Option<String>,
    /// Quiet time before a ping, in milliseconds (default: 10000).
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    /// Time allowed for a reply to a ping, in milliseconds (default: 70000).
    #[serde(default = "default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,
    /// Time allowed for the handshake, in milliseconds (default: 20000).
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Maximum entries per `sync` batch (default: 100).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

/// `[reconnect]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectSection {
    /// First retry delay ceiling, in milliseconds (default: 1000).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Largest retry delay ceiling, in milliseconds (default: 5000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Uptime after which a connection counts as stable, in milliseconds
    /// (default: 3000).
    #[serde(default = "default_stable_after_ms")]
    pub stable_after_ms: u64,
    /// Give up after this many consecutive attempts (default: never).
    pub max_attempts: Option<u32>,
    /// Also retry after fatal protocol errors (default: false).
    #[serde(default)]
    pub retry_protocol_errors: bool,
}

// Default value functions
fn default_ping_interval_ms() -> u64 {
    10_000
}

fn default_reply_timeout_ms() -> u64 {
    70_000
}

fn default_handshake_timeout_ms() -> u64 {
    20_000
}

fn default_batch_size() -> usize {
    100
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    5_000
}

fn default_stable_after_ms() -> u64 {
    3_000
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            node_id: None,
            credentials: None,
            subprotocol: None,
            ping_interval_ms: default_ping_interval_ms(),
            reply_timeout_ms: default_reply_timeout_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            stable_after_ms: default_stable_after_ms(),
            max_attempts: None,
            retry_protocol_errors: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Runtime node settings.
    pub fn node_config(&self) -> NodeConfig {
        let section = &self.node;
        let node_id = section
            .node_id
            .as_deref()
            .map_or_else(NodeId::random, NodeId::new);
        let mut identity = NodeIdentity::new(node_id);
        identity.credentials = section.credentials.clone();
        identity.subprotocol = section.subprotocol.clone();
        NodeConfig {
            identity,
            ping_interval: Duration::from_millis(section.ping_interval_ms),
            reply_timeout: Duration::from_millis(section.reply_timeout_ms),
            handshake_timeout: Duration::from_millis(section.handshake_timeout_ms),
            batch_size: section.batch_size.max(1),
        }
    }

    /// Runtime reconnection settings.
    pub fn reconnect_config(&self) -> ReconnectConfig {
        let section = &self.reconnect;
        ReconnectConfig {
            base_delay: Duration::from_millis(section.base_delay_ms),
            max_delay: Duration::from_millis(section.max_delay_ms),
            stable_after: Duration::from_millis(section.stable_after_ms),
            max_attempts: section.max_attempts,
            retry_protocol_errors: section.retry_protocol_errors,
        }
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}

/// Settings for one [`SyncNode`](crate::SyncNode).
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// What this node announces in the handshake.
    pub identity: NodeIdentity,
    /// Quiet time before a ping.
    pub ping_interval: Duration,
    /// Time allowed for a reply to a ping.
    pub reply_timeout: Duration,
    /// Time allowed for the handshake.
    pub handshake_timeout: Duration,
    /// Maximum entries per `sync` batch.
    pub batch_size: usize,
}

impl NodeConfig {
    /// Default settings for `node_id`.
    pub fn new(node_id: impl Into<NodeId>) -> Self {
        Self {
            identity: NodeIdentity::new(node_id.into()),
            ping_interval: Duration::from_millis(default_ping_interval_ms()),
            reply_timeout: Duration::from_millis(default_reply_timeout_ms()),
            handshake_timeout: Duration::from_millis(default_handshake_timeout_ms()),
            batch_size: default_batch_size(),
        }
    }

    /// Set the credentials sent in `connect`.
    pub fn with_credentials(mut self, credentials: impl Into<Value>) -> Self {
        self.identity.credentials = Some(credentials.into());
        self
    }

    /// Require a sub-protocol.
    pub fn with_subprotocol(mut self, subprotocol: impl Into<String>) -> Self {
        self.identity.subprotocol = Some(subprotocol.into());
        self
    }

    /// Announce a different protocol version.
    pub fn with_version(mut self, version: ProtocolVersion) -> Self {
        self.identity.version = version;
        self
    }

    /// Set the ping interval.
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Set the ping reply timeout.
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Set the handshake timeout.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the batch size (at least 1).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

/// Settings for a [`Reconnect`](crate::Reconnect) transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// First retry delay ceiling.
    pub base_delay: Duration,
    /// Largest retry delay ceiling.
    pub max_delay: Duration,
    /// Uptime after which the attempt counter resets.
    pub stable_after: Duration,
    /// Give up after this many consecutive attempts.
    pub max_attempts: Option<u32>,
    /// Also retry after fatal protocol errors.
    pub retry_protocol_errors: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Config::default().reconnect_config()
    }
}

impl ReconnectConfig {
    /// Set the delay bounds.
    pub fn with_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay = base;
        self.max_delay = max;
        self
    }

    /// Set the stability threshold.
    pub fn with_stable_after(mut self, stable_after: Duration) -> Self {
        self.stable_after = stable_after;
        self
    }

    /// Cap the number of consecutive attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Retry after fatal protocol errors too.
    pub fn retrying_protocol_errors(mut self) -> Self {
        self.retry_protocol_errors = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.node.ping_interval_ms, 10_000);
        assert_eq!(config.node.reply_timeout_ms, 70_000);
        assert_eq!(config.node.handshake_timeout_ms, 20_000);
        assert_eq!(config.node.batch_size, 100);
        assert_eq!(config.reconnect.base_delay_ms, 1_000);
        assert_eq!(config.reconnect.max_delay_ms, 5_000);
        assert_eq!(config.reconnect.stable_after_ms, 3_000);
        assert!(!config.reconnect.retry_protocol_errors);
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[node]
node_id = "laptop"
credentials = { user = "ann", token = "t0k" }
subprotocol = "notes/2"
ping_interval_ms = 500
batch_size = 10

[reconnect]
base_delay_ms = 50
max_attempts = 4
retry_protocol_errors = true
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.node.node_id.as_deref(), Some("laptop"));
        assert_eq!(
            config.node.credentials,
            Some(json!({"user": "ann", "token": "t0k"}))
        );
        assert_eq!(config.node.ping_interval_ms, 500);
        assert_eq!(config.node.reply_timeout_ms, 70_000);
        assert_eq!(config.reconnect.base_delay_ms, 50);
        assert_eq!(config.reconnect.max_delay_ms, 5_000);
        assert_eq!(config.reconnect.max_attempts, Some(4));

        let node = config.node_config();
        assert_eq!(node.identity.node_id, NodeId::new("laptop"));
        assert_eq!(node.identity.subprotocol.as_deref(), Some("notes/2"));
        assert_eq!(node.ping_interval, Duration::from_millis(500));
        assert_eq!(node.batch_size, 10);

        let reconnect = config.reconnect_config();
        assert_eq!(reconnect.base_delay, Duration::from_millis(50));
        assert!(reconnect.retry_protocol_errors);
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.node.batch_size, 100);
        assert_eq!(config.reconnect_config(), ReconnectConfig::default());
    }

    #[test]
    fn missing_node_id_is_random() {
        let config = Config::default();
        let a = config.node_config().identity.node_id;
        let b = config.node_config().identity.node_id;
        assert_ne!(a, b);
    }

    #[test]
    fn from_file_reads_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[node]\nnode_id = \"server\"\nhandshake_timeout_ms = 1234").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.node.node_id.as_deref(), Some("server"));
        assert_eq!(config.node.handshake_timeout_ms, 1234);
    }

    #[test]
    fn from_file_reports_errors() {
        let missing = Config::from_file(Path::new("/nonexistent/logsync.toml"));
        assert!(matches!(missing, Err(ConfigError::ReadError { .. })));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[node]\nbatch_size = \"lots\"").unwrap();
        let bad = Config::from_file(file.path());
        assert!(matches!(bad, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn builders_override_defaults() {
        let config = NodeConfig::new("a")
            .with_credentials("secret")
            .with_ping_interval(Duration::from_secs(1))
            .with_batch_size(0);
        assert_eq!(config.identity.credentials, Some(json!("secret")));
        assert_eq!(config.ping_interval, Duration::from_secs(1));
        assert_eq!(config.batch_size, 1);
    }
}
