//! YAML configuration for `chainpush run` / `chainpush status`.
//!
//! Every section and field is optional; see `Config::default()` for the
//! values used when a key is missing.
//!
//! ```yaml
//! network: mainnet
//! node:
//!   url: http://127.0.0.1:8332
//!   user: bitcoin
//!   password: secret
//! websocket:
//!   listen: 0.0.0.0:8181
//! storage:
//!   backend: sqlite
//!   path: ./chainpush.db
//! log:
//!   level: info
//!   components:
//!     chainpush-core: debug
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chainpush_codec::Network;
use chainpush_core::TrackerConfig;
use chainpush_rpc::{ClientConfig, PollerConfig, RetryConfig};
use serde::{Deserialize, Serialize};

use crate::logging::LogConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub network: Network,
    pub node: NodeConfig,
    pub websocket: WebSocketConfig,
    pub storage: StorageConfig,
    pub tracker: TrackerConfig,
    pub catch_up: CatchUpConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub url: String,
    pub user: String,
    pub password: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub poll_interval_ms: u64,
    /// Forward mempool transactions as well as blocks.
    pub poll_mempool: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8332".into(),
            user: String::new(),
            password: String::new(),
            timeout_secs: 30,
            max_retries: 3,
            poll_interval_ms: 2_000,
            poll_mempool: true,
        }
    }
}

impl NodeConfig {
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(&self.url).with_auth(&self.user, &self.password);
        config.request_timeout = Duration::from_secs(self.timeout_secs);
        config.retry = RetryConfig::with_max_retries(self.max_retries);
        config
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            interval: Duration::from_millis(self.poll_interval_ms),
            mempool: self.poll_mempool,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    pub listen: String,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8181".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Database file, for `sqlite`.
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            path: "./chainpush.db".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatchUpConfig {
    /// Fetch blocks missed while the service was down.
    pub enabled: bool,
    /// Push the node's current mempool once at startup.
    pub mempool_sweep: bool,
}

impl Default for CatchUpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mempool_sweep: true,
        }
    }
}

impl Config {
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("invalid configuration")
    }

    /// Read `path`, or use defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("cannot read config file {}", path.display()))?;
                Self::from_yaml(&text)
            }
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config.network, Network::Mainnet);
        assert_eq!(config.node.url, "http://127.0.0.1:8332");
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.tracker.max_backfill_depth, 1_000);
        assert!(config.catch_up.enabled);
        assert_eq!(config.log, LogConfig::default());
    }

    #[test]
    fn full_document() {
        let config = Config::from_yaml(
            r#"
network: testnet
node:
  url: http://10.0.0.2:18332
  user: alice
  password: hunter2
  timeout_secs: 5
  max_retries: 7
  poll_interval_ms: 500
  poll_mempool: false
websocket:
  listen: 0.0.0.0:9000
storage:
  backend: sqlite
  path: /var/lib/chainpush/push.db
tracker:
  max_backfill_depth: 50
catch_up:
  enabled: false
  mempool_sweep: false
log:
  level: debug
  json: true
  components:
    chainpush-ws: trace
"#,
        )
        .unwrap();

        assert_eq!(config.network, Network::Testnet);
        assert_eq!(config.node.user, "alice");
        assert_eq!(config.websocket.listen, "0.0.0.0:9000");
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.tracker.max_backfill_depth, 50);
        assert!(!config.catch_up.mempool_sweep);
        assert!(config.log.json);
        assert_eq!(config.log.components["chainpush-ws"], "trace");

        let client = config.node.client_config();
        assert_eq!(client.request_timeout, Duration::from_secs(5));
        assert_eq!(client.retry.max_retries, 7);
        let poller = config.node.poller_config();
        assert_eq!(poller.interval, Duration::from_millis(500));
        assert!(!poller.mempool);
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config = Config::from_yaml("node:\n  user: bob\n").unwrap();
        assert_eq!(config.node.user, "bob");
        assert_eq!(config.node.max_retries, 3);
        assert!(config.node.poll_mempool);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        assert!(Config::from_yaml("storage:\n  backend: postgres\n").is_err());
    }
}
