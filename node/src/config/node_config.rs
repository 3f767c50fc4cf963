use super::database_config::DatabaseConfig;
use crate::error::{NodeError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// When an already running, still eligible instance is restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    /// Only when its method or password changed
    #[default]
    OnCredentialChange,
    /// On every tick, even when nothing changed
    Always,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Row id in `ss_node`; required, there is no default node
    #[serde(default)]
    pub node_id: Option<i32>,

    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,

    /// Upper bound for every single store call made during a tick
    #[serde(default = "default_store_timeout_secs")]
    pub store_timeout_secs: u64,

    #[serde(default)]
    pub udp_enabled: bool,

    #[serde(default)]
    pub restart_policy: RestartPolicy,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub console_port: Option<u16>,

    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log directory for file-based logging, stdout when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    #[serde(default = "default_log_file")]
    pub log_file: String,
}

fn default_sync_interval_secs() -> u64 {
    30
}

fn default_store_timeout_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "node.log".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            sync_interval_secs: default_sync_interval_secs(),
            store_timeout_secs: default_store_timeout_secs(),
            udp_enabled: false,
            restart_policy: RestartPolicy::default(),
            database: DatabaseConfig::default(),
            console_port: None,
            log_level: default_log_level(),
            log_dir: None,
            log_file: default_log_file(),
        }
    }
}

impl NodeConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: NodeConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Like [`NodeConfig::load`], but a missing file yields the defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_id.is_none() {
            return Err(NodeError::Configuration(
                "node id must be specified".to_string(),
            ));
        }
        if self.sync_interval_secs == 0 {
            return Err(NodeError::Configuration(
                "sync interval must be at least one second".to_string(),
            ));
        }
        if self.store_timeout_secs == 0 {
            return Err(NodeError::Configuration(
                "store timeout must be at least one second".to_string(),
            ));
        }
        Ok(())
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }
}
