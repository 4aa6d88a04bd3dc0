//! Configuration management for `concord` nodes.
//!
//! Hierarchical loading from multiple sources, highest precedence first:
//! 1. Environment variables (`CONCORD_*`)
//! 2. `concord.local.toml` (gitignored, local overrides)
//! 3. `concord.toml` (tracked, node config)
//! 4. `~/.config/concord/config.toml` (user defaults)
//! 5. Built-in defaults

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Top-level configuration for one `concord` node process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub identity: IdentityConfig,
    pub cluster: ClusterConfig,
    pub timing: TimingConfig,
    pub storage: StorageConfig,
    pub network: NetworkConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            identity: IdentityConfig::default(),
            cluster: ClusterConfig::default(),
            timing: TimingConfig::default(),
            storage: StorageConfig::default(),
            network: NetworkConfig::default(),
        }
    }
}

/// This node's own address and whether it accepts requests from addresses
/// outside the membership set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Hex-encoded 32-byte address.
    pub key: String,
    pub allow_external: bool,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            key: "00".repeat(32),
            allow_external: true,
        }
    }
}

/// Initial cluster membership: hex address -> host:port.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub peers: HashMap<String, String>,
}

/// Logical-clock intervals, all in the node's tick units (typically
/// milliseconds at runtime).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub request_t: u64,
    pub whatsup_t: u64,
    pub call_t: u64,
    pub bonjour_t: u64,
    pub index_tolerance: u64,
    pub tick_interval_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            request_t: 2_000,
            whatsup_t: 5_000,
            call_t: 3_000,
            bonjour_t: 4_000,
            index_tolerance: 64,
            tick_interval_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".concord/data"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub bind_address: String,
    pub health_address: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:7700".to_string(),
            health_address: "127.0.0.1:7800".to_string(),
        }
    }
}

impl NodeConfig {
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    pub fn load_from_dir(node_dir: impl Into<PathBuf>) -> Result<Self> {
        ConfigLoader::new().with_node_dir(node_dir).load()
    }

    pub fn resolve_paths(&mut self, base_dir: &std::path::Path) {
        if self.storage.data_dir.is_relative() {
            self.storage.data_dir = base_dir.join(&self.storage.data_dir);
        }
    }
}
