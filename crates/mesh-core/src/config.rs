//! Configuration system for mesh nodes.
//!
//! Resolution order: environment variables → config file → defaults.
//! Command-line flags, applied by the launcher, override all three.
//!
//! Config file location:
//!   1. $MESH_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/mesh/config.toml
//!   3. ~/.config/mesh/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::identity::DEFAULT_PROTOCOL_VERSION;
use crate::wire::DIAL_TIMEOUT_MS;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub node: NodeConfig,
    pub network: NetworkConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Display name shown next to our messages.
    pub name: String,
    /// Protocol version string. Peers must match it exactly.
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// TCP address to bind. Port 0 = OS-assigned.
    pub listen_addr: String,
    /// Address advertised to peers. Empty = the bound address.
    pub advertise_addr: String,
    /// Peers dialed at startup.
    pub bootstrap_peers: Vec<String>,
    /// Bound on establishing an outbound connection.
    pub dial_timeout_ms: u64,
    /// Chat frames queued per connection before sends start failing.
    pub outbound_queue_depth: usize,
    /// Chat messages buffered for the terminal.
    pub inbound_queue_depth: usize,
    /// Gossiped addresses waiting to be dialed.
    pub discovery_queue_depth: usize,
    /// Gossip-triggered dials in flight at once.
    pub discovery_concurrency: usize,
    /// Message ids remembered for duplicate suppression.
    pub seen_capacity: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Local HTTP status port. 0 = disabled.
    pub port: u16,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "peer".to_string(),
            version: DEFAULT_PROTOCOL_VERSION.to_string(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:7400".to_string(),
            advertise_addr: String::new(),
            bootstrap_peers: Vec::new(),
            dial_timeout_ms: DIAL_TIMEOUT_MS,
            outbound_queue_depth: 64,
            inbound_queue_depth: 256,
            discovery_queue_depth: 256,
            discovery_concurrency: 16,
            seen_capacity: 4096,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("mesh")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl MeshConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            MeshConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a config file without applying env overrides.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("MESH_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&MeshConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply MESH_* overrides. `lookup` is `std::env::var` outside tests.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("MESH_NODE__NAME") {
            self.node.name = v;
        }
        if let Some(v) = lookup("MESH_NODE__VERSION") {
            self.node.version = v;
        }
        if let Some(v) = lookup("MESH_NETWORK__LISTEN_ADDR") {
            self.network.listen_addr = v;
        }
        if let Some(v) = lookup("MESH_NETWORK__ADVERTISE_ADDR") {
            self.network.advertise_addr = v;
        }
        if let Some(v) = lookup("MESH_NETWORK__BOOTSTRAP_PEERS") {
            self.network.bootstrap_peers = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = lookup("MESH_NETWORK__DIAL_TIMEOUT_MS") {
            if let Ok(ms) = v.parse() {
                self.network.dial_timeout_ms = ms;
            }
        }
        if let Some(v) = lookup("MESH_API__PORT") {
            if let Ok(p) = v.parse() {
                self.api.port = p;
            }
        }
    }

    pub fn dial_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.network.dial_timeout_ms)
    }
}
