//! Node configuration loading and management.

use meridian_core::{ChainKind, PeerSettlementConfig, SettlementConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Full configuration for the Meridian node.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MeridianConfig {
    /// Node identity on the messaging transport.
    #[serde(default)]
    pub node: NodeConfig,

    /// API server settings.
    #[serde(default)]
    pub api: ApiConfig,

    /// Storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Signing key settings.
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Settlement subsystem tunables.
    #[serde(default)]
    pub settlement: SettlementConfig,

    /// Per-rail chain clients.
    #[serde(default)]
    pub chains: ChainsConfig,

    /// Peer settlement configs loaded at startup.
    #[serde(default)]
    pub peers: Vec<PeerSettlementConfig>,

    /// Where to reach each peer's node.
    #[serde(default)]
    pub endpoints: Vec<PeerEndpoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Id this node announces as `senderId` and in peer URLs.
    #[serde(default = "default_node_id")]
    pub node_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API listen address.
    #[serde(default = "default_api_addr")]
    pub listen_addr: String,
    /// API port.
    #[serde(default = "default_api_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the data directory.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (text, json).
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IdentityConfig {
    /// Path to the hex-encoded Ed25519 seed. Generated on first start.
    #[serde(default)]
    pub seed_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChainsConfig {
    #[serde(default)]
    pub evm: ChainConfig,
    #[serde(default)]
    pub xrp: ChainConfig,
    #[serde(default)]
    pub aptos: ChainConfig,
}

impl ChainsConfig {
    pub fn get(&self, chain: ChainKind) -> &ChainConfig {
        match chain {
            ChainKind::Evm => &self.evm,
            ChainKind::Xrp => &self.xrp,
            ChainKind::Aptos => &self.aptos,
        }
    }
}

/// Chain client for one rail. Only the local in-memory devnet is built in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Whether to register an adapter for this rail.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Starting balance of the node's account on the local devnet.
    #[serde(default = "default_local_funding", with = "meridian_core::amount::as_string")]
    pub local_funding: u128,
}

/// HTTP endpoint of a peer node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEndpoint {
    pub peer_id: String,
    /// Base URL, e.g. `http://127.0.0.1:7771`.
    pub url: String,
    /// Disabled endpoints stay registered but report an inactive connection.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

// Default value functions
fn default_node_id() -> String {
    "meridian-node".into()
}
fn default_api_addr() -> String {
    "127.0.0.1".into()
}
fn default_api_port() -> u16 {
    7771
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "text".into()
}
fn default_true() -> bool {
    true
}
fn default_local_funding() -> u128 {
    1_000_000_000_000
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_api_addr(),
            port: default_api_port(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            local_funding: default_local_funding(),
        }
    }
}

impl MeridianConfig {
    /// Load config from a TOML file, falling back to defaults for missing fields.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: MeridianConfig = toml::from_str(&contents)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save the current config to a TOML file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Claim log directory under the data dir.
    pub fn claims_db_path(&self) -> PathBuf {
        self.storage.data_dir.join("claims")
    }
}
