//! TOML configuration for the Harbor daemon.
//!
//! Every section is optional; missing keys fall back to the defaults of
//! [`ShardEngineConfig`] and the sections below.

use std::path::{Path, PathBuf};
use std::time::Duration;

use harbor_engine::{Backoff, ShardEngineConfig};
use harbor_net::WireCodec;
use serde::Deserialize;

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Node identity and addresses.
    pub node: NodeSection,
    /// Ledger connection.
    pub chain: ChainSection,
    /// Shard engine tuning.
    pub engine: EngineSection,
    /// Content storage backend.
    pub storage: StorageSection,
    /// Logging configuration.
    pub log: LogSection,
}

/// `[node]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// Directory for persistent data (state database, content, node key).
    pub data_dir: PathBuf,
    /// This node's chain address. Empty means "use the endpoint id".
    pub address: String,
    /// Hex-encoded 32-byte endpoint secret key. Empty means "load or create
    /// `node.key` in `data_dir`".
    pub secret: String,
    /// Payload encoding for outbound requests: `"postcard"` or `"json"`.
    pub codec: String,
}

impl Default for NodeSection {
    fn default() -> Self {
        let data_dir = dirs::home_dir()
            .map(|h| h.join(".harbor"))
            .unwrap_or_else(|| PathBuf::from(".harbor"));
        Self {
            data_dir,
            address: String::new(),
            secret: String::new(),
            codec: "postcard".to_string(),
        }
    }
}

/// `[chain]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ChainSection {
    /// Run against the in-process development ledger.
    pub dev: bool,
}

impl Default for ChainSection {
    fn default() -> Self {
        Self { dev: true }
    }
}

/// `[engine]` section. Unset values keep the engine defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// Maximum shards processed concurrently.
    pub window: Option<usize>,
    pub poll_interval_ms: Option<u64>,
    /// Failed attempts before a shard or migration is abandoned.
    pub max_retries: Option<u32>,
    pub backoff_base_ms: Option<u64>,
    pub backoff_max_ms: Option<u64>,
    /// Period of the expiration sweep.
    pub expire_interval_secs: Option<u64>,
}

/// `[storage]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Backend type: `"file"` (default) or `"memory"`.
    pub backend: String,
    /// Directory of content this node serves as a gateway. Defaults to
    /// `data_dir/staging`.
    pub staging_dir: Option<PathBuf>,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: "file".to_string(),
            staging_dir: None,
        }
    }
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"harbor_engine=trace"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CliConfig {
    /// Load config from a TOML file, or use defaults if no path given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)?;
                let config: CliConfig = toml::from_str(&content)?;
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a TOML string (used in tests).
    #[cfg(test)]
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn memory_mode(&self) -> bool {
        self.storage.backend == "memory"
    }

    pub fn state_dir(&self) -> PathBuf {
        self.node.data_dir.join("state")
    }

    pub fn content_dir(&self) -> PathBuf {
        self.node.data_dir.join("content")
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.storage
            .staging_dir
            .clone()
            .unwrap_or_else(|| self.node.data_dir.join("staging"))
    }

    pub fn codec(&self) -> anyhow::Result<WireCodec> {
        Ok(self.node.codec.parse()?)
    }

    /// Engine settings for a node at `address`.
    pub fn engine_config(&self, address: String) -> ShardEngineConfig {
        let defaults = ShardEngineConfig::default();
        let e = &self.engine;
        ShardEngineConfig {
            address,
            window: e.window.unwrap_or(defaults.window),
            poll_interval: e
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            max_retries: e.max_retries.unwrap_or(defaults.max_retries),
            backoff: Backoff {
                base: e
                    .backoff_base_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.backoff.base),
                max: e
                    .backoff_max_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.backoff.max),
            },
            expire_interval: e
                .expire_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.expire_interval),
            list_page_size: defaults.list_page_size,
        }
    }
}

/// Decode a 64-character hex string into 32 bytes.
pub fn parse_secret(hex: &str) -> anyhow::Result<[u8; 32]> {
    let hex = hex.trim();
    anyhow::ensure!(
        hex.len() == 64 && hex.is_ascii(),
        "secret must be 64 hex characters"
    );
    let mut out = [0u8; 32];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
            .map_err(|_| anyhow::anyhow!("secret is not valid hex"))?;
    }
    Ok(out)
}
