//! Configuration management for LedgerChain

use crate::error::{LedgerError, Result};
use crate::storage::chunk::DEFAULT_COMPRESSION_LEVEL;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "ledger.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    File,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default = "default_data_dir")]
    pub path: PathBuf,
    #[serde(default = "default_block_chunk_size")]
    pub block_chunk_size: u64,
    #[serde(default = "default_snapshot_period")]
    pub snapshot_period_in_blocks: u64,
    #[serde(default = "default_true")]
    pub compress: bool,
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            path: default_data_dir(),
            block_chunk_size: default_block_chunk_size(),
            snapshot_period_in_blocks: default_snapshot_period(),
            compress: true,
            compression_level: default_compression_level(),
        }
    }
}

impl StorageConfig {
    pub fn in_memory() -> Self {
        Self {
            backend: BackendKind::Memory,
            ..Self::default()
        }
    }

    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Hex secret key used to sign blocks while this node is primary validator.
    #[serde(default)]
    pub signing_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Base URLs of peers, e.g. `http://127.0.0.1:8555`.
    #[serde(default)]
    pub peers: Vec<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            peers: Vec::new(),
            batch_size: default_batch_size(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_block_chunk_size() -> u64 {
    1000
}

fn default_snapshot_period() -> u64 {
    100
}

fn default_true() -> bool {
    true
}

fn default_compression_level() -> i32 {
    DEFAULT_COMPRESSION_LEVEL
}

fn default_batch_size() -> u64 {
    100
}

fn default_timeout() -> u64 {
    10
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.storage.block_chunk_size == 0 {
            return Err(LedgerError::Config(
                "storage.block_chunk_size must be at least 1".to_string(),
            ));
        }
        if self.storage.snapshot_period_in_blocks == 0 {
            return Err(LedgerError::Config(
                "storage.snapshot_period_in_blocks must be at least 1".to_string(),
            ));
        }
        if self.storage.backend == BackendKind::File && self.storage.path.as_os_str().is_empty() {
            return Err(LedgerError::Config("storage.path must be set".to_string()));
        }
        if self.sync.batch_size == 0 {
            return Err(LedgerError::Config(
                "sync.batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Reads `path`, falling back to defaults when the file is absent.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let config: Config = match fs::read_to_string(path) {
        Ok(contents) => toml::from_str(&contents)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
        Err(e) => {
            return Err(LedgerError::Config(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            )))
        }
    };
    config.validate()?;
    Ok(config)
}
