use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::backend::CompanionPoll;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Aaru,
    Ddrescue,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub root_dir: PathBuf,
    pub batch_prefix: String,
    pub source_device: PathBuf,
    pub backend: BackendKind,
    pub aaru_bin: PathBuf,
    pub ddrescue_bin: PathBuf,
    #[serde(default = "default_umount_bin")]
    pub umount_bin: PathBuf,
    #[serde(default = "default_mount_table")]
    pub mount_table: PathBuf,
    pub block_size: u64,
    pub retries: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub companion_poll_interval_ms: u64,
    #[serde(default = "default_max_wait_secs")]
    pub companion_max_wait_secs: u64,
    #[serde(default)]
    pub enable_catalog_lookup: bool,
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub config_hash: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

fn default_umount_bin() -> PathBuf {
    PathBuf::from("umount")
}

fn default_mount_table() -> PathBuf {
    PathBuf::from("/proc/self/mounts")
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_max_wait_secs() -> u64 {
    120
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_size == 0 {
            return Err(ConfigError::Invalid("block_size must be greater than 0".into()));
        }
        if self.companion_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "companion_poll_interval_ms must be greater than 0".into(),
            ));
        }
        if self.source_device.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("source_device is empty".into()));
        }
        if self.enable_catalog_lookup && self.catalog_path.is_none() {
            return Err(ConfigError::Invalid(
                "enable_catalog_lookup requires catalog_path".into(),
            ));
        }
        Ok(())
    }

    pub fn companion_poll(&self) -> CompanionPoll {
        CompanionPoll {
            interval: Duration::from_millis(self.companion_poll_interval_ms),
            max_wait: Duration::from_secs(self.companion_max_wait_secs),
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
    let bytes: Vec<u8> = if let Some(p) = path {
        std::fs::read(p)?
    } else {
        include_bytes!("../config/default.yml").to_vec()
    };

    let config: Config = serde_yaml::from_slice(&bytes)?;
    config.validate()?;

    let config_hash = hash_bytes(&bytes);

    Ok(LoadedConfig { config, config_hash })
}

fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    hex::encode(digest)
}
