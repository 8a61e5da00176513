use mtpfs_device::DeviceConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::filesystem::FuseConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatedStorage {
    pub name: String,
    pub capacity_bytes: u64,
}

impl Default for EmulatedStorage {
    fn default() -> Self {
        Self {
            name: "Internal".to_string(),
            capacity_bytes: 8 * 1024 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MtpfsConfig {
    pub scratch_root: PathBuf,
    pub attr_timeout_secs: u64,
    pub entry_timeout_secs: u64,
    pub foreground_user: i32,
    #[serde(flatten)]
    pub device: DeviceConfig,
    pub emulated: EmulatedStorage,
}

impl Default for MtpfsConfig {
    fn default() -> Self {
        Self {
            scratch_root: PathBuf::from("/data/local/mtp_tmp"),
            attr_timeout_secs: 1,
            entry_timeout_secs: 1,
            foreground_user: 100,
            device: DeviceConfig::default(),
            emulated: EmulatedStorage::default(),
        }
    }
}

impl MtpfsConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => Ok(toml::from_str(&contents)?),
            "json" => Ok(serde_json::from_str(&contents)?),
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }

    pub fn fuse_config(&self) -> FuseConfig {
        FuseConfig {
            attr_timeout: Duration::from_secs(self.attr_timeout_secs),
            entry_timeout: Duration::from_secs(self.entry_timeout_secs),
        }
    }
}
