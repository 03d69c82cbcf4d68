//! Configuration Storage
//!
//! Reads and writes JSON files in the config directory.
//! Config location: ~/.keystone on macOS/Linux, %APPDATA%\Keystone on Windows

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::types::{BrokerConfig, CONFIG_VERSION};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to determine config directory")]
    NoConfigDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config version {found} is newer than supported {supported}")]
    VersionTooNew { found: u32, supported: u32 },
}

pub fn config_dir() -> Result<PathBuf, StorageError> {
    #[cfg(windows)]
    {
        if let Some(app_data) = dirs::config_dir() {
            return Ok(app_data.join("Keystone"));
        }
        dirs::home_dir()
            .map(|home| home.join(".keystone"))
            .ok_or(StorageError::NoConfigDir)
    }

    #[cfg(not(windows))]
    {
        dirs::home_dir()
            .map(|home| home.join(".keystone"))
            .ok_or(StorageError::NoConfigDir)
    }
}

pub fn config_file() -> Result<PathBuf, StorageError> {
    Ok(config_dir()?.join("config.json"))
}

pub fn hosts_file() -> Result<PathBuf, StorageError> {
    Ok(config_dir()?.join("hosts.json"))
}

/// Result of reading a JSON document from disk
pub(crate) enum Loaded<T> {
    Missing,
    Corrupted,
    Parsed(T),
}

/// Read and parse `path`. A file that fails to parse is copied aside first.
pub(crate) async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Loaded<T>, StorageError> {
    let contents = match fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Loaded::Missing),
        Err(e) => return Err(StorageError::Io(e)),
    };

    match serde_json::from_str::<T>(&contents) {
        Ok(value) => Ok(Loaded::Parsed(value)),
        Err(e) => {
            tracing::warn!("{:?} is corrupted: {}", path, e);
            match backup_file(path).await {
                Ok(backup_path) => {
                    tracing::warn!("Corrupted file backed up to {:?}, using defaults", backup_path)
                }
                Err(backup_err) => {
                    tracing::error!("Failed to back up corrupted {:?}: {}", path, backup_err)
                }
            }
            Ok(Loaded::Corrupted)
        }
    }
}

/// Write to a temp file first, then rename over the target
pub(crate) async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let temp_path = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(value)?;

    let mut file = fs::File::create(&temp_path).await?;
    file.write_all(json.as_bytes()).await?;
    file.sync_all().await?;

    fs::rename(&temp_path, path).await?;
    Ok(())
}

/// Copy `path` to `<path>.backup.<timestamp>` if it exists
pub(crate) async fn backup_file(path: &Path) -> Result<PathBuf, StorageError> {
    let backup_path = path.with_extension(format!(
        "json.backup.{}",
        chrono::Utc::now().format("%Y%m%d_%H%M%S")
    ));

    if fs::metadata(path).await.is_ok() {
        fs::copy(path, &backup_path).await?;
    }
    Ok(backup_path)
}

/// `config.json` manager
pub struct ConfigStorage {
    path: PathBuf,
}

impl ConfigStorage {
    pub fn new() -> Result<Self, StorageError> {
        Ok(Self {
            path: config_file()?,
        })
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    /// Load configuration.
    ///
    /// A missing file yields defaults. A corrupted file is backed up and
    /// defaults are used.
    pub async fn load(&self) -> Result<BrokerConfig, StorageError> {
        match read_json::<BrokerConfig>(&self.path).await? {
            Loaded::Parsed(config) => {
                if config.version > CONFIG_VERSION {
                    return Err(StorageError::VersionTooNew {
                        found: config.version,
                        supported: CONFIG_VERSION,
                    });
                }
                Ok(config)
            }
            Loaded::Missing | Loaded::Corrupted => Ok(BrokerConfig::default()),
        }
    }

    pub async fn save(&self, config: &BrokerConfig) -> Result<(), StorageError> {
        write_json_atomic(&self.path, config).await
    }

    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path).await.is_ok()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn backup(&self) -> Result<PathBuf, StorageError> {
        backup_file(&self.path).await
    }
}
