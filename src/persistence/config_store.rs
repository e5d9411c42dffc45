//! Configuration store on the local filesystem.
//!
//! Bring-up of the persistent storage: the config directory is created on
//! first boot, a default document is written if none exists, and the document
//! is parsed and validated before anything else starts.

use crate::config::{AppConfig, ConfigError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const APP_DIR: &str = "ledcontroller";
const CONFIG_FILE: &str = "config.toml";
const CONFIG_ENV: &str = "LEDCONTROLLER_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("No configuration directory available on this platform")]
    NoConfigDir,

    #[error("Failed to create storage directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize default configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration in {path}: {source}")]
    Invalid {
        path: PathBuf,
        #[source]
        source: ConfigError,
    },
}

/// Handle to the on-disk configuration document.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Resolves the document location: `$LEDCONTROLLER_CONFIG` if set, else
    /// `<config dir>/ledcontroller/config.toml`.
    pub fn default_path() -> Result<PathBuf, StorageError> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Ok(PathBuf::from(path));
        }
        let mut path = dirs::config_dir().ok_or(StorageError::NoConfigDir)?;
        path.push(APP_DIR);
        path.push(CONFIG_FILE);
        Ok(path)
    }

    /// Prepares storage at `path`, creating the parent directory and a default
    /// document when missing.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            if !dir.exists() {
                info!("Creating storage directory {}", dir.display());
                fs::create_dir_all(dir).map_err(|source| StorageError::CreateDir {
                    path: dir.to_path_buf(),
                    source,
                })?;
            }
        }

        if !path.exists() {
            warn!(
                "No configuration at {}, writing defaults",
                path.display()
            );
            let content = toml::to_string_pretty(&AppConfig::default())?;
            fs::write(&path, content).map_err(|source| StorageError::Write {
                path: path.clone(),
                source,
            })?;
        }

        debug!("Configuration store ready at {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<AppConfig, StorageError> {
        let content = fs::read_to_string(&self.path).map_err(|source| StorageError::Read {
            path: self.path.clone(),
            source,
        })?;
        let config: AppConfig = toml::from_str(&content).map_err(|source| StorageError::Parse {
            path: self.path.clone(),
            source,
        })?;
        config.validate().map_err(|source| StorageError::Invalid {
            path: self.path.clone(),
            source,
        })?;
        info!("Loaded configuration from {}", self.path.display());
        Ok(config)
    }
}
