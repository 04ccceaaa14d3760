//! Mirror configuration, stored as JSON next to the other per-user config
//! files (`$XDG_CONFIG_HOME/pwdevmirror/config.json`).

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config from {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to write config to {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to parse config from {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to serialize config: {source}")]
    Serialize { source: serde_json::Error },
    #[error("failed to create config directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Remote daemon name; `None` uses `PIPEWIRE_REMOTE` or the default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
    /// Upper bound on connect plus initial enumeration.
    pub connect_timeout_ms: u64,
    /// Bind sink/source nodes to follow their volume.
    pub track_volume: bool,
    pub reconnect: ReconnectConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            remote: None,
            connect_timeout_ms: 5000,
            track_volume: true,
            reconnect: ReconnectConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub enabled: bool,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Consecutive failed attempts before giving up; 0 retries forever.
    pub max_attempts: u32,
    /// A session that lasted this long resets the backoff.
    pub stable_session_secs: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_backoff_ms: 500,
            max_backoff_ms: 8000,
            max_attempts: 0,
            stable_session_secs: 30,
        }
    }
}

impl Config {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("pwdevmirror").join("config.json"))
    }

    /// Load from the default location. A missing file is not an error.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("No config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        let config = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json =
            serde_json::to_string_pretty(self).map_err(|source| ConfigError::Serialize { source })?;
        std::fs::write(path, json).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(1))
    }
}
