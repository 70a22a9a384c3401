//! Configuration management for gpubox

mod remote;
pub mod serde_utils;
mod services;

pub use remote::RemoteConfig;
pub use services::{JupyterConfig, TelemetryConfig, TrainConfig, TunnelConfig};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Contents of `config.toml`, one table per concern
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub remote: RemoteConfig,
    pub telemetry: TelemetryConfig,
    pub jupyter: JupyterConfig,
    pub train: TrainConfig,
    pub tunnel: TunnelConfig,
}

impl ConfigFile {
    /// Load from an explicit path, or from the default location if it exists.
    ///
    /// A missing default file yields the built-in defaults; a missing explicit
    /// file is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => load_config(path),
            None => {
                let path = default_config_path();
                if path.exists() {
                    load_config(&path)
                } else {
                    tracing::debug!("No config at {:?}, using defaults", path);
                    Ok(Self::default())
                }
            }
        }
    }
}

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gpubox")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Directory holding runtime state (tunnel registry, forwarder logs)
pub fn default_state_dir() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gpubox")
}

/// Expand a leading `~/` against the home directory
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir().unwrap_or_default().join(rest),
        Err(_) => path.to_path_buf(),
    }
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}
