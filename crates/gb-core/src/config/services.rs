//! Configuration for telemetry, notebook, training and tunnel flows

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;

/// The `[telemetry]` table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Time between ticks
    #[serde(with = "duration_secs")]
    pub interval: Duration,

    /// How long a single tick may wait on the remote query
    #[serde(with = "duration_secs")]
    pub tick_timeout: Duration,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            tick_timeout: Duration::from_secs(5),
        }
    }
}

/// The `[jupyter]` table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JupyterConfig {
    /// Local end of the notebook tunnel
    pub local_port: u16,

    /// Port the notebook server binds on the remote host
    pub remote_port: u16,

    /// Executable probed with `command -v` to decide whether to provision
    pub binary: String,

    /// Run once when `binary` is missing
    pub install_command: String,

    /// Extra arguments appended to `jupyter lab`
    pub extra_args: Vec<String>,

    /// How long to wait for the server to list itself with a token
    #[serde(with = "duration_secs")]
    pub startup_timeout: Duration,
}

impl Default for JupyterConfig {
    fn default() -> Self {
        Self {
            local_port: 8888,
            remote_port: 8888,
            binary: "jupyter".to_string(),
            install_command: "python3 -m pip install --user jupyterlab".to_string(),
            extra_args: Vec::new(),
            startup_timeout: Duration::from_secs(30),
        }
    }
}

/// The `[train]` table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Interpreter used for `python` and `train`
    pub interpreter: String,

    /// Environment injected in front of `train` runs
    pub env: BTreeMap<String, String>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        let mut env = BTreeMap::new();
        env.insert("CUDA_VISIBLE_DEVICES".to_string(), "0".to_string());
        env.insert("PYTHONUNBUFFERED".to_string(), "1".to_string());
        Self {
            env,
            interpreter: "python3".to_string(),
        }
    }
}

/// The `[tunnel]` table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Deadline for a forwarder to report READY
    #[serde(with = "duration_secs")]
    pub handshake_timeout: Duration,

    /// Where the registry and forwarder logs live
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(20),
            state_dir: None,
        }
    }
}

impl TunnelConfig {
    /// Resolved state directory
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .as_deref()
            .map(super::expand_home)
            .unwrap_or_else(super::default_state_dir)
    }
}
