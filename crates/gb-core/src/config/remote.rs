//! Remote host configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;
use crate::error::ConfigError;
use crate::types::RemoteTarget;

/// The `[remote]` table: how to reach the managed host
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Hostname or address of the remote machine
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// SSH port
    pub port: u16,

    /// Remote login user
    pub user: String,

    /// Directory every remote command runs in
    pub working_dir: String,

    /// Private key used for public-key authentication
    pub identity_file: PathBuf,

    /// Reject hosts that are not already in `~/.ssh/known_hosts`
    pub strict_host_key: bool,

    /// Upper bound on TCP connect + SSH handshake + auth
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: 22,
            user: whoami::username(),
            working_dir: "~/gpubox".to_string(),
            identity_file: PathBuf::from("~/.ssh/id_ed25519"),
            strict_host_key: false,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl RemoteConfig {
    /// Apply command-line / environment overrides
    pub fn with_overrides(
        mut self,
        host: Option<String>,
        user: Option<String>,
        working_dir: Option<String>,
    ) -> Self {
        if host.is_some() {
            self.host = host;
        }
        if let Some(user) = user {
            self.user = user;
        }
        if let Some(dir) = working_dir {
            self.working_dir = dir;
        }
        self
    }

    /// Resolve into the immutable target used by every remote operation
    pub fn target(&self) -> Result<RemoteTarget, ConfigError> {
        let host = self
            .host
            .clone()
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingField("remote.host".to_string()))?;

        if self.working_dir.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "remote.working_dir must not be empty".to_string(),
            ));
        }

        Ok(RemoteTarget {
            host,
            port: self.port,
            user: self.user.clone(),
            working_dir: self.working_dir.clone(),
            identity_file: super::expand_home(&self.identity_file),
            strict_host_key: self.strict_host_key,
            connect_timeout: self.connect_timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_host_names_the_key() {
        let err = RemoteConfig::default().target().unwrap_err();
        assert!(err.to_string().contains("remote.host"));
    }

    #[test]
    fn test_overrides_win() {
        let config = RemoteConfig {
            host: Some("from-file".to_string()),
            ..Default::default()
        }
        .with_overrides(Some("from-env".to_string()), Some("alice".to_string()), None);

        let target = config.target().unwrap();
        assert_eq!(target.host, "from-env");
        assert_eq!(target.user, "alice");
        assert_eq!(target.working_dir, "~/gpubox");
        assert!(!target.identity_file.starts_with("~"));
    }
}
