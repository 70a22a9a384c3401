//! Core error types for gpubox

use std::path::PathBuf;
use thiserror::Error;

/// Exit code reported when the remote host could not be reached or authenticated.
pub const TRANSPORT_EXIT_CODE: i32 = 2;

/// Top-level error type for gpubox operations
#[derive(Error, Debug)]
pub enum GbError {
    /// The host could not be reached, authenticated, or the channel broke
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote command ran and exited non-zero
    #[error("Remote command exited with status {0}")]
    RemoteExit(i32),

    /// A helper command (directory creation, file write) ran on the host and failed
    #[error("{step} failed on the host (status {code}): {detail}")]
    RemoteStep {
        step: String,
        code: i32,
        detail: String,
    },

    /// A local file required by the operation does not exist
    #[error("File not found: {}", .0.display())]
    ResourceNotFound(PathBuf),

    /// The background forwarder could not be brought up
    #[error("Failed to establish tunnel on local port {port}: {source}")]
    TunnelEstablish {
        port: u16,
        #[source]
        source: Box<GbError>,
    },

    /// Automatic provisioning of a remote dependency failed
    #[error("Provisioning failed: {0}")]
    Provision(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Tunnel registry error
    #[error("Tunnel registry error: {0}")]
    Registry(#[from] RegistryError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GbError {
    /// Build a transport error from anything printable
    pub fn transport(msg: impl std::fmt::Display) -> Self {
        Self::Transport(msg.to_string())
    }

    /// Whether this error means the host was never reached
    pub fn is_transport(&self) -> bool {
        match self {
            GbError::Transport(_) => true,
            GbError::TunnelEstablish { source, .. } => source.is_transport(),
            _ => false,
        }
    }

    /// Process exit code for this error.
    ///
    /// Remote exit codes pass through verbatim, transport failures map to
    /// [`TRANSPORT_EXIT_CODE`], everything else is a generic failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            GbError::RemoteExit(code) => *code,
            GbError::Transport(_) => TRANSPORT_EXIT_CODE,
            _ => 1,
        }
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Errors touching the on-disk tunnel registry
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Failed to create state directory: {0}")]
    CreateDir(#[source] std::io::Error),

    #[error("Failed to open registry file: {0}")]
    OpenFile(#[source] std::io::Error),

    #[error("Failed to acquire registry lock: {0}")]
    Lock(#[source] std::io::Error),

    #[error("Failed to read registry file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("Failed to parse registry file: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("Failed to serialize registry: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Failed to write registry file: {0}")]
    WriteFile(#[source] std::io::Error),

    #[error("Failed to rename temp file: {0}")]
    Rename(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_exit_code_passes_through() {
        assert_eq!(GbError::RemoteExit(7).exit_code(), 7);
        assert_eq!(GbError::RemoteExit(0).exit_code(), 0);
    }

    #[test]
    fn test_transport_is_distinct_from_remote_exit() {
        let transport = GbError::transport("connection refused");
        assert!(transport.is_transport());
        assert_eq!(transport.exit_code(), TRANSPORT_EXIT_CODE);

        // A remote command that itself exits 2 is still not a transport failure
        let remote = GbError::RemoteExit(2);
        assert!(!remote.is_transport());
    }

    #[test]
    fn test_failed_remote_step_is_not_transport() {
        let err = GbError::RemoteStep {
            step: "mkdir -p /srv/work".to_string(),
            code: 1,
            detail: "Permission denied".to_string(),
        };
        assert!(!err.is_transport());
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("Permission denied"));
    }

    #[test]
    fn test_tunnel_establish_keeps_transport_cause() {
        let err = GbError::TunnelEstablish {
            port: 8888,
            source: Box::new(GbError::transport("auth rejected")),
        };
        assert!(err.is_transport());
        assert!(err.to_string().contains("8888"));
        assert_eq!(err.exit_code(), 1);
    }
}
