//! Tunnel management
//!
//! A tunnel is a detached `gpubox __forward` process that binds a local port
//! and relays each accepted connection over SSH to a port on the host. The
//! [`TunnelManager`] owns the on-disk registry of those processes; the
//! [`ForwarderLauncher`] seam decides how forwarders are started and stopped.

mod forwarder;
mod launcher;
mod manager;

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;

use gb_core::types::ForwarderHandle;
use gb_core::GbError;

pub use forwarder::run_forwarder;
pub use launcher::ProcessLauncher;
pub use manager::{TunnelHold, TunnelManager};

/// What a forwarder needs to start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRequest {
    pub local_port: u16,
    pub remote_port: u16,
    pub label: String,
    /// Where the forwarder's own logs go
    pub log_path: PathBuf,
}

/// Starts, inspects and stops forwarders
#[async_trait]
pub trait ForwarderLauncher: Send + Sync {
    /// Start a forwarder and wait until it reports it is serving
    async fn launch(&self, request: &ForwardRequest) -> Result<ForwarderHandle, GbError>;

    /// Whether `handle` still names a forwarder we started for `local_port`
    fn owns(&self, handle: &ForwarderHandle, local_port: u16) -> bool;

    /// Whether the forwarder is actually serving its port
    async fn is_serving(&self, handle: &ForwarderHandle, local_port: u16) -> bool {
        self.owns(handle, local_port)
    }

    /// Stop a forwarder; one that already exited is not an error
    async fn stop(&self, handle: &ForwarderHandle) -> Result<(), GbError>;
}

/// Single line a forwarder writes on stdout once it has settled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handshake {
    Ready,
    Error(String),
}

impl Handshake {
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end();
        if line == "READY" {
            Some(Handshake::Ready)
        } else {
            line.strip_prefix("ERROR ")
                .map(|msg| Handshake::Error(msg.to_string()))
        }
    }
}

impl fmt::Display for Handshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handshake::Ready => write!(f, "READY"),
            // Keep it on one line
            Handshake::Error(msg) => write!(f, "ERROR {}", msg.replace('\n', " ")),
        }
    }
}
