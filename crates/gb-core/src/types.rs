//! Core domain types

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::GbError;

/// Bytes of stdout/stderr retained in an [`ExecutionResult`]
pub const OUTPUT_TAIL_BYTES: usize = 64 * 1024;

/// The single remote endpoint managed by this process.
///
/// Built once from configuration and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Directory every command runs in; may start with `~/`
    pub working_dir: String,
    pub identity_file: PathBuf,
    pub strict_host_key: bool,
    pub connect_timeout: Duration,
}

impl RemoteTarget {
    /// `host:port` for socket connection
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

/// One remote command invocation.
///
/// `command` is opaque: it is handed to the remote shell untouched, so any
/// quoting it needs is the caller's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub command: String,
    /// Forward output to the local terminal as it arrives
    pub streamed: bool,
}

impl ExecutionRequest {
    pub fn streamed(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            streamed: true,
        }
    }

    pub fn captured(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            streamed: false,
        }
    }
}

/// Bounded buffer keeping only the most recent bytes written to it
#[derive(Debug, Clone)]
pub struct OutputTail {
    buf: VecDeque<u8>,
    capacity: usize,
}

impl OutputTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity.min(8192)),
            capacity,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        if data.len() >= self.capacity {
            self.buf.clear();
            self.buf.extend(&data[data.len() - self.capacity..]);
            return;
        }
        let overflow = (self.buf.len() + data.len()).saturating_sub(self.capacity);
        self.buf.drain(..overflow);
        self.buf.extend(data);
    }

    pub fn into_string(self) -> String {
        let bytes: Vec<u8> = self.buf.into_iter().collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Default for OutputTail {
    fn default() -> Self {
        Self::new(OUTPUT_TAIL_BYTES)
    }
}

/// Outcome of a remote command that actually ran
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Exit status reported by the remote side, never made up locally
    pub exit_code: i32,
    pub stdout_tail: String,
    pub stderr_tail: String,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a non-zero exit into [`GbError::RemoteExit`]
    pub fn check(self) -> Result<Self, GbError> {
        if self.success() {
            Ok(self)
        } else {
            Err(GbError::RemoteExit(self.exit_code))
        }
    }
}

/// One accelerator reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub device_index: u32,
    pub name: String,
    /// MiB
    pub mem_used: u64,
    /// MiB
    pub mem_total: u64,
    /// Percent, 0-100
    pub utilization: u8,
    /// Unix milliseconds
    pub timestamp: u64,
}

impl fmt::Display for TelemetrySample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GPU{} {} | util {:>3}% | mem {}/{} MiB",
            self.device_index, self.name, self.utilization, self.mem_used, self.mem_total
        )
    }
}

/// One element of the telemetry sequence
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryTick {
    /// One sample per device
    Samples(Vec<TelemetrySample>),
    /// This tick's query failed; polling continues
    Failed { at: u64, reason: String },
}

impl TelemetryTick {
    pub fn is_failure(&self) -> bool {
        matches!(self, TelemetryTick::Failed { .. })
    }
}

/// What the probe learned about accelerators
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accelerator {
    Detected(Vec<String>),
    None,
    Unknown,
}

impl fmt::Display for Accelerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Accelerator::Detected(names) => write!(f, "{}", names.join(", ")),
            Accelerator::None => write!(f, "none"),
            Accelerator::Unknown => write!(f, "unknown"),
        }
    }
}

/// Result of the connection probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub reachable: bool,
    pub accelerator: Accelerator,
    /// Time spent reaching and authenticating, when reachable
    pub latency: Option<Duration>,
    /// Why the host was not reachable
    pub detail: Option<String>,
}

impl ProbeReport {
    pub fn unreachable(detail: impl Into<String>) -> Self {
        Self {
            reachable: false,
            accelerator: Accelerator::Unknown,
            latency: None,
            detail: Some(detail.into()),
        }
    }
}

/// Lifecycle of a tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelState {
    Pending,
    Active,
    Failed,
    Closed,
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelState::Pending => write!(f, "pending"),
            TunnelState::Active => write!(f, "active"),
            TunnelState::Failed => write!(f, "failed"),
            TunnelState::Closed => write!(f, "closed"),
        }
    }
}

/// Handle to a detached forwarder process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwarderHandle {
    pub pid: u32,
    /// Unix milliseconds at spawn
    pub started_at: u64,
}

/// A tracked local → remote port forward
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelSpec {
    pub local_port: u16,
    pub remote_port: u16,
    pub label: String,
    pub handle: Option<ForwarderHandle>,
    pub state: TunnelState,
    /// Last failure, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TunnelSpec {
    pub fn pending(local_port: u16, remote_port: u16, label: impl Into<String>) -> Self {
        Self {
            local_port,
            remote_port,
            label: label.into(),
            handle: None,
            state: TunnelState::Pending,
            error: None,
        }
    }

    /// Default label when the caller gives none
    pub fn default_label(local_port: u16) -> String {
        format!("tunnel-{}", local_port)
    }

    /// Local URL the tunnel exposes
    pub fn local_url(&self) -> String {
        format!("http://localhost:{}", self.local_port)
    }
}
