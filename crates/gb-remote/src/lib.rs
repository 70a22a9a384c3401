//! gb-remote: everything that talks to the managed host
//!
//! - [`ssh`]: russh client, sessions and the shared [`Remote`](gb_core::Remote) implementation
//! - [`probe`]: bounded reachability and accelerator check
//! - [`exec`] and [`sync`]: run commands and upload artifacts
//! - [`telemetry`]: cancellable stream of accelerator readings
//! - [`tunnel`]: detached port forwarders tracked across invocations
//! - [`notebook`]: provision, start and tunnel a notebook server
//! - [`shell`]: interactive PTY session

pub mod exec;
pub mod info;
pub mod notebook;
pub mod probe;
pub mod shell;
pub mod ssh;
pub mod sync;
pub mod telemetry;
pub mod tunnel;

#[cfg(test)]
mod testing;

pub use exec::CommandExecutor;
pub use notebook::{NotebookFlow, NotebookSession};
pub use probe::probe;
pub use ssh::{SshRemote, SshSession};
pub use sync::{ArtifactSync, SyncedArtifact};
pub use telemetry::TelemetryPoller;
pub use tunnel::{ForwarderLauncher, ProcessLauncher, TunnelHold, TunnelManager};
