//! gb-core: shared types, configuration and tunnel registry for gpubox
//!
//! This crate holds everything that does not talk to the network: the
//! configuration file, the error taxonomy, the domain types, the `Remote`
//! trait the transport implements, and the on-disk registry that lets tunnels
//! outlive the invocation that opened them.

pub mod command;
pub mod config;
pub mod error;
pub mod process;
pub mod registry;
pub mod time;
pub mod traits;
pub mod types;

pub use error::{ConfigError, GbError, RegistryError};
pub use registry::{TunnelRegistry, TunnelSelector};
pub use traits::Remote;
pub use types::{
    Accelerator, ExecutionRequest, ExecutionResult, ProbeReport, RemoteTarget, TelemetrySample,
    TelemetryTick, TunnelSpec, TunnelState,
};
