//! gpubox CLI library
//!
//! Command implementations, per-invocation context, and terminal output
//! helpers behind the `gpubox` binary.

pub mod commands;
pub mod context;
pub mod output;
