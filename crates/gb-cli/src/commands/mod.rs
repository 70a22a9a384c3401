//! CLI command implementations
//!
//! Every command returns the process exit code on success; errors are mapped
//! to exit codes once, in `main`.

mod check;
mod config;
mod info;
mod jupyter;
mod monitor;
mod run;
mod shell;
mod sync;
mod tunnel;

pub use check::check_command;
pub use config::{config_init, config_path, config_show};
pub use info::info_command;
pub use jupyter::jupyter_command;
pub use monitor::monitor_command;
pub use run::{run_command, script_command, ScriptMode};
pub use shell::shell_command;
pub use sync::sync_command;
pub use tunnel::{forward_command, tunnel_command, tunnels_command, untunnel_command};
