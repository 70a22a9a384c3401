//! gpubox CLI
//!
//! Single binary driving one remote GPU host:
//! - Connectivity checks and host inventory
//! - Command and script execution with artifact sync
//! - Port tunnels (held in the foreground or detached) and Jupyter
//! - Accelerator telemetry and an interactive shell

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gpubox::commands::{self, ScriptMode};
use gpubox::context::{shutdown_token, AppContext, RemoteOverrides};
use gpubox::output::report_error;

#[derive(Parser)]
#[command(name = "gpubox")]
#[command(author, version, about = "Drive a remote GPU host from your workstation")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Remote host (overrides remote.host)
    #[arg(long, global = true, env = "GPUBOX_HOST")]
    host: Option<String>,

    /// Remote user (overrides remote.user)
    #[arg(long, global = true, env = "GPUBOX_USER")]
    user: Option<String>,

    /// Remote working directory (overrides remote.working_dir)
    #[arg(long, global = true, env = "GPUBOX_DIR")]
    dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the host is reachable and report its accelerators
    Check,

    /// Run a command line in the remote working directory
    Run {
        /// Command and arguments, passed to the remote shell as one line
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Upload a Python script and run it remotely
    Python {
        /// Local script
        script: PathBuf,
        /// Arguments passed to the script
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Upload a training script and run it with the [train] environment
    Train {
        /// Local script
        script: PathBuf,
        /// Arguments passed to the script
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Start (or reuse) a remote Jupyter server and tunnel to it
    Jupyter {
        /// Local port (defaults to jupyter.local_port)
        port: Option<u16>,
        /// Remote port (defaults to jupyter.remote_port)
        #[arg(long)]
        remote_port: Option<u16>,
        /// Leave the tunnel running in the background
        #[arg(short, long)]
        detach: bool,
    },

    /// Forward a local port to a port on the host
    Tunnel {
        /// Local port to listen on
        local_port: u16,
        /// Port on the host to reach
        remote_port: u16,
        /// Name for the tunnel (defaults to the local port)
        label: Option<String>,
        /// Leave the tunnel running in the background
        #[arg(short, long)]
        detach: bool,
    },

    /// List tracked tunnels
    Tunnels {
        /// Forget stopped and failed tunnels first
        #[arg(long)]
        prune: bool,
    },

    /// Close a tunnel by label or local port
    Untunnel {
        /// Tunnel label or local port
        selector: String,
    },

    /// Upload a file or directory into the remote working directory
    Sync {
        /// Local file or directory
        path: PathBuf,
    },

    /// Stream accelerator utilization and memory until Ctrl+C
    Monitor {
        /// Seconds between samples (defaults to telemetry.interval)
        #[arg(short, long, value_parser = parse_interval)]
        interval: Option<Duration>,
    },

    /// Show system, accelerator and toolkit information for the host
    Info,

    /// Open an interactive shell on the host
    Shell,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Run a tunnel forwarder in this process (used by detached tunnels)
    #[command(name = "__forward", hide = true)]
    Forward {
        #[arg(long)]
        local_port: u16,
        #[arg(long)]
        remote_port: u16,
        #[arg(long)]
        label: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Show the configuration file path
    Path,
    /// Write a starter configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

fn parse_interval(s: &str) -> Result<Duration, String> {
    let secs: f64 = s
        .parse()
        .map_err(|_| format!("'{}' is not a number of seconds", s))?;
    Duration::try_from_secs_f64(secs).map_err(|_| format!("'{}' is not a valid interval", s))
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Help and version go to stdout and succeed; usage errors exit 1
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    init_tracing(&cli);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => report_error(&e),
    };

    let _ = std::io::stdout().flush();
    std::process::exit(code);
}

fn init_tracing(cli: &Cli) {
    let forwarder = matches!(cli.command, Commands::Forward { .. });

    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) if forwarder => "info",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    // stdout carries command output (and the forwarder handshake)
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(!forwarder)
                .with_writer(std::io::stderr),
        )
        .init();
}

async fn run(cli: Cli) -> Result<i32> {
    let config_path = cli.config;

    // Config commands must work without a valid (or existing) file
    let command = match cli.command {
        Commands::Config { action } => {
            return match action {
                ConfigAction::Show => commands::config_show(config_path.as_deref()),
                ConfigAction::Path => commands::config_path(config_path.as_deref()),
                ConfigAction::Init { force } => {
                    commands::config_init(config_path.as_deref(), force)
                }
            };
        }
        command => command,
    };

    let overrides = RemoteOverrides {
        host: cli.host,
        user: cli.user,
        dir: cli.dir,
    };
    let ctx = AppContext::load(config_path, overrides)?;

    match command {
        Commands::Check => commands::check_command(&ctx).await,
        Commands::Run { command } => commands::run_command(&ctx, &command).await,
        Commands::Python { script, args } => {
            commands::script_command(&ctx, &script, &args, ScriptMode::Python).await
        }
        Commands::Train { script, args } => {
            commands::script_command(&ctx, &script, &args, ScriptMode::Train).await
        }
        Commands::Jupyter {
            port,
            remote_port,
            detach,
        } => commands::jupyter_command(&ctx, port, remote_port, detach, shutdown_token()).await,
        Commands::Tunnel {
            local_port,
            remote_port,
            label,
            detach,
        } => {
            commands::tunnel_command(
                &ctx,
                local_port,
                remote_port,
                label.as_deref(),
                detach,
                shutdown_token(),
            )
            .await
        }
        Commands::Tunnels { prune } => commands::tunnels_command(&ctx, prune).await,
        Commands::Untunnel { selector } => commands::untunnel_command(&ctx, &selector).await,
        Commands::Sync { path } => commands::sync_command(&ctx, &path).await,
        Commands::Monitor { interval } => {
            commands::monitor_command(&ctx, interval, shutdown_token()).await
        }
        Commands::Info => commands::info_command(&ctx).await,
        Commands::Shell => commands::shell_command(&ctx, shutdown_token()).await,
        Commands::Forward {
            local_port,
            remote_port,
            label,
        } => {
            commands::forward_command(&ctx, local_port, remote_port, &label, shutdown_token())
                .await
        }
        Commands::Config { .. } => unreachable!("config commands return before loading"),
    }
}
