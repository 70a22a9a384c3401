//! Config command implementations

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use gb_core::config::{self, ConfigFile, RemoteConfig};

use crate::output::{print_error, print_info, print_success, print_warning};

fn resolve_path(config_path: Option<&Path>) -> PathBuf {
    config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(config::default_config_path)
}

/// Print the effective configuration (file values over defaults)
pub fn config_show(config_path: Option<&Path>) -> Result<i32> {
    let path = resolve_path(config_path);
    if path.exists() {
        print_info(&format!("Configuration file: {}", path.display()));
    } else {
        print_warning(&format!(
            "No configuration file at {}; showing defaults",
            path.display()
        ));
        print_info("Run 'gpubox config init' to create one");
    }

    let config = ConfigFile::load(config_path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    println!();
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(0)
}

/// Print the configuration file path
pub fn config_path(config_path: Option<&Path>) -> Result<i32> {
    println!("{}", resolve_path(config_path).display());
    Ok(0)
}

/// Write a commented starter configuration
pub fn config_init(config_path: Option<&Path>, force: bool) -> Result<i32> {
    let path = resolve_path(config_path);

    if path.exists() && !force {
        print_error(&format!("Config file already exists: {}", path.display()));
        print_info("Use --force to overwrite");
        return Ok(1);
    }

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
    }
    std::fs::write(&path, default_config_template())
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;

    print_success(&format!("Created configuration file: {}", path.display()));
    print_info("Set remote.host before running remote commands");
    Ok(0)
}

fn default_config_template() -> String {
    format!(
        r#"# gpubox configuration
# Durations are whole seconds.

[remote]
# Host to drive (required). Also settable with --host or GPUBOX_HOST.
# host = "gpu.example.com"
port = 22
user = "{user}"
# Every remote command runs here; created on first sync
working_dir = "~/gpubox"
identity_file = "~/.ssh/id_ed25519"
# Refuse hosts missing from ~/.ssh/known_hosts instead of learning them
strict_host_key = false
connect_timeout = 5

[telemetry]
interval = 2
tick_timeout = 5

[jupyter]
local_port = 8888
remote_port = 8888
binary = "jupyter"
install_command = "python3 -m pip install --user jupyterlab"
extra_args = []
startup_timeout = 30

[train]
interpreter = "python3"

[train.env]
CUDA_VISIBLE_DEVICES = "0"
PYTHONUNBUFFERED = "1"

[tunnel]
handshake_timeout = 20
# state_dir = "~/.local/state/gpubox"
"#,
        user = RemoteConfig::default().user
    )
}
