//! Per-invocation state shared by every command

use std::ffi::OsString;
use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

use gb_core::config::ConfigFile;
use gb_core::{GbError, RemoteTarget, TunnelRegistry};
use gb_remote::{ProcessLauncher, TunnelManager};

/// Remote settings given on the command line or through `GPUBOX_*`
#[derive(Debug, Clone, Default)]
pub struct RemoteOverrides {
    pub host: Option<String>,
    pub user: Option<String>,
    pub dir: Option<String>,
}

/// Loaded configuration plus the overrides that produced it
pub struct AppContext {
    pub config: ConfigFile,
    config_path: Option<PathBuf>,
    overrides: RemoteOverrides,
}

impl AppContext {
    pub fn load(config_path: Option<PathBuf>, overrides: RemoteOverrides) -> Result<Self, GbError> {
        let config = ConfigFile::load(config_path.as_deref())?;
        Ok(Self {
            config,
            config_path,
            overrides,
        })
    }

    /// The host every remote operation talks to
    pub fn target(&self) -> Result<RemoteTarget, GbError> {
        let remote = self.config.remote.clone().with_overrides(
            self.overrides.host.clone(),
            self.overrides.user.clone(),
            self.overrides.dir.clone(),
        );
        Ok(remote.target()?)
    }

    /// Global flags a relaunched forwarder needs to resolve the same target
    pub fn forwarder_args(&self) -> Vec<OsString> {
        let mut args = Vec::new();
        if let Some(path) = &self.config_path {
            args.push("--config".into());
            args.push(path.clone().into_os_string());
        }
        let flags = [
            ("--host", &self.overrides.host),
            ("--user", &self.overrides.user),
            ("--dir", &self.overrides.dir),
        ];
        for (flag, value) in flags {
            if let Some(value) = value {
                args.push(flag.into());
                args.push(value.into());
            }
        }
        args
    }

    pub fn tunnel_manager(&self) -> Result<TunnelManager<ProcessLauncher>, GbError> {
        let registry = TunnelRegistry::new(&self.config.tunnel.state_dir())?;
        let launcher =
            ProcessLauncher::current(self.forwarder_args(), self.config.tunnel.handshake_timeout)?;
        Ok(TunnelManager::new(registry, launcher))
    }
}

/// Token cancelled on Ctrl+C or SIGTERM
pub fn shutdown_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, shutting down...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, shutting down...");
            }
        }

        cancel_clone.cancel();
    });
    cancel
}
