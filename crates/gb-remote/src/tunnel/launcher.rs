//! Spawns forwarders as detached copies of our own executable

use std::ffi::OsString;
use std::fs::OpenOptions;
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use gb_core::process::{self, FORWARDER_SUBCOMMAND, LOCAL_PORT_FLAG};
use gb_core::time::current_time_millis;
use gb_core::types::ForwarderHandle;
use gb_core::GbError;

use super::{ForwardRequest, ForwarderLauncher, Handshake};

/// How long a stopped forwarder gets before SIGKILL
const STOP_GRACE: Duration = Duration::from_secs(3);

/// Bound on the local port check in liveness probes
const PORT_CHECK_TIMEOUT: Duration = Duration::from_millis(500);

/// Launches `<exe> <global args> __forward --local-port N --remote-port M --label L`.
///
/// The child runs in its own process group so Ctrl-C in the launching
/// terminal does not reach it; its stderr goes to the per-port log file and
/// its stdout carries a single handshake line.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    exe: PathBuf,
    global_args: Vec<OsString>,
    handshake_timeout: Duration,
}

impl ProcessLauncher {
    pub fn new(exe: PathBuf, global_args: Vec<OsString>, handshake_timeout: Duration) -> Self {
        Self {
            exe,
            global_args,
            handshake_timeout,
        }
    }

    /// Relaunch the running executable
    pub fn current(global_args: Vec<OsString>, handshake_timeout: Duration) -> Result<Self, GbError> {
        Ok(Self::new(std::env::current_exe()?, global_args, handshake_timeout))
    }

    fn command(&self, request: &ForwardRequest) -> Result<Command, GbError> {
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&request.log_path)?;

        let mut cmd = Command::new(&self.exe);
        cmd.args(&self.global_args)
            .arg(FORWARDER_SUBCOMMAND)
            .arg(LOCAL_PORT_FLAG)
            .arg(request.local_port.to_string())
            .arg("--remote-port")
            .arg(request.remote_port.to_string())
            .arg("--label")
            .arg(&request.label)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::from(log))
            .kill_on_drop(false);
        #[cfg(unix)]
        cmd.process_group(0);
        Ok(cmd)
    }
}

#[async_trait]
impl ForwarderLauncher for ProcessLauncher {
    async fn launch(&self, request: &ForwardRequest) -> Result<ForwarderHandle, GbError> {
        let mut child = self.command(request)?.spawn()?;
        let pid = child
            .id()
            .ok_or_else(|| GbError::transport("forwarder exited immediately"))?;
        let started_at = current_time_millis();
        tracing::debug!("Spawned forwarder pid {} for port {}", pid, request.local_port);

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GbError::transport("forwarder stdout was not captured"))?;
        let mut lines = BufReader::new(stdout).lines();

        let handshake = tokio::time::timeout(self.handshake_timeout, async {
            while let Some(line) = lines.next_line().await? {
                if let Some(handshake) = Handshake::parse(&line) {
                    return Ok(Some(handshake));
                }
            }
            Ok::<_, std::io::Error>(None)
        })
        .await;

        let failure = match handshake {
            Ok(Ok(Some(Handshake::Ready))) => {
                return Ok(ForwarderHandle { pid, started_at });
            }
            Ok(Ok(Some(Handshake::Error(msg)))) => msg,
            Ok(Ok(None)) => format!(
                "forwarder exited before it was ready (see {})",
                request.log_path.display()
            ),
            Ok(Err(e)) => format!("reading forwarder handshake failed: {}", e),
            Err(_) => format!(
                "forwarder not ready after {:?} (see {})",
                self.handshake_timeout,
                request.log_path.display()
            ),
        };

        if let Err(e) = child.start_kill() {
            tracing::debug!("Killing failed forwarder {}: {}", pid, e);
        }
        // Reap so it does not linger as a zombie
        let _ = child.wait().await;
        Err(GbError::transport(failure))
    }

    fn owns(&self, handle: &ForwarderHandle, local_port: u16) -> bool {
        process::is_owned_forwarder(handle.pid, local_port)
    }

    async fn is_serving(&self, handle: &ForwarderHandle, local_port: u16) -> bool {
        if !self.owns(handle, local_port) {
            return false;
        }
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, local_port));
        tokio::task::spawn_blocking(move || TcpStream::connect_timeout(&addr, PORT_CHECK_TIMEOUT).is_ok())
            .await
            .unwrap_or(false)
    }

    async fn stop(&self, handle: &ForwarderHandle) -> Result<(), GbError> {
        tracing::debug!("Stopping forwarder pid {}", handle.pid);
        process::terminate_process(handle.pid, STOP_GRACE).await?;
        Ok(())
    }
}
