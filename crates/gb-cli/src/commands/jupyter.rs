//! Jupyter command implementation

use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use gb_remote::notebook::answers_http;
use gb_remote::{NotebookFlow, SshRemote};

use super::tunnel::hold_tunnel;
use crate::context::AppContext;
use crate::output::{print_info, print_success, print_warning};

/// How long to wait for the notebook to answer through the tunnel
const READINESS_TIMEOUT: Duration = Duration::from_secs(5);

/// Start (or reuse) a notebook server and tunnel to it
pub async fn jupyter_command(
    ctx: &AppContext,
    local_port: Option<u16>,
    remote_port: Option<u16>,
    detach: bool,
    cancel: CancellationToken,
) -> Result<i32> {
    let config = &ctx.config.jupyter;
    let local_port = local_port.unwrap_or(config.local_port);
    let remote_port = remote_port.unwrap_or(config.remote_port);

    let target = ctx.target()?;
    print_info(&format!("Preparing notebook server on {}...", target.host));
    let remote = SshRemote::new(target);
    let manager = ctx.tunnel_manager()?;

    let session = NotebookFlow::new(&remote, config)
        .start(&manager, local_port, remote_port)
        .await?;

    if answers_http(local_port, READINESS_TIMEOUT).await {
        print_success("Notebook ready");
    } else {
        print_warning("Notebook is not answering through the tunnel yet; it may still be starting");
    }
    println!("{}", session.url);

    if detach {
        print_info(&format!(
            "Tunnel stays up in the background; close it with 'gpubox untunnel {}'",
            session.tunnel.label
        ));
        return Ok(0);
    }

    print_info("Press Ctrl+C to close the tunnel (the server keeps running)");
    hold_tunnel(&manager, &session.tunnel, cancel).await
}
