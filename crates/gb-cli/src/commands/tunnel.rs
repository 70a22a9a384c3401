//! Tunnel commands: open, list, close, and the hidden forwarder body

use std::time::Duration;

use anyhow::Result;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use gb_core::{TunnelSelector, TunnelSpec};
use gb_remote::tunnel::{run_forwarder, Handshake};
use gb_remote::{ForwarderLauncher, TunnelHold, TunnelManager};

use crate::context::AppContext;
use crate::output::{format_tunnels, print_error, print_info, print_success, print_warning};

/// How often a foreground holder checks that its tunnel is still its own
const HOLD_CHECK_INTERVAL: Duration = Duration::from_secs(2);

/// Open a tunnel; unless `detach`, hold it until Ctrl+C and then close it
pub async fn tunnel_command(
    ctx: &AppContext,
    local_port: u16,
    remote_port: u16,
    label: Option<&str>,
    detach: bool,
    cancel: CancellationToken,
) -> Result<i32> {
    // Fail on a bad config before spawning anything
    ctx.target()?;
    let manager = ctx.tunnel_manager()?;

    let spec = manager.open_tunnel(local_port, remote_port, label).await?;
    print_success(&format!(
        "Tunnel '{}' up: {} -> remote port {}",
        spec.label,
        spec.local_url(),
        spec.remote_port
    ));

    if detach {
        print_info(&format!(
            "Running in the background; stop it with 'gpubox untunnel {}'",
            spec.label
        ));
        return Ok(0);
    }

    print_info("Press Ctrl+C to close the tunnel");
    hold_tunnel(&manager, &spec, cancel).await
}

/// Keep `spec` open until cancelled, then close it if it is still ours.
///
/// Returns early when a newer request takes the port over (exit 0) or the
/// tunnel goes away underneath us (exit 1).
pub(crate) async fn hold_tunnel<L: ForwarderLauncher>(
    manager: &TunnelManager<L>,
    spec: &TunnelSpec,
    cancel: CancellationToken,
) -> Result<i32> {
    let mut checks = tokio::time::interval(HOLD_CHECK_INTERVAL);
    checks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    checks.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = checks.tick() => match manager.check_hold(spec).await? {
                TunnelHold::Held => {}
                TunnelHold::Superseded => {
                    print_warning(&format!(
                        "Port {} was taken over by a newer tunnel; leaving it running",
                        spec.local_port
                    ));
                    return Ok(0);
                }
                TunnelHold::Lost => {
                    print_error(&format!(
                        "Tunnel '{}' on port {} stopped (see 'gpubox tunnels')",
                        spec.label, spec.local_port
                    ));
                    return Ok(1);
                }
            },
        }
    }

    if manager.close_owned(spec).await? {
        print_success(&format!("Tunnel '{}' closed", spec.label));
    } else {
        print_info(&format!(
            "Port {} is held by another tunnel now; left it open",
            spec.local_port
        ));
    }
    Ok(0)
}

/// List tracked tunnels, optionally forgetting finished ones first
pub async fn tunnels_command(ctx: &AppContext, prune: bool) -> Result<i32> {
    let manager = ctx.tunnel_manager()?;
    if prune {
        let removed = manager.prune().await?;
        print_info(&format!("Pruned {} finished tunnel record(s)", removed));
    }

    let tunnels = manager.list_tunnels().await?;
    println!("{}", format_tunnels(&tunnels));
    Ok(0)
}

/// Close a tunnel by label or local port
pub async fn untunnel_command(ctx: &AppContext, selector: &str) -> Result<i32> {
    let manager = ctx.tunnel_manager()?;
    let selector = TunnelSelector::parse(selector);

    match manager.close_tunnel(&selector).await? {
        Some(spec) => print_success(&format!(
            "Tunnel '{}' on port {} closed",
            spec.label, spec.local_port
        )),
        None => print_warning(&format!("No tunnel matches {}", selector)),
    }
    Ok(0)
}

/// Body of the detached forwarder process. Reports on stdout, logs to stderr.
pub async fn forward_command(
    ctx: &AppContext,
    local_port: u16,
    remote_port: u16,
    label: &str,
    cancel: CancellationToken,
) -> Result<i32> {
    tracing::info!(
        "Forwarder '{}' starting (pid {})",
        label,
        std::process::id()
    );

    let mut stdout = tokio::io::stdout();
    let target = match ctx.target() {
        Ok(target) => target,
        Err(e) => {
            let line = format!("{}\n", Handshake::Error(e.to_string()));
            stdout.write_all(line.as_bytes()).await?;
            stdout.flush().await?;
            return Err(e.into());
        }
    };

    run_forwarder(&target, local_port, remote_port, stdout, cancel).await?;
    tracing::info!("Forwarder '{}' exited", label);
    Ok(0)
}
