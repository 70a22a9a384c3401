//! Monitor command implementation

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use gb_remote::{SshRemote, TelemetryPoller};

use crate::context::AppContext;
use crate::output::{format_tick, print_info};

/// Print accelerator readings every `interval` until cancelled
pub async fn monitor_command(
    ctx: &AppContext,
    interval: Option<Duration>,
    cancel: CancellationToken,
) -> Result<i32> {
    let target = ctx.target()?;
    let host = target.host.clone();
    let remote = Arc::new(SshRemote::new(target));

    let telemetry = &ctx.config.telemetry;
    let poller = TelemetryPoller::new(
        remote,
        interval.unwrap_or(telemetry.interval),
        telemetry.tick_timeout,
    );
    print_info(&format!(
        "Monitoring {} every {:?} (Ctrl+C to stop)",
        host,
        poller.interval()
    ));

    let ticks = poller.into_stream(cancel);
    tokio::pin!(ticks);
    while let Some(tick) = ticks.next().await {
        for line in format_tick(&tick) {
            println!("{}", line);
        }
    }

    Ok(0)
}
