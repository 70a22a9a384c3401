//! Check command implementation

use anyhow::Result;

use crate::context::AppContext;
use crate::output::{format_probe, print_error, print_success};

/// Probe the host; exit 0 when reachable, 1 otherwise
pub async fn check_command(ctx: &AppContext) -> Result<i32> {
    let target = ctx.target()?;
    let report = gb_remote::probe(&target).await;
    let summary = format_probe(&target.to_string(), &report);

    if report.reachable {
        print_success(&summary);
        Ok(0)
    } else {
        print_error(&summary);
        Ok(1)
    }
}
