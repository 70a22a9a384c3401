//! Shell command implementation

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use gb_remote::shell::{run_shell, ShellOutcome};
use gb_remote::SshSession;

use crate::context::AppContext;
use crate::output::{print_info, print_success};

/// Interactive login shell; exits with the remote shell's status
pub async fn shell_command(ctx: &AppContext, cancel: CancellationToken) -> Result<i32> {
    let target = ctx.target()?;
    let session = SshSession::connect(&target).await?;
    print_info(&format!("Connected to {} (Ctrl+] to detach)", target));

    let outcome = run_shell(&session, cancel).await;
    session.close().await;

    let outcome = outcome?;
    if outcome == ShellOutcome::Detached {
        print_success("Detached from shell");
    }
    Ok(outcome.exit_code())
}
