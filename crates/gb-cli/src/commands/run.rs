//! Run, python and train commands

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;

use gb_core::command;
use gb_core::{ExecutionRequest, Remote};
use gb_remote::{ArtifactSync, CommandExecutor, SshRemote};

use crate::context::AppContext;
use crate::output::print_info;

/// How a synced script is launched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptMode {
    Python,
    /// Python with the `[train]` environment injected
    Train,
}

/// Run an opaque command line in the working directory, streaming output
pub async fn run_command(ctx: &AppContext, words: &[String]) -> Result<i32> {
    let remote = SshRemote::new(ctx.target()?);
    let line = words.join(" ");
    tracing::info!("Running on {}: {}", remote.target().host, line);

    let result = CommandExecutor::new(&remote)
        .execute(&ExecutionRequest::streamed(line))
        .await?;
    Ok(result.exit_code)
}

/// Upload `script` and run it with the configured interpreter
pub async fn script_command(
    ctx: &AppContext,
    script: &Path,
    args: &[String],
    mode: ScriptMode,
) -> Result<i32> {
    let remote = SshRemote::new(ctx.target()?);

    let synced = ArtifactSync::new(&remote).sync(script).await?;
    print_info(&format!(
        "Synced {} to {}",
        synced.remote_name,
        remote.target().working_dir
    ));

    let empty = BTreeMap::new();
    let env = match mode {
        ScriptMode::Python => &empty,
        ScriptMode::Train => &ctx.config.train.env,
    };
    let line = command::script_command(
        &ctx.config.train.interpreter,
        &synced.remote_name,
        args,
        env,
    );

    let result = CommandExecutor::new(&remote)
        .execute(&ExecutionRequest::streamed(line))
        .await?;
    Ok(result.exit_code)
}
