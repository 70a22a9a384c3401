//! Sync command implementation

use std::path::Path;

use anyhow::Result;

use gb_core::Remote;
use gb_remote::{ArtifactSync, SshRemote};

use crate::context::AppContext;
use crate::output::print_success;

/// Upload a file or directory into the working directory
pub async fn sync_command(ctx: &AppContext, path: &Path) -> Result<i32> {
    let remote = SshRemote::new(ctx.target()?);
    let synced = ArtifactSync::new(&remote).sync(path).await?;

    print_success(&format!(
        "Synced {} ({} file(s), {} bytes) to {}:{}",
        synced.remote_name,
        synced.files,
        synced.bytes,
        remote.target().host,
        remote.target().working_dir
    ));
    Ok(0)
}
