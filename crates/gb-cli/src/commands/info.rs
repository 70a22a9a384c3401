//! Info command implementation

use anyhow::Result;

use gb_remote::info::collect_info;
use gb_remote::SshRemote;

use crate::context::AppContext;
use crate::output::format_info;

pub async fn info_command(ctx: &AppContext) -> Result<i32> {
    let remote = SshRemote::new(ctx.target()?);
    let sections = collect_info(&remote).await?;
    println!("{}", format_info(&sections));
    Ok(0)
}
