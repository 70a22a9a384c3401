//! Command executor

use gb_core::command::in_working_dir;
use gb_core::{ExecutionRequest, ExecutionResult, GbError, Remote};

/// Runs opaque commands inside the target's working directory.
///
/// The command string is not parsed, validated or quoted; callers building it
/// from untrusted pieces must quote those pieces themselves.
pub struct CommandExecutor<'a, R: Remote + ?Sized> {
    remote: &'a R,
}

impl<'a, R: Remote + ?Sized> CommandExecutor<'a, R> {
    pub fn new(remote: &'a R) -> Self {
        Self { remote }
    }

    /// Run the request and return the genuine remote exit status.
    ///
    /// A non-zero exit is still `Ok`; use [`ExecutionResult::check`] to turn it
    /// into [`GbError::RemoteExit`].
    pub async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult, GbError> {
        let line = in_working_dir(&self.remote.target().working_dir, &request.command);
        let result = self.remote.exec(&line, request.streamed).await?;
        tracing::debug!("Remote command exited with {}", result.exit_code);
        Ok(result)
    }
}
