//! Remote transport trait

use async_trait::async_trait;

use crate::error::GbError;
use crate::types::{ExecutionResult, RemoteTarget};

/// Abstraction over a connection to the managed host.
///
/// Implementations must keep the two failure kinds apart: a command that ran
/// and exited non-zero is `Ok` with that exit code, anything that kept the
/// command from running (or from reporting its status) is
/// [`GbError::Transport`].
#[async_trait]
pub trait Remote: Send + Sync {
    /// The endpoint this remote talks to
    fn target(&self) -> &RemoteTarget;

    /// Run a complete shell command line on the remote host.
    ///
    /// With `streamed` set, stdout/stderr are forwarded to the local process's
    /// stdout/stderr as chunks arrive.
    async fn exec(&self, command: &str, streamed: bool) -> Result<ExecutionResult, GbError>;

    /// Write `contents` to `remote_path`, replacing any existing file
    async fn upload(&self, remote_path: &str, contents: Vec<u8>) -> Result<(), GbError>;
}
