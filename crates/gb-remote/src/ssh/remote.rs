//! [`Remote`] over a lazily (re)established SSH session

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use gb_core::{ExecutionResult, GbError, Remote, RemoteTarget};

use super::SshSession;

/// Shares one SSH connection across calls and reconnects after it drops.
///
/// A transport failure discards the cached session so the next call dials
/// again; the failing call itself is never retried.
pub struct SshRemote {
    target: RemoteTarget,
    session: Mutex<Option<Arc<SshSession>>>,
}

impl SshRemote {
    pub fn new(target: RemoteTarget) -> Self {
        Self {
            target,
            session: Mutex::new(None),
        }
    }

    /// Current session, connecting if there is none or it has closed
    pub async fn session(&self) -> Result<Arc<SshSession>, GbError> {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.as_ref() {
            if !session.is_closed() {
                return Ok(Arc::clone(session));
            }
            tracing::debug!("SSH session to {} closed, reconnecting", self.target);
        }
        let session = Arc::new(SshSession::connect(&self.target).await?);
        *slot = Some(Arc::clone(&session));
        Ok(session)
    }

    async fn forget_on_transport_error<T>(&self, result: Result<T, GbError>) -> Result<T, GbError> {
        if let Err(e) = &result {
            if e.is_transport() {
                self.session.lock().await.take();
            }
        }
        result
    }
}

#[async_trait]
impl Remote for SshRemote {
    fn target(&self) -> &RemoteTarget {
        &self.target
    }

    async fn exec(&self, command: &str, streamed: bool) -> Result<ExecutionResult, GbError> {
        let session = self.session().await?;
        let result = session.exec(command, streamed).await;
        self.forget_on_transport_error(result).await
    }

    async fn upload(&self, remote_path: &str, contents: Vec<u8>) -> Result<(), GbError> {
        let session = self.session().await?;
        let result = session.upload(remote_path, contents).await;
        self.forget_on_transport_error(result).await
    }
}
