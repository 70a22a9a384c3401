//! Authenticated SSH session to the managed host

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Config, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use gb_core::command::remote_path_expr;
use gb_core::types::OutputTail;
use gb_core::{ExecutionResult, GbError, Remote, RemoteTarget};

use super::handler::ClientHandler;

/// Keepalive so dead peers are noticed instead of hanging forever
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// One authenticated connection; channels are opened per operation
pub struct SshSession {
    handle: Handle<ClientHandler>,
    target: RemoteTarget,
}

impl SshSession {
    /// Connect and authenticate, bounded by the target's connect timeout
    pub async fn connect(target: &RemoteTarget) -> Result<Self, GbError> {
        tokio::time::timeout(target.connect_timeout, Self::connect_inner(target))
            .await
            .map_err(|_| {
                GbError::transport(format!(
                    "timed out after {:?} connecting to {}",
                    target.connect_timeout, target
                ))
            })?
    }

    async fn connect_inner(target: &RemoteTarget) -> Result<Self, GbError> {
        let config = Arc::new(Config {
            keepalive_interval: Some(KEEPALIVE_INTERVAL),
            ..Default::default()
        });
        let handler = ClientHandler::new(&target.host, target.port, target.strict_host_key);

        tracing::debug!("Connecting to {}", target.address());
        let mut handle = client::connect(config, (target.host.as_str(), target.port), handler)
            .await
            .map_err(|e| GbError::transport(format!("failed to connect to {}: {}", target, e)))?;

        let key = russh_keys::load_secret_key(&target.identity_file, None).map_err(|e| {
            GbError::transport(format!(
                "cannot load identity file {}: {}",
                target.identity_file.display(),
                e
            ))
        })?;

        tracing::debug!("Authenticating as user '{}'", target.user);
        let authenticated = handle
            .authenticate_publickey(&target.user, Arc::new(key))
            .await
            .map_err(|e| GbError::transport(format!("authentication error: {}", e)))?;

        if !authenticated {
            return Err(GbError::transport(format!(
                "public key authentication rejected for {}",
                target
            )));
        }

        Ok(Self {
            handle,
            target: target.clone(),
        })
    }

    pub fn target(&self) -> &RemoteTarget {
        &self.target
    }

    /// Whether the underlying connection has gone away
    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    async fn open_session_channel(&self) -> Result<Channel<Msg>, GbError> {
        self.handle
            .channel_open_session()
            .await
            .map_err(|e| GbError::transport(format!("failed to open channel: {}", e)))
    }

    /// Run one command line and collect its real exit status
    pub async fn exec(&self, command: &str, streamed: bool) -> Result<ExecutionResult, GbError> {
        let mut channel = self.open_session_channel().await?;
        tracing::debug!("exec: {}", command);
        channel
            .exec(true, command)
            .await
            .map_err(|e| GbError::transport(format!("failed to start command: {}", e)))?;

        let mut stdout_tail = OutputTail::default();
        let mut stderr_tail = OutputTail::default();
        let mut stdout = OutputMirror::new("stdout", streamed.then(tokio::io::stdout));
        let mut stderr = OutputMirror::new("stderr", streamed.then(tokio::io::stderr));
        let mut exit_code = None;
        let mut signal = None;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => {
                    stdout_tail.push(data);
                    stdout.write(data).await;
                }
                ChannelMsg::ExtendedData { ref data, ext: 1 } => {
                    stderr_tail.push(data);
                    stderr.write(data).await;
                }
                ChannelMsg::ExitStatus { exit_status } => {
                    exit_code = Some(exit_status as i32);
                }
                ChannelMsg::ExitSignal { signal_name, .. } => {
                    signal = Some(format!("{:?}", signal_name));
                }
                _ => {}
            }
        }

        match exit_code {
            Some(exit_code) => Ok(ExecutionResult {
                exit_code,
                stdout_tail: stdout_tail.into_string(),
                stderr_tail: stderr_tail.into_string(),
            }),
            None => Err(GbError::transport(match signal {
                Some(sig) => format!("remote command terminated by signal {}", sig),
                None => "channel closed before the remote command reported an exit status"
                    .to_string(),
            })),
        }
    }

    /// Stream `contents` into `remote_path` through `cat`
    pub async fn upload(&self, remote_path: &str, contents: Vec<u8>) -> Result<(), GbError> {
        let path = remote_path_expr(remote_path);
        let command = format!("cat > {}", path);

        let mut channel = self.open_session_channel().await?;
        channel
            .exec(true, command.as_str())
            .await
            .map_err(|e| GbError::transport(format!("failed to start upload: {}", e)))?;
        channel
            .data(&contents[..])
            .await
            .map_err(|e| GbError::transport(format!("upload to {} interrupted: {}", remote_path, e)))?;
        channel
            .eof()
            .await
            .map_err(|e| GbError::transport(format!("upload to {} interrupted: {}", remote_path, e)))?;

        let mut stderr_tail = OutputTail::new(4096);
        let mut exit_code = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::ExtendedData { ref data, .. } => stderr_tail.push(data),
                ChannelMsg::ExitStatus { exit_status } => exit_code = Some(exit_status),
                _ => {}
            }
        }

        match exit_code {
            Some(0) => Ok(()),
            Some(code) => Err(GbError::RemoteStep {
                step: format!("writing {}", remote_path),
                code: code as i32,
                detail: stderr_tail.into_string().trim().to_string(),
            }),
            None => Err(GbError::transport(format!(
                "upload to {} ended without status",
                remote_path
            ))),
        }
    }

    /// Open a `direct-tcpip` channel to `localhost:remote_port` on the host
    pub async fn open_forward(
        &self,
        remote_port: u16,
        originator: std::net::SocketAddr,
    ) -> Result<Channel<Msg>, GbError> {
        self.handle
            .channel_open_direct_tcpip(
                "localhost",
                remote_port as u32,
                originator.ip().to_string(),
                originator.port() as u32,
            )
            .await
            .map_err(|e| {
                GbError::transport(format!(
                    "remote refused forward to port {}: {}",
                    remote_port, e
                ))
            })
    }

    /// Open a PTY-backed login shell channel
    pub async fn open_shell(&self, term: &str, cols: u16, rows: u16) -> Result<Channel<Msg>, GbError> {
        let channel = self.open_session_channel().await?;
        channel
            .request_pty(true, term, cols as u32, rows as u32, 0, 0, &[])
            .await
            .map_err(|e| GbError::transport(format!("PTY request failed: {}", e)))?;
        channel
            .request_shell(true)
            .await
            .map_err(|e| GbError::transport(format!("shell request failed: {}", e)))?;
        Ok(channel)
    }

    /// Close the connection
    pub async fn close(self) {
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "closing", "en")
            .await
        {
            tracing::debug!("Disconnect from {} failed: {}", self.target, e);
        }
    }
}

#[async_trait]
impl Remote for SshSession {
    fn target(&self) -> &RemoteTarget {
        &self.target
    }

    async fn exec(&self, command: &str, streamed: bool) -> Result<ExecutionResult, GbError> {
        SshSession::exec(self, command, streamed).await
    }

    async fn upload(&self, remote_path: &str, contents: Vec<u8>) -> Result<(), GbError> {
        SshSession::upload(self, remote_path, contents).await
    }
}

/// Copies remote output to a local stream while it accepts writes.
///
/// A local write failure (a reader that went away, say) only stops the copy;
/// the caller keeps draining the channel so the exit status is not lost.
struct OutputMirror<W> {
    name: &'static str,
    writer: Option<W>,
}

impl<W: AsyncWrite + Unpin> OutputMirror<W> {
    fn new(name: &'static str, writer: Option<W>) -> Self {
        Self { name, writer }
    }

    async fn write(&mut self, data: &[u8]) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        let written = match writer.write_all(data).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            tracing::warn!(
                "Local {} is not accepting output ({}); discarding the rest",
                self.name,
                e
            );
            self.writer = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Writer whose reader has gone away
    struct ClosedPipe;

    impl AsyncWrite for ClosedPipe {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_mirror_copies_output() {
        let mut mirror = OutputMirror::new("stdout", Some(Vec::new()));
        mirror.write(b"epoch 1\n").await;
        mirror.write(b"epoch 2\n").await;
        assert_eq!(mirror.writer.unwrap(), b"epoch 1\nepoch 2\n");
    }

    #[tokio::test]
    async fn test_broken_local_pipe_stops_copying_without_error() {
        let mut mirror = OutputMirror::new("stdout", Some(ClosedPipe));
        mirror.write(b"first").await;
        assert!(mirror.writer.is_none());

        // Later chunks are dropped quietly instead of failing the command
        mirror.write(b"second").await;
        assert!(mirror.writer.is_none());
    }

    #[tokio::test]
    async fn test_unstreamed_mirror_writes_nothing() {
        let mut mirror: OutputMirror<ClosedPipe> = OutputMirror::new("stderr", None);
        mirror.write(b"ignored").await;
        assert!(mirror.writer.is_none());
    }
}
