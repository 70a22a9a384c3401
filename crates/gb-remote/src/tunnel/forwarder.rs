//! Body of the detached `__forward` process

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use gb_core::{GbError, RemoteTarget};

use super::Handshake;
use crate::ssh::SshSession;

/// How often the SSH connection is checked for liveness
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(2);

/// Connect, bind `127.0.0.1:local_port`, report on `handshake`, then relay
/// connections until cancelled or the SSH connection drops.
pub async fn run_forwarder<W: AsyncWrite + Unpin>(
    target: &RemoteTarget,
    local_port: u16,
    remote_port: u16,
    mut handshake: W,
    cancel: CancellationToken,
) -> Result<(), GbError> {
    let (session, listener) = match establish(target, local_port).await {
        Ok(ready) => ready,
        Err(e) => {
            report(&mut handshake, &Handshake::Error(e.to_string())).await;
            return Err(e);
        }
    };
    report(&mut handshake, &Handshake::Ready).await;
    drop(handshake);

    tracing::info!(
        "Forwarding 127.0.0.1:{} -> {}:{}",
        local_port,
        target.host,
        remote_port
    );

    let session = Arc::new(session);
    let mut health = tokio::time::interval(HEALTH_CHECK_INTERVAL);

    let result = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Forwarder on port {} shutting down", local_port);
                break Ok(());
            }
            _ = health.tick() => {
                if session.is_closed() {
                    break Err(GbError::transport(format!("SSH connection to {} lost", target)));
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!("Accepted {} on port {}", peer, local_port);
                    let session = Arc::clone(&session);
                    tokio::spawn(async move {
                        if let Err(e) = relay(&session, stream, peer, remote_port).await {
                            tracing::warn!("Connection from {} failed: {}", peer, e);
                        }
                    });
                }
                Err(e) => tracing::warn!("Accept on port {} failed: {}", local_port, e),
            },
        }
    };

    drop(listener);
    if let Ok(session) = Arc::try_unwrap(session) {
        session.close().await;
    }
    result
}

async fn establish(target: &RemoteTarget, local_port: u16) -> Result<(SshSession, TcpListener), GbError> {
    let session = SshSession::connect(target).await?;
    let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, local_port)))
        .await
        .map_err(|e| GbError::transport(format!("cannot bind 127.0.0.1:{}: {}", local_port, e)))?;
    Ok((session, listener))
}

async fn report<W: AsyncWrite + Unpin>(out: &mut W, handshake: &Handshake) {
    let line = format!("{}\n", handshake);
    if let Err(e) = async {
        out.write_all(line.as_bytes()).await?;
        out.flush().await
    }
    .await
    {
        // Launcher already gave up on us
        tracing::debug!("Could not write handshake: {}", e);
    }
}

/// Pipe one accepted connection through a `direct-tcpip` channel
async fn relay(
    session: &SshSession,
    mut local: TcpStream,
    peer: SocketAddr,
    remote_port: u16,
) -> Result<(), GbError> {
    let channel = session.open_forward(remote_port, peer).await?;
    let mut remote = channel.into_stream();
    let (up, down) = tokio::io::copy_bidirectional(&mut local, &mut remote).await?;
    tracing::debug!("Connection from {} closed ({} bytes up, {} down)", peer, up, down);
    Ok(())
}
