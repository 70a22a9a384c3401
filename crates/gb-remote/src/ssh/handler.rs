//! russh client handler: host key policy

use async_trait::async_trait;
use russh::client;
use russh_keys::key::PublicKey;

/// Verifies the server key against `~/.ssh/known_hosts`.
///
/// Known keys are accepted and changed keys always rejected. Unknown hosts are
/// learned on first use unless strict checking is on, matching OpenSSH's
/// `StrictHostKeyChecking=accept-new`.
pub struct ClientHandler {
    host: String,
    port: u16,
    strict: bool,
}

impl ClientHandler {
    pub fn new(host: impl Into<String>, port: u16, strict: bool) -> Self {
        Self {
            host: host.into(),
            port,
            strict,
        }
    }
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint();
        tracing::debug!("Server host key for {}: {}", self.host, fingerprint);

        match russh_keys::check_known_hosts(&self.host, self.port, server_public_key) {
            Ok(true) => Ok(true),
            Ok(false) if self.strict => {
                tracing::error!(
                    "Host {} is not in known_hosts and strict host key checking is on",
                    self.host
                );
                Ok(false)
            }
            Ok(false) => {
                tracing::warn!(
                    "Permanently adding {} ({}) to known_hosts",
                    self.host,
                    fingerprint
                );
                if let Err(e) = russh_keys::learn_known_hosts(&self.host, self.port, server_public_key)
                {
                    tracing::warn!("Could not record host key: {}", e);
                }
                Ok(true)
            }
            Err(russh_keys::Error::KeyChanged { line }) => {
                tracing::error!(
                    "Host key for {} changed (known_hosts line {}); refusing to connect",
                    self.host,
                    line
                );
                Ok(false)
            }
            Err(e) => {
                tracing::warn!("Could not read known_hosts: {}", e);
                Ok(!self.strict)
            }
        }
    }
}
