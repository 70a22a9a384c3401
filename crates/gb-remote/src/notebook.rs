//! Notebook session: provision, start, discover token, tunnel
//!
//! The server runs detached on the host so it survives the SSH channel that
//! started it. Its token is read back from the server's own JSON listing
//! rather than scraped from its log.

use std::time::Duration;

use serde::Deserialize;

use gb_core::command::{in_working_dir, shell_quote};
use gb_core::config::JupyterConfig;
use gb_core::{GbError, Remote, TunnelSpec};

use crate::tunnel::{ForwarderLauncher, TunnelManager};

/// Pause between listing attempts while the server starts
const LIST_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Server log, relative to the working directory
const SERVER_LOG: &str = ".gpubox-jupyter.log";

/// Tunnel label used for notebook sessions
pub const NOTEBOOK_LABEL: &str = "jupyter";

/// A running notebook reachable from this machine
#[derive(Debug, Clone)]
pub struct NotebookSession {
    /// Local URL including the token
    pub url: String,
    pub token: String,
    pub tunnel: TunnelSpec,
}

/// One entry of `jupyter server list --json`
#[derive(Debug, Deserialize)]
struct ServerEntry {
    port: u16,
    #[serde(default)]
    token: String,
}

pub struct NotebookFlow<'a, R: Remote + ?Sized> {
    remote: &'a R,
    config: &'a JupyterConfig,
}

impl<'a, R: Remote + ?Sized> NotebookFlow<'a, R> {
    pub fn new(remote: &'a R, config: &'a JupyterConfig) -> Self {
        Self { remote, config }
    }

    /// Bring a notebook up on `remote_port` and tunnel `local_port` to it
    pub async fn start<L: ForwarderLauncher>(
        &self,
        tunnels: &TunnelManager<L>,
        local_port: u16,
        remote_port: u16,
    ) -> Result<NotebookSession, GbError> {
        self.ensure_installed().await?;

        let token = match self.find_token(remote_port).await? {
            Some(token) => {
                tracing::info!("Reusing notebook server already on port {}", remote_port);
                token
            }
            None => {
                self.start_server(remote_port).await?;
                self.wait_for_token(remote_port).await?
            }
        };

        let tunnel = tunnels
            .open_tunnel(local_port, remote_port, Some(NOTEBOOK_LABEL))
            .await?;
        let url = notebook_url(local_port, &token);

        Ok(NotebookSession { url, token, tunnel })
    }

    async fn has_binary(&self) -> Result<bool, GbError> {
        let check = format!("command -v {}", shell_quote(&self.config.binary));
        Ok(self.remote.exec(&check, false).await?.success())
    }

    /// Install the notebook binary once if it is missing
    pub async fn ensure_installed(&self) -> Result<(), GbError> {
        if self.has_binary().await? {
            return Ok(());
        }

        tracing::warn!(
            "'{}' not found on {}; running: {}",
            self.config.binary,
            self.remote.target().host,
            self.config.install_command
        );
        let install = self.remote.exec(&self.config.install_command, false).await?;
        if !install.success() {
            return Err(GbError::Provision(format!(
                "install command exited with status {}: {}",
                install.exit_code,
                install.stderr_tail.trim()
            )));
        }

        if !self.has_binary().await? {
            return Err(GbError::Provision(format!(
                "'{}' is still missing after installation",
                self.config.binary
            )));
        }
        Ok(())
    }

    async fn start_server(&self, remote_port: u16) -> Result<(), GbError> {
        let mut parts = vec![
            "nohup".to_string(),
            shell_quote(&self.config.binary).into_owned(),
            "lab".to_string(),
            "--no-browser".to_string(),
            "--ip=127.0.0.1".to_string(),
            format!("--port={}", remote_port),
            "--port-retries=0".to_string(),
        ];
        parts.extend(
            self.config
                .extra_args
                .iter()
                .map(|a| shell_quote(a).into_owned()),
        );
        let line = format!("{} > {} 2>&1 < /dev/null &", parts.join(" "), SERVER_LOG);
        let command = in_working_dir(&self.remote.target().working_dir, &line);

        tracing::info!("Starting notebook server on remote port {}", remote_port);
        let started = self.remote.exec(&command, false).await?;
        if !started.success() {
            return Err(GbError::Provision(format!(
                "could not start notebook server: {}",
                started.stderr_tail.trim()
            )));
        }
        Ok(())
    }

    /// Token of the server listening on `remote_port`, if it is listed
    async fn find_token(&self, remote_port: u16) -> Result<Option<String>, GbError> {
        let binary = shell_quote(&self.config.binary);
        for listing in ["server", "notebook"] {
            let command = format!("{} {} list --json", binary, listing);
            let result = self.remote.exec(&command, false).await?;
            if result.success() {
                return Ok(token_for_port(&result.stdout_tail, remote_port));
            }
            tracing::debug!("'{}' exited {}", command, result.exit_code);
        }
        Ok(None)
    }

    async fn wait_for_token(&self, remote_port: u16) -> Result<String, GbError> {
        let deadline = tokio::time::Instant::now() + self.config.startup_timeout;
        loop {
            if let Some(token) = self.find_token(remote_port).await? {
                return Ok(token);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(GbError::Provision(format!(
                    "notebook server did not come up on port {} within {:?} (see {} in the working directory)",
                    remote_port, self.config.startup_timeout, SERVER_LOG
                )));
            }
            tokio::time::sleep(LIST_POLL_INTERVAL).await;
        }
    }
}

/// `http://localhost:<port>/?token=<token>`, or without the query when tokenless
pub fn notebook_url(local_port: u16, token: &str) -> String {
    if token.is_empty() {
        format!("http://localhost:{}/", local_port)
    } else {
        format!("http://localhost:{}/?token={}", local_port, token)
    }
}

/// Pick the entry for `port` out of JSON-lines listing output
fn token_for_port(listing: &str, port: u16) -> Option<String> {
    listing
        .lines()
        .filter_map(|line| serde_json::from_str::<ServerEntry>(line.trim()).ok())
        .find(|entry| entry.port == port)
        .map(|entry| entry.token)
}

/// Whether the notebook answers HTTP through the tunnel within `timeout`
pub async fn answers_http(local_port: u16, timeout: Duration) -> bool {
    let client = match reqwest::Client::builder()
        .timeout(timeout)
        .no_proxy()
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            tracing::debug!("Cannot build HTTP client: {}", e);
            return false;
        }
    };
    let url = format!("http://127.0.0.1:{}/api", local_port);
    match client.get(&url).send().await {
        Ok(response) => {
            tracing::debug!("{} answered {}", url, response.status());
            !response.status().is_server_error()
        }
        Err(e) => {
            tracing::debug!("{} not answering: {}", url, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeLauncher, FakeRemote};
    use gb_core::TunnelRegistry;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const LISTING: &str = "{\"base_url\": \"/\", \"port\": 8888, \"token\": \"abc123\", \"url\": \"http://127.0.0.1:8888/\"}\n";

    fn tunnels(dir: &TempDir) -> TunnelManager<FakeLauncher> {
        TunnelManager::new(TunnelRegistry::new(dir.path()).unwrap(), FakeLauncher::default())
    }

    #[test]
    fn test_token_for_port() {
        let listing = format!("Currently running servers:\n{}", LISTING);
        assert_eq!(token_for_port(&listing, 8888), Some("abc123".to_string()));
        assert_eq!(token_for_port(&listing, 9999), None);
    }

    #[test]
    fn test_notebook_url() {
        assert_eq!(notebook_url(9000, "abc"), "http://localhost:9000/?token=abc");
        assert_eq!(notebook_url(9000, ""), "http://localhost:9000/");
    }

    #[tokio::test(start_paused = true)]
    async fn test_provisions_then_starts_and_tunnels_once() {
        let dir = TempDir::new().unwrap();
        let tunnels = tunnels(&dir);
        let remote = FakeRemote::new();
        let config = JupyterConfig::default();

        remote.push_exit(1, "", ""); // command -v jupyter
        remote.push_exit(0, "", ""); // install
        remote.push_exit(0, "/home/u/.local/bin/jupyter\n", ""); // command -v jupyter
        remote.push_exit(0, "", ""); // server list: nothing yet
        remote.push_exit(0, "", ""); // start
        remote.push_exit(0, "", ""); // server list: still starting
        remote.push_exit(0, LISTING, ""); // server list: up

        let session = NotebookFlow::new(&remote, &config)
            .start(&tunnels, 9000, 8888)
            .await
            .unwrap();

        assert_eq!(session.token, "abc123");
        assert_eq!(session.url, "http://localhost:9000/?token=abc123");
        assert_eq!(session.tunnel.label, NOTEBOOK_LABEL);

        let commands = remote.commands();
        assert_eq!(commands[1], config.install_command);
        assert!(commands[4].starts_with("cd /srv/work && nohup jupyter lab"));
        assert!(commands[4].contains("--port=8888"));
        assert_eq!(tunnels_launched(&tunnels), 1);
    }

    fn tunnels_launched(tunnels: &TunnelManager<FakeLauncher>) -> usize {
        tunnels.launcher().launched().len()
    }

    #[tokio::test]
    async fn test_failed_install_is_fatal() {
        let remote = FakeRemote::new();
        let config = JupyterConfig::default();
        remote.push_exit(1, "", "");
        remote.push_exit(1, "", "error: externally-managed-environment");

        let err = NotebookFlow::new(&remote, &config)
            .ensure_installed()
            .await
            .unwrap_err();
        assert!(matches!(err, GbError::Provision(ref msg) if msg.contains("externally-managed")));
    }

    #[tokio::test]
    async fn test_still_missing_after_install_is_fatal() {
        let remote = FakeRemote::new();
        let config = JupyterConfig::default();
        remote.push_exit(1, "", "");
        remote.push_exit(0, "", "");
        remote.push_exit(1, "", "");

        let err = NotebookFlow::new(&remote, &config)
            .ensure_installed()
            .await
            .unwrap_err();
        assert!(matches!(err, GbError::Provision(_)));
    }

    #[tokio::test]
    async fn test_falls_back_to_notebook_listing() {
        let remote = FakeRemote::new();
        let config = JupyterConfig::default();
        remote.push_exit(2, "", "unknown subcommand"); // server list
        remote.push_exit(0, LISTING, ""); // notebook list

        let token = NotebookFlow::new(&remote, &config)
            .find_token(8888)
            .await
            .unwrap();
        assert_eq!(token.as_deref(), Some("abc123"));
        assert_eq!(remote.commands()[1], "jupyter notebook list --json");
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_that_never_lists_times_out() {
        let remote = FakeRemote::new();
        let config = JupyterConfig {
            startup_timeout: Duration::from_secs(3),
            ..JupyterConfig::default()
        };

        let err = NotebookFlow::new(&remote, &config)
            .wait_for_token(8888)
            .await
            .unwrap_err();
        assert!(matches!(err, GbError::Provision(_)));
    }

    #[tokio::test]
    async fn test_answers_http() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = sock.read(&mut buf).await;
            sock.write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\n{}")
                .await
                .unwrap();
        });

        assert!(answers_http(port, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_closed_port_does_not_answer() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert!(!answers_http(port, Duration::from_millis(500)).await);
    }
}
