//! Connection probe

use std::time::{Duration, Instant};

use gb_core::{Accelerator, ProbeReport, Remote, RemoteTarget};

use crate::ssh::SshSession;

/// Lists accelerator names, one per line
pub const ACCELERATOR_QUERY: &str = "nvidia-smi --query-gpu=name --format=csv,noheader";

/// Check whether the host answers and what accelerators it has.
///
/// Never returns an error: every failure is folded into the report, and the
/// connection attempt is bounded by `target.connect_timeout`.
pub async fn probe(target: &RemoteTarget) -> ProbeReport {
    let started = Instant::now();
    let session = match SshSession::connect(target).await {
        Ok(session) => session,
        Err(e) => {
            tracing::debug!("Probe of {} failed: {}", target, e);
            return ProbeReport::unreachable(e.to_string());
        }
    };
    let latency = started.elapsed();

    let accelerator = detect_accelerator(&session, target.connect_timeout).await;
    session.close().await;

    ProbeReport {
        reachable: true,
        accelerator,
        latency: Some(latency),
        detail: None,
    }
}

/// Ask the host for its accelerators within `timeout`
pub async fn detect_accelerator<R: Remote + ?Sized>(remote: &R, timeout: Duration) -> Accelerator {
    match tokio::time::timeout(timeout, remote.exec(ACCELERATOR_QUERY, false)).await {
        Ok(Ok(result)) if result.success() => {
            let names: Vec<String> = result
                .stdout_tail
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect();
            if names.is_empty() {
                Accelerator::None
            } else {
                Accelerator::Detected(names)
            }
        }
        Ok(Ok(result)) => {
            tracing::debug!(
                "Accelerator query exited {}: {}",
                result.exit_code,
                result.stderr_tail.trim()
            );
            Accelerator::None
        }
        Ok(Err(e)) => {
            tracing::debug!("Accelerator query failed: {}", e);
            Accelerator::Unknown
        }
        Err(_) => Accelerator::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRemote;
    use gb_core::GbError;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_detects_gpus() {
        let remote = FakeRemote::new();
        remote.push_exit(0, "NVIDIA A100-SXM4-80GB\nNVIDIA A100-SXM4-80GB\n", "");
        let acc = detect_accelerator(&remote, Duration::from_secs(1)).await;
        assert_eq!(
            acc,
            Accelerator::Detected(vec![
                "NVIDIA A100-SXM4-80GB".to_string(),
                "NVIDIA A100-SXM4-80GB".to_string()
            ])
        );
    }

    #[tokio::test]
    async fn test_missing_nvidia_smi_is_none() {
        let remote = FakeRemote::new();
        remote.push_exit(127, "", "nvidia-smi: command not found");
        assert_eq!(
            detect_accelerator(&remote, Duration::from_secs(1)).await,
            Accelerator::None
        );
    }

    #[tokio::test]
    async fn test_query_transport_failure_is_unknown() {
        let remote = FakeRemote::new();
        remote.push_error(GbError::transport("channel closed"));
        assert_eq!(
            detect_accelerator(&remote, Duration::from_secs(1)).await,
            Accelerator::Unknown
        );
    }

    #[tokio::test]
    async fn test_silent_host_is_unreachable_within_timeout() {
        // Accepts TCP but never speaks SSH, so the handshake would hang forever
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _holder = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((sock, _)) = listener.accept().await {
                held.push(sock);
            }
        });

        let target = RemoteTarget {
            host: "127.0.0.1".to_string(),
            port,
            user: "nobody".to_string(),
            working_dir: "/tmp".to_string(),
            identity_file: "/nonexistent/key".into(),
            strict_host_key: false,
            connect_timeout: Duration::from_millis(300),
        };

        let started = Instant::now();
        let report = probe(&target).await;
        assert!(!report.reachable);
        assert_eq!(report.accelerator, Accelerator::Unknown);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
