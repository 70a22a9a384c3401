//! Process utilities for forwarder ownership and teardown
//!
//! A tunnel's handle is the pid of a detached `gpubox __forward` process. A pid
//! alone can be recycled by the OS, so before signalling anything we confirm
//! the process is still one of our forwarders for the expected port.

use std::io;
use std::time::Duration;

/// Hidden subcommand that runs a forwarder; also the ownership marker
pub const FORWARDER_SUBCOMMAND: &str = "__forward";

/// Flag carrying the forwarder's local port on its command line
pub const LOCAL_PORT_FLAG: &str = "--local-port";

/// Check if a process with the given PID is still alive
///
/// On Unix, uses kill(pid, 0) to check if the process exists.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    // EPERM means the process exists but belongs to someone else
    unsafe {
        let result = libc::kill(pid as libc::pid_t, 0);
        if result == 0 {
            return !is_zombie(pid);
        }
        let err = std::io::Error::last_os_error();
        err.raw_os_error() == Some(libc::EPERM)
    }
}

#[cfg(not(unix))]
pub fn is_process_alive(_pid: u32) -> bool {
    false
}

#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    // Field 3 of /proc/<pid>/stat, after the parenthesised comm
    std::fs::read_to_string(format!("/proc/{}/stat", pid))
        .ok()
        .and_then(|stat| {
            let rest = &stat[stat.rfind(')')? + 1..];
            rest.split_whitespace().next().map(|s| s == "Z")
        })
        .unwrap_or(false)
}

#[cfg(all(unix, not(target_os = "linux")))]
fn is_zombie(_pid: u32) -> bool {
    false
}

/// Whether `pid` is a live forwarder we spawned for `local_port`
#[cfg(target_os = "linux")]
pub fn is_owned_forwarder(pid: u32, local_port: u16) -> bool {
    if !is_process_alive(pid) {
        return false;
    }
    match std::fs::read(format!("/proc/{}/cmdline", pid)) {
        Ok(raw) => {
            let args: Vec<String> = raw
                .split(|b| *b == 0)
                .map(|a| String::from_utf8_lossy(a).into_owned())
                .collect();
            cmdline_matches(&args, local_port)
        }
        Err(e) => {
            tracing::debug!("Cannot read cmdline of pid {}: {}", pid, e);
            false
        }
    }
}

/// Without /proc, trust liveness of the recorded pid
#[cfg(not(target_os = "linux"))]
pub fn is_owned_forwarder(pid: u32, _local_port: u16) -> bool {
    is_process_alive(pid)
}

fn cmdline_matches(args: &[String], local_port: u16) -> bool {
    let has_marker = args.iter().any(|a| a == FORWARDER_SUBCOMMAND);
    let port = local_port.to_string();
    let has_port = args
        .windows(2)
        .any(|w| w[0] == LOCAL_PORT_FLAG && w[1] == port);
    has_marker && has_port
}

/// Send `signal` to `pid`; a process that is already gone is not an error
#[cfg(unix)]
pub fn signal_process(pid: u32, signal: i32) -> io::Result<()> {
    let result = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if result == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(())
    } else {
        Err(err)
    }
}

/// Ask the process to exit, escalating to SIGKILL after `grace`
#[cfg(unix)]
pub async fn terminate_process(pid: u32, grace: Duration) -> io::Result<()> {
    signal_process(pid, libc::SIGTERM)?;

    let deadline = tokio::time::Instant::now() + grace;
    while tokio::time::Instant::now() < deadline {
        if !is_process_alive(pid) {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    if is_process_alive(pid) {
        tracing::warn!("Process {} ignored SIGTERM, sending SIGKILL", pid);
        signal_process(pid, libc::SIGKILL)?;
    }
    Ok(())
}

#[cfg(not(unix))]
pub async fn terminate_process(_pid: u32, _grace: Duration) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "process termination is only supported on unix",
    ))
}
