//! Interactive login shell on the managed host
//!
//! The local terminal is put in raw mode for the lifetime of the session and
//! restored by [`RawModeGuard`] on every exit path, including panics and
//! transport errors. Keys are read on a blocking thread and fed through a
//! channel; terminal resizes arrive as crossterm resize events (SIGWINCH) and
//! are forwarded as SSH `window-change` requests.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, size};
use russh::ChannelMsg;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use gb_core::GbError;

use crate::ssh::SshSession;

/// Fallback when the local terminal size is unknown
const DEFAULT_SIZE: (u16, u16) = (80, 24);

/// How long the key reader blocks before re-checking for shutdown
const EVENT_POLL: Duration = Duration::from_millis(10);

/// How a shell session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellOutcome {
    /// Remote shell exited with this status
    Exited(i32),
    /// User pressed the detach key
    Detached,
    /// Local cancellation (SIGTERM)
    Cancelled,
}

impl ShellOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            ShellOutcome::Exited(code) => *code,
            ShellOutcome::Detached | ShellOutcome::Cancelled => 0,
        }
    }
}

/// Restores cooked mode when dropped
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> Result<Self, GbError> {
        enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = disable_raw_mode() {
            tracing::warn!("Failed to restore terminal: {}", e);
        }
    }
}

/// Run a PTY shell until either side closes. Ctrl+] detaches.
pub async fn run_shell(session: &SshSession, cancel: CancellationToken) -> Result<ShellOutcome, GbError> {
    let term = std::env::var("TERM").unwrap_or_else(|_| "xterm-256color".to_string());
    let (cols, rows) = size().unwrap_or(DEFAULT_SIZE);
    let mut channel = session.open_shell(&term, cols, rows).await?;

    let _raw = RawModeGuard::enable()?;
    let stop = Arc::new(AtomicBool::new(false));
    let (event_tx, mut event_rx) = mpsc::channel::<Event>(256);

    let reader_stop = Arc::clone(&stop);
    let reader = tokio::task::spawn_blocking(move || {
        while !reader_stop.load(Ordering::Relaxed) {
            if event::poll(EVENT_POLL).unwrap_or(false) {
                match event::read() {
                    Ok(evt) => {
                        if event_tx.blocking_send(evt).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        }
    });

    let mut stdout = std::io::stdout();
    let mut stderr = std::io::stderr();
    let mut exit_status = None;

    let outcome = loop {
        tokio::select! {
            _ = cancel.cancelled() => break Ok(ShellOutcome::Cancelled),

            Some(evt) = event_rx.recv() => {
                let bytes = match evt {
                    Event::Key(key) if is_detach(&key) => break Ok(ShellOutcome::Detached),
                    Event::Key(KeyEvent { code, modifiers, kind, .. }) if kind != KeyEventKind::Release => {
                        key_to_bytes(code, modifiers)
                    }
                    Event::Paste(text) => text.into_bytes(),
                    Event::Resize(cols, rows) => {
                        if let Err(e) = channel.window_change(cols as u32, rows as u32, 0, 0).await {
                            tracing::debug!("window-change failed: {}", e);
                        }
                        continue;
                    }
                    _ => continue,
                };
                if !bytes.is_empty() {
                    if let Err(e) = channel.data(&bytes[..]).await {
                        break Err(GbError::transport(format!("shell input failed: {}", e)));
                    }
                }
            }

            msg = channel.wait() => {
                match msg {
                    Some(ChannelMsg::Data { ref data }) => {
                        stdout.write_all(data)?;
                        stdout.flush()?;
                    }
                    Some(ChannelMsg::ExtendedData { ref data, .. }) => {
                        stderr.write_all(data)?;
                        stderr.flush()?;
                    }
                    Some(ChannelMsg::ExitStatus { exit_status: status }) => {
                        exit_status = Some(status as i32);
                    }
                    Some(_) => {}
                    None => {
                        break match exit_status {
                            Some(code) => Ok(ShellOutcome::Exited(code)),
                            None => Err(GbError::transport(
                                "shell channel closed without an exit status",
                            )),
                        };
                    }
                }
            }
        }
    };

    stop.store(true, Ordering::Relaxed);
    reader.abort();
    if let Err(e) = channel.close().await {
        tracing::debug!("Closing shell channel failed: {}", e);
    }
    outcome
}

fn is_detach(key: &KeyEvent) -> bool {
    key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char(']')
}

/// Byte for a control chord, e.g. Ctrl+C is 0x03
fn control_byte(c: char) -> Option<u8> {
    match c.to_ascii_lowercase() {
        c @ 'a'..='z' => Some(c as u8 - b'a' + 1),
        '@' | ' ' => Some(0x00),
        '[' => Some(0x1b),
        '\\' => Some(0x1c),
        ']' => Some(0x1d),
        '^' => Some(0x1e),
        '_' => Some(0x1f),
        _ => None,
    }
}

/// Encode a key press the way an xterm would
fn key_to_bytes(code: KeyCode, modifiers: KeyModifiers) -> Vec<u8> {
    const ESC: u8 = 0x1b;

    let csi = |tail: &[u8]| {
        let mut seq = vec![ESC, b'['];
        seq.extend_from_slice(tail);
        seq
    };

    match code {
        KeyCode::Char(c) if modifiers.contains(KeyModifiers::CONTROL) => {
            control_byte(c).map(|b| vec![b]).unwrap_or_default()
        }
        KeyCode::Char(c) => {
            let mut bytes = Vec::new();
            if modifiers.contains(KeyModifiers::ALT) {
                bytes.push(ESC);
            }
            bytes.extend_from_slice(c.to_string().as_bytes());
            bytes
        }
        KeyCode::Enter => vec![b'\r'],
        KeyCode::Tab => vec![b'\t'],
        KeyCode::BackTab => csi(b"Z"),
        KeyCode::Backspace => vec![0x7f],
        KeyCode::Esc => vec![ESC],
        KeyCode::Up => csi(b"A"),
        KeyCode::Down => csi(b"B"),
        KeyCode::Right => csi(b"C"),
        KeyCode::Left => csi(b"D"),
        KeyCode::Home => csi(b"H"),
        KeyCode::End => csi(b"F"),
        KeyCode::Insert => csi(b"2~"),
        KeyCode::Delete => csi(b"3~"),
        KeyCode::PageUp => csi(b"5~"),
        KeyCode::PageDown => csi(b"6~"),
        KeyCode::F(n @ 1..=4) => vec![ESC, b'O', b'P' + (n - 1)],
        KeyCode::F(n) => match n {
            5 => csi(b"15~"),
            6 => csi(b"17~"),
            7 => csi(b"18~"),
            8 => csi(b"19~"),
            9 => csi(b"20~"),
            10 => csi(b"21~"),
            11 => csi(b"23~"),
            12 => csi(b"24~"),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_chords() {
        assert_eq!(key_to_bytes(KeyCode::Char('c'), KeyModifiers::CONTROL), vec![0x03]);
        assert_eq!(key_to_bytes(KeyCode::Char('D'), KeyModifiers::CONTROL), vec![0x04]);
        assert_eq!(key_to_bytes(KeyCode::Char('['), KeyModifiers::CONTROL), vec![0x1b]);
        assert!(key_to_bytes(KeyCode::Char('1'), KeyModifiers::CONTROL).is_empty());
    }

    #[test]
    fn test_plain_and_alt_keys() {
        assert_eq!(key_to_bytes(KeyCode::Char('x'), KeyModifiers::NONE), b"x".to_vec());
        assert_eq!(key_to_bytes(KeyCode::Char('é'), KeyModifiers::NONE), "é".as_bytes().to_vec());
        assert_eq!(key_to_bytes(KeyCode::Char('b'), KeyModifiers::ALT), vec![0x1b, b'b']);
    }

    #[test]
    fn test_navigation_and_function_keys() {
        assert_eq!(key_to_bytes(KeyCode::Up, KeyModifiers::NONE), b"\x1b[A".to_vec());
        assert_eq!(key_to_bytes(KeyCode::Delete, KeyModifiers::NONE), b"\x1b[3~".to_vec());
        assert_eq!(key_to_bytes(KeyCode::F(1), KeyModifiers::NONE), b"\x1bOP".to_vec());
        assert_eq!(key_to_bytes(KeyCode::F(4), KeyModifiers::NONE), b"\x1bOS".to_vec());
        assert_eq!(key_to_bytes(KeyCode::F(12), KeyModifiers::NONE), b"\x1b[24~".to_vec());
    }

    #[test]
    fn test_detach_key() {
        let key = KeyEvent::new(KeyCode::Char(']'), KeyModifiers::CONTROL);
        assert!(is_detach(&key));
        let key = KeyEvent::new(KeyCode::Char(']'), KeyModifiers::NONE);
        assert!(!is_detach(&key));
    }

    #[test]
    fn test_outcome_exit_codes() {
        assert_eq!(ShellOutcome::Exited(130).exit_code(), 130);
        assert_eq!(ShellOutcome::Detached.exit_code(), 0);
    }
}
