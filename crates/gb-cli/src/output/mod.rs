//! Output formatting utilities for the CLI
//!
//! Tables for tunnels, one-line renderings for probe results and telemetry,
//! and the coloured status helpers every command reports through.

use tabled::{settings::Style, Table, Tabled};

use gb_core::time::{elapsed_since, format_duration};
use gb_core::{ConfigError, GbError, ProbeReport, TelemetryTick, TunnelSpec, TunnelState};
use gb_remote::info::InfoSection;

/// Format tracked tunnels as an ASCII table
pub fn format_tunnels(tunnels: &[TunnelSpec]) -> String {
    if tunnels.is_empty() {
        return "No tunnels".to_string();
    }

    #[derive(Tabled)]
    struct TunnelRow {
        #[tabled(rename = "LABEL")]
        label: String,
        #[tabled(rename = "LOCAL")]
        local: String,
        #[tabled(rename = "REMOTE")]
        remote: u16,
        #[tabled(rename = "STATE")]
        state: String,
        #[tabled(rename = "PID")]
        pid: String,
        #[tabled(rename = "UP")]
        up: String,
        #[tabled(rename = "NOTE")]
        note: String,
    }

    let rows: Vec<TunnelRow> = tunnels
        .iter()
        .map(|t| {
            let live = t.state == TunnelState::Active;
            TunnelRow {
                label: t.label.clone(),
                local: t.local_url(),
                remote: t.remote_port,
                state: t.state.to_string(),
                pid: t
                    .handle
                    .filter(|_| live)
                    .map(|h| h.pid.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                up: t
                    .handle
                    .filter(|_| live)
                    .map(|h| format_duration(elapsed_since(h.started_at)))
                    .unwrap_or_else(|| "-".to_string()),
                note: t.error.as_deref().map(|e| truncate(e, 40)).unwrap_or_default(),
            }
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Multi-line summary of a connection probe
pub fn format_probe(target: &str, report: &ProbeReport) -> String {
    if !report.reachable {
        return format!(
            "{} is unreachable: {}",
            target,
            report.detail.as_deref().unwrap_or("no detail")
        );
    }

    let mut output = format!("{} is reachable", target);
    if let Some(latency) = report.latency {
        output.push_str(&format!(" ({} ms)", latency.as_millis()));
    }
    output.push_str(&format!("\nAccelerators: {}", report.accelerator));
    output
}

/// One line per device, or one line for a failed tick
pub fn format_tick(tick: &TelemetryTick) -> Vec<String> {
    match tick {
        TelemetryTick::Samples(samples) if samples.is_empty() => {
            vec!["no accelerators reported".to_string()]
        }
        TelemetryTick::Samples(samples) => samples.iter().map(|s| s.to_string()).collect(),
        TelemetryTick::Failed { reason, .. } => vec![format!("telemetry unavailable: {}", reason)],
    }
}

/// Titled blocks of `gpubox info`
pub fn format_info(sections: &[InfoSection]) -> String {
    let mut output = String::new();
    for section in sections {
        output.push_str(&format!("== {} ==\n", section.title));
        if section.body.is_empty() {
            output.push_str("(no output)\n");
        } else {
            output.push_str(&section.body);
            output.push('\n');
        }
        output.push('\n');
    }
    output.trim_end().to_string()
}

/// Truncate a string with ellipsis if too long
fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red with an X prefix, to stderr
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning in yellow, to stderr
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an informational message in cyan.
///
/// Goes to stderr so it never mixes with remote command output on stdout.
pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a command failure and pick the process exit code for it.
///
/// Remote exit codes pass through silently, transport failures exit 2,
/// everything else exits 1.
pub fn report_error(err: &anyhow::Error) -> i32 {
    let Some(gb) = err.downcast_ref::<GbError>() else {
        print_error(&format!("{:#}", err));
        return 1;
    };

    match gb {
        // The remote command already reported on its own streams
        GbError::RemoteExit(_) => {}
        GbError::Config(ConfigError::MissingField(field)) if field == "remote.host" => {
            print_error(&gb.to_string());
            print_info("Pass --host, set GPUBOX_HOST, or add remote.host to the config file");
        }
        _ => print_error(&format!("{:#}", err)),
    }
    gb.exit_code()
}
