//! One-shot host inventory

use gb_core::{GbError, Remote};

/// Each section is `(title, command)`; a failing command only blanks its section
const SECTIONS: &[(&str, &str)] = &[
    ("System", "uname -srmo"),
    ("Uptime", "uptime"),
    ("CPU", "lscpu | grep -E '^(Model name|Socket|Core|Thread|CPU\\(s\\))'"),
    ("Memory", "free -h"),
    ("Disk", "df -h \"$HOME\""),
    ("GPU", "nvidia-smi --query-gpu=index,name,driver_version,memory.total --format=csv"),
    ("CUDA", "nvcc --version | tail -n 1"),
    ("Python", "python3 --version"),
    ("PyTorch", "python3 -c 'import torch; print(torch.__version__, torch.cuda.is_available())'"),
];

/// Marker printed before each section
const SECTION_MARKER: &str = "::gpubox-section::";

/// One titled block of the inventory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoSection {
    pub title: String,
    pub body: String,
}

/// Shell script that prints every section in one round trip
pub fn info_script() -> String {
    SECTIONS
        .iter()
        .map(|(title, command)| {
            format!(
                "echo '{marker}{title}'; ( {command} ) 2>/dev/null || echo 'unavailable'",
                marker = SECTION_MARKER,
                title = title,
                command = command
            )
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Collect the inventory. Only transport problems are errors.
pub async fn collect_info<R: Remote + ?Sized>(remote: &R) -> Result<Vec<InfoSection>, GbError> {
    let result = remote.exec(&info_script(), false).await?;
    if !result.success() {
        tracing::debug!("Info script exited {}", result.exit_code);
    }
    Ok(parse_sections(&result.stdout_tail))
}

fn parse_sections(output: &str) -> Vec<InfoSection> {
    let mut sections: Vec<InfoSection> = Vec::new();
    for line in output.lines() {
        if let Some(title) = line.strip_prefix(SECTION_MARKER) {
            sections.push(InfoSection {
                title: title.to_string(),
                body: String::new(),
            });
        } else if let Some(current) = sections.last_mut() {
            if !current.body.is_empty() {
                current.body.push('\n');
            }
            current.body.push_str(line.trim_end());
        }
    }
    sections
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRemote;

    #[test]
    fn test_script_covers_every_section() {
        let script = info_script();
        for (title, _) in SECTIONS {
            assert!(script.contains(&format!("{}{}", SECTION_MARKER, title)));
        }
    }

    #[tokio::test]
    async fn test_sections_are_split() {
        let remote = FakeRemote::new();
        remote.push_exit(
            0,
            "::gpubox-section::System\nLinux 6.5.0 x86_64 GNU/Linux\n\
             ::gpubox-section::GPU\nunavailable\n\
             ::gpubox-section::Memory\n  total used\nMem: 64G 3G\n",
            "",
        );

        let sections = collect_info(&remote).await.unwrap();
        assert_eq!(sections.len(), 3);
        assert_eq!(sections[0].title, "System");
        assert_eq!(sections[0].body, "Linux 6.5.0 x86_64 GNU/Linux");
        assert_eq!(sections[1].body, "unavailable");
        assert_eq!(sections[2].body, "  total used\nMem: 64G 3G");
    }

    #[tokio::test]
    async fn test_transport_failure_propagates() {
        let remote = FakeRemote::new();
        remote.push_error(GbError::transport("no route to host"));
        assert!(collect_info(&remote).await.unwrap_err().is_transport());
    }
}
