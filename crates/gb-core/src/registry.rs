//! On-disk registry of tunnels.
//!
//! Tunnels are owned by detached forwarder processes that outlive the
//! invocation that started them, so the set of tunnels lives in
//! `<state dir>/tunnels.json`. Every read-modify-write happens while holding an
//! exclusive lock on `<state dir>/tunnels.lock`, which serializes concurrent
//! `gpubox` invocations touching the same port.

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::error::RegistryError;
use crate::types::{TunnelSpec, TunnelState};

pub type Result<T> = std::result::Result<T, RegistryError>;

const REGISTRY_FILE_NAME: &str = "tunnels.json";
const LOCK_FILE_NAME: &str = "tunnels.lock";
const LOG_DIR_NAME: &str = "tunnels";

/// How a caller names a tunnel: by local port or by label
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelSelector {
    Port(u16),
    Label(String),
}

impl TunnelSelector {
    /// Numbers are ports, anything else is a label
    pub fn parse(s: &str) -> Self {
        match s.parse::<u16>() {
            Ok(port) => TunnelSelector::Port(port),
            Err(_) => TunnelSelector::Label(s.to_string()),
        }
    }
}

impl std::fmt::Display for TunnelSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TunnelSelector::Port(p) => write!(f, "port {}", p),
            TunnelSelector::Label(l) => write!(f, "'{}'", l),
        }
    }
}

/// Persisted registry format, keyed by local port
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryFile {
    #[serde(default)]
    pub tunnels: BTreeMap<u16, TunnelSpec>,
}

impl RegistryFile {
    pub fn get(&self, local_port: u16) -> Option<&TunnelSpec> {
        self.tunnels.get(&local_port)
    }

    pub fn get_mut(&mut self, local_port: u16) -> Option<&mut TunnelSpec> {
        self.tunnels.get_mut(&local_port)
    }

    /// Record `spec`, replacing whatever was tracked for its port
    pub fn upsert(&mut self, spec: TunnelSpec) -> Option<TunnelSpec> {
        self.tunnels.insert(spec.local_port, spec)
    }

    /// Resolve a selector to a local port.
    ///
    /// A label may be shared by a closed and a live record; the live one wins.
    pub fn resolve(&self, selector: &TunnelSelector) -> Option<u16> {
        match selector {
            TunnelSelector::Port(port) => self.tunnels.contains_key(port).then_some(*port),
            TunnelSelector::Label(label) => {
                let all: Vec<&TunnelSpec> =
                    self.tunnels.values().filter(|t| &t.label == label).collect();
                all.iter()
                    .find(|t| t.state == TunnelState::Active)
                    .or_else(|| all.first())
                    .map(|t| t.local_port)
            }
        }
    }

    /// Drop every record that no longer owns a process
    pub fn prune(&mut self) -> usize {
        let before = self.tunnels.len();
        self.tunnels
            .retain(|_, t| matches!(t.state, TunnelState::Active | TunnelState::Pending));
        before - self.tunnels.len()
    }
}

/// Exclusive lock on the registry; released on drop
pub struct RegistryLock {
    _file: File,
}

/// Handle to the registry files under a state directory
#[derive(Debug, Clone)]
pub struct TunnelRegistry {
    state_dir: PathBuf,
    registry_path: PathBuf,
    lock_path: PathBuf,
}

impl TunnelRegistry {
    /// Create the state directory if needed
    pub fn new(state_dir: &Path) -> Result<Self> {
        fs::create_dir_all(state_dir.join(LOG_DIR_NAME)).map_err(RegistryError::CreateDir)?;
        Ok(Self {
            state_dir: state_dir.to_path_buf(),
            registry_path: state_dir.join(REGISTRY_FILE_NAME),
            lock_path: state_dir.join(LOCK_FILE_NAME),
        })
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Log file for the forwarder bound to `local_port`
    pub fn log_path(&self, local_port: u16) -> PathBuf {
        self.state_dir
            .join(LOG_DIR_NAME)
            .join(format!("{}.log", local_port))
    }

    /// Block until this process holds the registry lock
    pub fn lock(&self) -> Result<RegistryLock> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(RegistryError::OpenFile)?;
        file.lock_exclusive().map_err(RegistryError::Lock)?;
        Ok(RegistryLock { _file: file })
    }

    /// Read the registry; an absent or empty file is an empty registry
    pub fn load(&self, _lock: &RegistryLock) -> Result<RegistryFile> {
        let mut file = match File::open(&self.registry_path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(RegistryFile::default())
            }
            Err(e) => return Err(RegistryError::OpenFile(e)),
        };

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(RegistryError::ReadFile)?;

        if contents.trim().is_empty() {
            return Ok(RegistryFile::default());
        }
        serde_json::from_str(&contents).map_err(RegistryError::Parse)
    }

    /// Write the registry atomically (temp file + rename)
    pub fn save(&self, _lock: &RegistryLock, registry: &RegistryFile) -> Result<()> {
        let contents = serde_json::to_string_pretty(registry).map_err(RegistryError::Serialize)?;

        let temp_path = self.registry_path.with_extension("json.tmp");
        {
            let mut temp_file = File::create(&temp_path).map_err(RegistryError::WriteFile)?;
            temp_file
                .write_all(contents.as_bytes())
                .map_err(RegistryError::WriteFile)?;
            temp_file.sync_all().map_err(RegistryError::WriteFile)?;
        }

        fs::rename(&temp_path, &self.registry_path).map_err(RegistryError::Rename)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ForwarderHandle;
    use tempfile::TempDir;

    fn active(port: u16, label: &str) -> TunnelSpec {
        TunnelSpec {
            handle: Some(ForwarderHandle {
                pid: 4242,
                started_at: 1,
            }),
            state: TunnelState::Active,
            ..TunnelSpec::pending(port, 8888, label)
        }
    }

    #[test]
    fn test_load_missing_registry_is_empty() {
        let dir = TempDir::new().unwrap();
        let registry = TunnelRegistry::new(dir.path()).unwrap();
        let lock = registry.lock().unwrap();
        assert!(registry.load(&lock).unwrap().tunnels.is_empty());
    }

    #[test]
    fn test_save_and_reload_across_handles() {
        let dir = TempDir::new().unwrap();
        {
            let registry = TunnelRegistry::new(dir.path()).unwrap();
            let lock = registry.lock().unwrap();
            let mut file = registry.load(&lock).unwrap();
            file.upsert(active(8888, "jupyter"));
            registry.save(&lock, &file).unwrap();
        }

        // A fresh handle, as a later invocation would create
        let registry = TunnelRegistry::new(dir.path()).unwrap();
        let lock = registry.lock().unwrap();
        let file = registry.load(&lock).unwrap();
        let spec = file.get(8888).unwrap();
        assert_eq!(spec.label, "jupyter");
        assert_eq!(spec.state, TunnelState::Active);
        assert_eq!(spec.handle.unwrap().pid, 4242);
    }

    #[test]
    fn test_resolve_by_port_and_label() {
        let mut file = RegistryFile::default();
        file.upsert(active(8888, "jupyter"));
        file.upsert(active(6006, "tensorboard"));

        assert_eq!(file.resolve(&TunnelSelector::parse("6006")), Some(6006));
        assert_eq!(file.resolve(&TunnelSelector::parse("jupyter")), Some(8888));
        assert_eq!(file.resolve(&TunnelSelector::parse("7000")), None);
        assert_eq!(file.resolve(&TunnelSelector::parse("nope")), None);
    }

    #[test]
    fn test_resolve_label_prefers_live_record() {
        let mut file = RegistryFile::default();
        let mut closed = active(7000, "web");
        closed.state = TunnelState::Closed;
        file.upsert(closed);
        file.upsert(active(7001, "web"));
        assert_eq!(file.resolve(&TunnelSelector::Label("web".into())), Some(7001));
    }

    #[test]
    fn test_prune_keeps_live_records() {
        let mut file = RegistryFile::default();
        file.upsert(active(8888, "jupyter"));
        let mut failed = active(9000, "dead");
        failed.state = TunnelState::Failed;
        file.upsert(failed);

        assert_eq!(file.prune(), 1);
        assert!(file.get(8888).is_some());
        assert!(file.get(9000).is_none());
    }

    #[test]
    fn test_log_path_per_port() {
        let dir = TempDir::new().unwrap();
        let registry = TunnelRegistry::new(dir.path()).unwrap();
        assert!(registry.log_path(8888).ends_with("tunnels/8888.log"));
    }
}
