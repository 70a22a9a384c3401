//! Tunnel lifecycle over the persistent registry

use std::io;

use gb_core::registry::RegistryLock;
use gb_core::{GbError, TunnelRegistry, TunnelSelector, TunnelSpec, TunnelState};

use super::{ForwardRequest, ForwarderLauncher};

/// Where an invocation holding a tunnel stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelHold {
    /// Still the tunnel on its port, and serving
    Held,
    /// A newer request took the port over
    Superseded,
    /// Closed elsewhere, or the forwarder died
    Lost,
}

/// Opens, closes and lists tunnels.
///
/// Every operation holds the registry lock from load to save, so two
/// invocations racing on one port are serialized and the later one
/// supersedes the earlier.
pub struct TunnelManager<L: ForwarderLauncher> {
    registry: TunnelRegistry,
    launcher: L,
}

impl<L: ForwarderLauncher> TunnelManager<L> {
    pub fn new(registry: TunnelRegistry, launcher: L) -> Self {
        Self { registry, launcher }
    }

    pub fn registry(&self) -> &TunnelRegistry {
        &self.registry
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    async fn lock(&self) -> Result<RegistryLock, GbError> {
        let registry = self.registry.clone();
        let lock = tokio::task::spawn_blocking(move || registry.lock())
            .await
            .map_err(|e| GbError::Io(io::Error::other(e)))??;
        Ok(lock)
    }

    /// Forward `local_port` to `remote_port` on the host.
    ///
    /// Any tunnel we own on `local_port` is stopped first. The resulting record,
    /// Active or Failed, is persisted before returning.
    pub async fn open_tunnel(
        &self,
        local_port: u16,
        remote_port: u16,
        label: Option<&str>,
    ) -> Result<TunnelSpec, GbError> {
        let lock = self.lock().await?;
        let mut registry = self.registry.load(&lock)?;

        if let Some(existing) = registry.get(local_port).cloned() {
            self.supersede(&existing).await?;
        }

        let label = label
            .map(str::to_string)
            .unwrap_or_else(|| TunnelSpec::default_label(local_port));
        let mut spec = TunnelSpec::pending(local_port, remote_port, label.clone());
        registry.upsert(spec.clone());
        self.registry.save(&lock, &registry)?;

        let request = ForwardRequest {
            local_port,
            remote_port,
            label,
            log_path: self.registry.log_path(local_port),
        };

        match self.launcher.launch(&request).await {
            Ok(handle) => {
                spec.handle = Some(handle);
                spec.state = TunnelState::Active;
                registry.upsert(spec.clone());
                self.registry.save(&lock, &registry)?;
                tracing::info!(
                    "Tunnel '{}' active: localhost:{} -> remote:{} (pid {})",
                    spec.label,
                    local_port,
                    remote_port,
                    handle.pid
                );
                Ok(spec)
            }
            Err(e) => {
                spec.state = TunnelState::Failed;
                spec.error = Some(e.to_string());
                registry.upsert(spec);
                self.registry.save(&lock, &registry)?;
                tracing::warn!("Tunnel on port {} failed: {}", local_port, e);
                Err(GbError::TunnelEstablish {
                    port: local_port,
                    source: Box::new(e),
                })
            }
        }
    }

    /// Stop whatever currently holds a port we are about to reuse
    async fn supersede(&self, existing: &TunnelSpec) -> Result<(), GbError> {
        let Some(handle) = existing.handle else {
            return Ok(());
        };
        if !matches!(existing.state, TunnelState::Active | TunnelState::Pending) {
            return Ok(());
        }

        if self.launcher.owns(&handle, existing.local_port) {
            tracing::info!(
                "Superseding tunnel '{}' on port {} (pid {})",
                existing.label,
                existing.local_port,
                handle.pid
            );
            self.launcher.stop(&handle).await?;
        } else {
            // The pid may have been recycled by an unrelated process
            tracing::debug!(
                "Recorded pid {} for port {} is not our forwarder; not signalling it",
                handle.pid,
                existing.local_port
            );
        }
        Ok(())
    }

    /// Close a tunnel by label or port. Unknown or already closed is a no-op.
    ///
    /// Returns the closed record, if there was one.
    pub async fn close_tunnel(&self, selector: &TunnelSelector) -> Result<Option<TunnelSpec>, GbError> {
        let lock = self.lock().await?;
        let mut registry = self.registry.load(&lock)?;

        let Some(port) = registry.resolve(selector) else {
            tracing::debug!("No tunnel matches {}; nothing to close", selector);
            return Ok(None);
        };
        let Some(spec) = registry.get_mut(port) else {
            return Ok(None);
        };
        if spec.state == TunnelState::Closed {
            return Ok(Some(spec.clone()));
        }

        let closed = self.stop_record(spec).await?;
        self.registry.save(&lock, &registry)?;
        tracing::info!("Closed tunnel '{}' on port {}", closed.label, port);
        Ok(Some(closed))
    }

    /// Close the tunnel `opened` only if it still holds its port.
    ///
    /// A holder that was superseded must not take the newer tunnel down with
    /// it. Returns whether anything was closed.
    pub async fn close_owned(&self, opened: &TunnelSpec) -> Result<bool, GbError> {
        let lock = self.lock().await?;
        let mut registry = self.registry.load(&lock)?;

        let Some(spec) = registry.get_mut(opened.local_port) else {
            return Ok(false);
        };
        if spec.handle != opened.handle || spec.state == TunnelState::Closed {
            tracing::debug!(
                "Port {} no longer carries tunnel '{}'; leaving it alone",
                opened.local_port,
                opened.label
            );
            return Ok(false);
        }

        let closed = self.stop_record(spec).await?;
        self.registry.save(&lock, &registry)?;
        tracing::info!("Closed tunnel '{}' on port {}", closed.label, closed.local_port);
        Ok(true)
    }

    /// Check whether the tunnel `opened` is still the live one on its port
    pub async fn check_hold(&self, opened: &TunnelSpec) -> Result<TunnelHold, GbError> {
        let current = {
            let lock = self.lock().await?;
            self.registry.load(&lock)?.get(opened.local_port).cloned()
        };

        let Some(current) = current else {
            return Ok(TunnelHold::Lost);
        };
        if current.handle != opened.handle {
            return Ok(TunnelHold::Superseded);
        }
        let Some(handle) = current.handle else {
            return Ok(TunnelHold::Lost);
        };
        if current.state != TunnelState::Active {
            return Ok(TunnelHold::Lost);
        }

        if self.launcher.is_serving(&handle, current.local_port).await {
            Ok(TunnelHold::Held)
        } else {
            Ok(TunnelHold::Lost)
        }
    }

    /// Stop the forwarder behind `spec` (if it is ours) and mark it Closed
    async fn stop_record(&self, spec: &mut TunnelSpec) -> Result<TunnelSpec, GbError> {
        if let Some(handle) = spec.handle {
            if self.launcher.owns(&handle, spec.local_port) {
                self.launcher.stop(&handle).await?;
            }
        }
        spec.state = TunnelState::Closed;
        spec.error = None;
        Ok(spec.clone())
    }

    /// Every tracked tunnel, with dead Active entries downgraded to Failed
    pub async fn list_tunnels(&self) -> Result<Vec<TunnelSpec>, GbError> {
        let lock = self.lock().await?;
        let mut registry = self.registry.load(&lock)?;
        let mut changed = false;

        for spec in registry.tunnels.values_mut() {
            match spec.state {
                TunnelState::Active => {
                    let serving = match spec.handle {
                        Some(handle) => self.launcher.is_serving(&handle, spec.local_port).await,
                        None => false,
                    };
                    if !serving {
                        tracing::debug!("Tunnel on port {} is no longer serving", spec.local_port);
                        spec.state = TunnelState::Failed;
                        spec.error = Some("forwarder is no longer running".to_string());
                        changed = true;
                    }
                }
                // Opens finish under the lock we now hold, so this one was interrupted
                TunnelState::Pending => {
                    spec.state = TunnelState::Failed;
                    spec.error = Some("interrupted while opening".to_string());
                    changed = true;
                }
                TunnelState::Failed | TunnelState::Closed => {}
            }
        }

        if changed {
            self.registry.save(&lock, &registry)?;
        }
        Ok(registry.tunnels.into_values().collect())
    }

    /// Forget Closed and Failed records; returns how many were dropped
    pub async fn prune(&self) -> Result<usize, GbError> {
        let lock = self.lock().await?;
        let mut registry = self.registry.load(&lock)?;
        let removed = registry.prune();
        if removed > 0 {
            self.registry.save(&lock, &registry)?;
        }
        tracing::debug!("Pruned {} tunnel record(s)", removed);
        Ok(removed)
    }
}
