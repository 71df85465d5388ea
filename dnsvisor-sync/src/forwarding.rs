//! One forwarding daemon instance: its generated files, the `dnsmasq.d`
//! fragments derived from DHCP leases and the resolver list, the watchers
//! that keep them fresh, and its state snapshots.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::Span;

use dnsvisor_core::{ForwardingConfig, ForwardingLayout, ForwardingState};
use dnsvisor_process::{Action, ManagedProcess, ProcessError, Signal};
use dnsvisor_renderer::Renderer;
use dnsvisor_state::{read_resolv_nameservers, SnapshotCoordinator};

use crate::error::{io_err, SyncError};
use crate::reconcile::Instance;
use crate::watcher::{FileEventHandler, FileWatcher, ReloadWatcher};
use crate::wiring::request;
use crate::writer::{atomic_write, remove_dir_if_empty, remove_file_logged, HashStore, WriteResult};

/// State shared with watcher threads.
struct Shared {
    layout: ForwardingLayout,
    renderer: Arc<Renderer>,
    process: Arc<dyn ManagedProcess>,
    hashes: Mutex<HashStore>,
    span: Span,
}

impl Shared {
    fn write(&self, path: &Path, content: &str) -> Result<WriteResult, SyncError> {
        atomic_write(path, content, &mut self.hashes.lock())
    }

    fn remove(&self, path: &Path) {
        remove_file_logged(path, &mut self.hashes.lock());
    }

    fn write_dhcp_fragment(&self, interface: &str) -> Result<WriteResult, SyncError> {
        let layout = &self.layout;
        let nameservers = read_resolv_nameservers(&layout.dhcp_resolv_file(interface));
        let content = self.renderer.fragment("dhcp", &nameservers)?;
        self.write(&layout.dhcp_fragment(interface), &content)
    }

    fn write_system_fragment(&self) -> Result<WriteResult, SyncError> {
        let nameservers = read_resolv_nameservers(&self.layout.resolv_file);
        let content = self.renderer.fragment("system", &nameservers)?;
        self.write(&self.layout.system_fragment, &content)
    }

    /// Rewrite a fragment from a watcher and restart when it changed.
    fn refresh(&self, write: impl FnOnce(&Self) -> Result<WriteResult, SyncError>) -> Result<(), SyncError> {
        let _enter = self.span.enter();
        if write(self)?.is_written() {
            request(self.process.as_ref(), Action::Restart)?;
        }
        Ok(())
    }
}

struct DhcpLeaseHandler {
    shared: Arc<Shared>,
    interface: String,
}

impl FileEventHandler for DhcpLeaseHandler {
    fn close_write(&self, _path: &Path) -> Result<(), SyncError> {
        self.shared.refresh(|s| s.write_dhcp_fragment(&self.interface))
    }

    fn rename(&self, path: &Path) -> Result<(), SyncError> {
        if !path.exists() {
            return Ok(());
        }
        self.shared.refresh(|s| s.write_dhcp_fragment(&self.interface))
    }
}

struct SystemListHandler {
    shared: Arc<Shared>,
}

impl FileEventHandler for SystemListHandler {
    fn close_write(&self, _path: &Path) -> Result<(), SyncError> {
        self.shared.refresh(Shared::write_system_fragment)
    }

    fn rename(&self, path: &Path) -> Result<(), SyncError> {
        if !path.exists() {
            return Ok(());
        }
        self.shared.refresh(Shared::write_system_fragment)
    }
}

/// Side table of DHCP fragments, diffed against its own previous set.
#[derive(Default)]
struct DhcpFragments {
    interfaces: BTreeSet<String>,
    watcher: Option<FileWatcher>,
}

impl DhcpFragments {
    fn set(&mut self, shared: &Arc<Shared>, declared: &[String]) -> Result<(), SyncError> {
        let wanted: BTreeSet<String> = declared.iter().cloned().collect();
        if wanted == self.interfaces {
            return Ok(());
        }
        for gone in self.interfaces.difference(&wanted) {
            shared.remove(&shared.layout.dhcp_fragment(gone));
        }
        for added in wanted.difference(&self.interfaces) {
            shared.write_dhcp_fragment(added)?;
        }

        if let Some(watcher) = self.watcher.take() {
            watcher.stop();
        }
        if !wanted.is_empty() {
            let routes = wanted
                .iter()
                .map(|interface| {
                    let handler: Arc<dyn FileEventHandler> = Arc::new(DhcpLeaseHandler {
                        shared: shared.clone(),
                        interface: interface.clone(),
                    });
                    (shared.layout.dhcp_lease_file(interface), handler)
                })
                .collect();
            let label = format!("dhcp-{}", shared.layout.instance);
            self.watcher = Some(FileWatcher::start(label, routes)?);
        }
        self.interfaces = wanted;
        Ok(())
    }

    fn clear(&mut self, shared: &Shared) {
        if let Some(watcher) = self.watcher.take() {
            watcher.stop();
        }
        for interface in std::mem::take(&mut self.interfaces) {
            shared.remove(&shared.layout.dhcp_fragment(&interface));
        }
    }
}

#[derive(Default)]
struct Inner {
    current: Option<ForwardingConfig>,
    resolv_watcher: Option<ReloadWatcher>,
    hosts_watcher: Option<ReloadWatcher>,
    dhcp: DhcpFragments,
    system_watcher: Option<FileWatcher>,
}

impl Inner {
    fn stop_watchers(&mut self) {
        for watcher in [self.resolv_watcher.take(), self.hosts_watcher.take()].into_iter().flatten() {
            watcher.stop();
        }
    }
}

/// A forwarding daemon and everything generated for it.
pub struct ForwardingInstance {
    shared: Arc<Shared>,
    snapshot: SnapshotCoordinator,
    inner: Mutex<Inner>,
}

impl ForwardingInstance {
    pub fn new(
        layout: ForwardingLayout,
        process: Arc<dyn ManagedProcess>,
        renderer: Arc<Renderer>,
        snapshot_timeout: Duration,
    ) -> Self {
        let span = tracing::info_span!("forwarding", instance = %layout.instance);
        let snapshot = SnapshotCoordinator::new(process.clone(), layout.clone(), snapshot_timeout);
        Self {
            shared: Arc::new(Shared {
                layout,
                renderer,
                process,
                hashes: Mutex::new(HashStore::new()),
                span,
            }),
            snapshot,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn layout(&self) -> &ForwardingLayout {
        &self.shared.layout
    }

    /// Configuration last applied successfully.
    pub fn current(&self) -> Option<ForwardingConfig> {
        self.inner.lock().current.clone()
    }

    /// Apply a declared configuration, or tear everything down on `None`.
    ///
    /// A configuration equal to the applied one has no side effects.
    pub fn set(&self, config: Option<&ForwardingConfig>) -> Result<(), SyncError> {
        let _enter = self.shared.span.enter();
        let mut inner = self.inner.lock();
        if inner.current.as_ref() == config {
            tracing::debug!("configuration unchanged");
            return Ok(());
        }
        match config {
            Some(conf) => self.update(&mut inner, conf)?,
            None => self.delete(&mut inner),
        }
        inner.current = config.cloned();
        Ok(())
    }

    fn update(&self, inner: &mut Inner, conf: &ForwardingConfig) -> Result<(), SyncError> {
        let shared = &self.shared;
        let layout = &shared.layout;
        for dir in [&layout.instance_dir, &layout.conf_dir] {
            fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }

        let rendered = shared.renderer.forwarding_conf(layout, conf)?;
        shared.write(&layout.conf_file, &rendered)?;
        let env = shared.renderer.forwarding_env(layout)?;
        shared.write(&layout.env_file, &env)?;

        if conf.nameservers_from_config() {
            if let Some(watcher) = inner.resolv_watcher.take() {
                watcher.stop();
            }
        } else if inner.resolv_watcher.is_none() {
            inner.resolv_watcher = Some(ReloadWatcher::start(&layout.resolv_file, shared.process.clone())?);
        }
        if inner.hosts_watcher.is_none() {
            inner.hosts_watcher = Some(ReloadWatcher::start(&layout.hosts_file, shared.process.clone())?);
        }

        inner.dhcp.set(shared, &conf.dhcp_interfaces)?;
        self.set_system(inner, conf.system)?;

        request(shared.process.as_ref(), Action::Restart)?;
        tracing::info!("configuration applied");
        Ok(())
    }

    fn set_system(&self, inner: &mut Inner, enabled: bool) -> Result<(), SyncError> {
        let shared = &self.shared;
        if !enabled {
            if let Some(watcher) = inner.system_watcher.take() {
                watcher.stop();
                shared.remove(&shared.layout.system_fragment);
            }
            return Ok(());
        }
        shared.write_system_fragment()?;
        if inner.system_watcher.is_none() {
            let handler: Arc<dyn FileEventHandler> = Arc::new(SystemListHandler {
                shared: shared.clone(),
            });
            let label = format!("system-{}", shared.layout.instance);
            inner.system_watcher = Some(FileWatcher::start(
                label,
                vec![(shared.layout.resolv_file.clone(), handler)],
            )?);
        }
        Ok(())
    }

    fn delete(&self, inner: &mut Inner) {
        let shared = &self.shared;
        let layout = &shared.layout;

        inner.stop_watchers();
        inner.dhcp.clear(shared);
        if let Err(e) = self.set_system(inner, false) {
            tracing::debug!(error = %e, "system fragment cleanup failed");
        }

        if let Err(e) = shared.process.shutdown() {
            tracing::debug!(error = %e, "stop during teardown failed");
        }

        for file in [&layout.conf_file, &layout.env_file, &layout.state_file] {
            shared.remove(file);
        }
        if let Err(e) = fs::remove_dir_all(&layout.conf_dir) {
            tracing::debug!(path = %layout.conf_dir.display(), error = %e, "remove skipped");
        }
        remove_dir_if_empty(&layout.instance_dir);
        tracing::info!("configuration removed");
    }

    /// Fresh statistics, or the previous snapshot when the daemon does not
    /// answer in time.
    pub fn state(&self) -> Arc<ForwardingState> {
        self.snapshot.snapshot()
    }

    /// Restart the daemon.
    pub fn reset(&self) -> Result<(), ProcessError> {
        request(self.shared.process.as_ref(), Action::Restart)
    }

    /// Ask the daemon to drop its cache.
    pub fn reset_cache(&self) -> Result<(), ProcessError> {
        request(self.shared.process.as_ref(), Action::Signal(Signal::SIGHUP))
    }
}

impl Instance for ForwardingInstance {
    type Config = ForwardingConfig;

    fn set(&self, config: Option<&ForwardingConfig>) -> Result<(), SyncError> {
        ForwardingInstance::set(self, config)
    }
}
