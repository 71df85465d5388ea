//! Dynamic DNS update daemons of one instance, one unit per interface.

use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::Span;

use dnsvisor_core::{DynamicConfig, DynamicInterface, DynamicLayout, DynamicState};
use dnsvisor_process::{Action, ManagedProcess, ProcessError};
use dnsvisor_renderer::Renderer;
use dnsvisor_state::read_ddclient_cache;

use crate::error::{io_err, SyncError};
use crate::reconcile::Instance;
use crate::wiring::{request, ProcessWiring};
use crate::writer::{
    atomic_write, atomic_write_mode, remove_dir_if_empty, remove_file_logged, HashStore,
    PRIVATE_MODE,
};

struct InterfaceUnit {
    config: DynamicInterface,
    process: Arc<dyn ManagedProcess>,
}

#[derive(Default)]
struct Inner {
    current: Option<DynamicConfig>,
    units: BTreeMap<String, InterfaceUnit>,
    hashes: HashStore,
}

pub struct DynamicInstance {
    layout: DynamicLayout,
    wiring: ProcessWiring,
    renderer: Arc<Renderer>,
    inner: Mutex<Inner>,
    span: Span,
}

impl DynamicInstance {
    pub fn new(layout: DynamicLayout, wiring: ProcessWiring, renderer: Arc<Renderer>) -> Self {
        let span = tracing::info_span!("dynamic", instance = %layout.instance);
        Self {
            layout,
            wiring,
            renderer,
            inner: Mutex::new(Inner::default()),
            span,
        }
    }

    /// Apply a declared configuration, or tear every interface down on `None`.
    pub fn set(&self, config: Option<&DynamicConfig>) -> Result<(), SyncError> {
        let _enter = self.span.enter();
        let mut inner = self.inner.lock();
        if inner.current.as_ref() == config {
            tracing::debug!("configuration unchanged");
            return Ok(());
        }
        match config {
            Some(conf) => self.update(&mut inner, conf)?,
            None => {
                for name in inner.units.keys().cloned().collect::<Vec<_>>() {
                    self.remove_interface(&mut inner, &name);
                }
            }
        }
        inner.current = config.cloned();
        Ok(())
    }

    fn update(&self, inner: &mut Inner, conf: &DynamicConfig) -> Result<(), SyncError> {
        for dir in [self.layout.config_dir(), self.layout.cache_dir()] {
            fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }

        let stale: Vec<String> = inner
            .units
            .keys()
            .filter(|name| conf.interface(name).is_none())
            .cloned()
            .collect();
        for name in stale {
            self.remove_interface(inner, &name);
        }

        for intf in &conf.interfaces {
            self.apply_interface(inner, intf)?;
        }
        tracing::info!(interfaces = conf.interfaces.len(), "configuration applied");
        Ok(())
    }

    fn apply_interface(&self, inner: &mut Inner, intf: &DynamicInterface) -> Result<(), SyncError> {
        let layout = &self.layout;
        let name = intf.name.as_str();
        if inner.units.get(name).map(|u| &u.config) == Some(intf) {
            return Ok(());
        }

        let env_dir = layout.env_dir(name);
        fs::create_dir_all(&env_dir).map_err(|e| io_err(&env_dir, e))?;
        let conf = self.renderer.ddclient_conf(layout, intf)?;
        atomic_write_mode(&layout.config_file(name), &conf, &mut inner.hashes, Some(PRIVATE_MODE))?;
        let env = self.renderer.ddclient_env(layout, intf)?;
        atomic_write(&layout.env_file(name), &env, &mut inner.hashes)?;

        let process = match inner.units.get(name) {
            Some(unit) => unit.process.clone(),
            None => self.wiring.process(&layout.instance, &layout.unit(name))?,
        };
        request(process.as_ref(), Action::Reload)?;
        tracing::info!(interface = name, "update daemon configured");
        inner.units.insert(
            name.to_string(),
            InterfaceUnit {
                config: intf.clone(),
                process,
            },
        );
        Ok(())
    }

    fn remove_interface(&self, inner: &mut Inner, name: &str) {
        let layout = &self.layout;
        if let Some(unit) = inner.units.remove(name) {
            if let Err(e) = unit.process.shutdown() {
                tracing::debug!(interface = name, error = %e, "stop during teardown failed");
            }
        }
        for file in [
            layout.config_file(name),
            layout.cache_file(name),
            layout.env_file(name),
            layout.pid_file(name),
        ] {
            remove_file_logged(&file, &mut inner.hashes);
        }
        remove_dir_if_empty(&layout.env_dir(name));
        tracing::info!(interface = name, "update daemon removed");
    }

    /// Interfaces currently configured, in declaration order.
    pub fn interfaces(&self) -> Vec<String> {
        self.inner
            .lock()
            .current
            .as_ref()
            .map(|conf| conf.interfaces.iter().map(|i| i.name.clone()).collect())
            .unwrap_or_default()
    }

    /// Last reported update per host, read from each interface's cache.
    pub fn status(&self) -> DynamicState {
        let interfaces = self
            .interfaces()
            .into_iter()
            .map(|name| read_ddclient_cache(&self.layout.cache_file(&name), &name))
            .collect();
        DynamicState { interfaces }
    }

    /// Restart the update daemon of `interface`; `None` when it is not
    /// configured on this instance.
    pub fn restart_interface(&self, interface: &str) -> Option<Result<(), ProcessError>> {
        let process = self.inner.lock().units.get(interface)?.process.clone();
        Some(request(process.as_ref(), Action::Restart))
    }
}

impl Instance for DynamicInstance {
    type Config = DynamicConfig;

    fn set(&self, config: Option<&DynamicConfig>) -> Result<(), SyncError> {
        DynamicInstance::set(self, config)
    }
}
