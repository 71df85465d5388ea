//! The top-level DNS service: configuration tree in, reconciled instances,
//! aggregate state out.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::Span;

use dnsvisor_core::{
    ConfigTree, DynamicLayout, ForwardingLayout, InstanceName, InstanceState, Settings,
    StateReport, Versioned,
};
use dnsvisor_renderer::Renderer;

use crate::dynamic::DynamicInstance;
use crate::error::{io_err, SyncError};
use crate::forwarding::ForwardingInstance;
use crate::reconcile::{InstanceFactory, ReconcileReport, Reconciler};
use crate::wiring::ProcessWiring;
use crate::writer::{atomic_write_mode, HashStore, PRIVATE_MODE};

pub struct ForwardingFactory {
    settings: Settings,
    wiring: ProcessWiring,
    renderer: Arc<Renderer>,
}

impl InstanceFactory for ForwardingFactory {
    type Instance = ForwardingInstance;

    fn create(&self, name: &InstanceName) -> Result<ForwardingInstance, SyncError> {
        let layout = ForwardingLayout::for_instance(&self.settings, name);
        let process = self.wiring.process(name, &layout.unit)?;
        Ok(ForwardingInstance::new(
            layout,
            process,
            self.renderer.clone(),
            self.settings.snapshot_timeout(),
        ))
    }
}

pub struct DynamicFactory {
    settings: Settings,
    wiring: ProcessWiring,
    renderer: Arc<Renderer>,
}

impl InstanceFactory for DynamicFactory {
    type Instance = DynamicInstance;

    fn create(&self, name: &InstanceName) -> Result<DynamicInstance, SyncError> {
        let layout = DynamicLayout::for_instance(&self.settings, name);
        Ok(DynamicInstance::new(layout, self.wiring.clone(), self.renderer.clone()))
    }
}

/// Outcome of applying a configuration tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub forwarding: ReconcileReport,
    pub dynamic: ReconcileReport,
}

impl ApplyReport {
    pub fn is_clean(&self) -> bool {
        self.forwarding.is_clean() && self.dynamic.is_clean()
    }
}

pub struct DnsService {
    cache_file: PathBuf,
    pub(crate) forwarding: Reconciler<ForwardingFactory>,
    pub(crate) dynamic: Reconciler<DynamicFactory>,
    config: RwLock<Versioned<ConfigTree>>,
    cache_hashes: Mutex<HashStore>,
    write: Mutex<()>,
    span: Span,
}

impl DnsService {
    pub fn new(settings: Settings, wiring: ProcessWiring) -> Result<Self, SyncError> {
        let renderer = Arc::new(Renderer::new()?);
        Ok(Self {
            cache_file: settings.config_cache.clone(),
            forwarding: Reconciler::new(
                "forwarding",
                ForwardingFactory {
                    settings: settings.clone(),
                    wiring: wiring.clone(),
                    renderer: renderer.clone(),
                },
            ),
            dynamic: Reconciler::new(
                "dynamic",
                DynamicFactory {
                    settings,
                    wiring,
                    renderer,
                },
            ),
            config: RwLock::new(Versioned::default()),
            cache_hashes: Mutex::new(HashStore::new()),
            write: Mutex::new(()),
            span: tracing::info_span!("dns_service"),
        })
    }

    /// Configuration tree last applied.
    pub fn get(&self) -> Arc<ConfigTree> {
        self.config.read().value()
    }

    pub fn config_version(&self) -> u64 {
        self.config.read().version()
    }

    /// Replace the whole configuration. `None` clears every instance.
    pub fn set(&self, tree: Option<ConfigTree>) -> ApplyReport {
        let _write = self.write.lock();
        let _enter = self.span.enter();
        let tree = tree.unwrap_or_default();

        self.config.write().replace(tree.clone());
        if let Err(e) = write_cache(&self.cache_file, &tree, &mut self.cache_hashes.lock()) {
            tracing::error!(path = %self.cache_file.display(), error = %e, "config cache write failed");
        }

        let report = ApplyReport {
            forwarding: self.forwarding.reconcile(&tree.forwarding_instances()),
            dynamic: self.dynamic.reconcile(&tree.dynamic_instances()),
        };
        tracing::info!(
            forwarding = self.forwarding.instances().len(),
            dynamic = self.dynamic.instances().len(),
            clean = report.is_clean(),
            "configuration applied",
        );
        report
    }

    /// Validate `tree` and apply it. A refused tree changes nothing.
    pub fn apply(&self, tree: ConfigTree) -> Result<ApplyReport, SyncError> {
        tree.validate()?;
        Ok(self.set(Some(tree)))
    }

    /// Apply the cached tree from a previous run. A missing or unreadable
    /// cache is logged and leaves the service empty.
    pub fn load_cache(&self) -> Option<ApplyReport> {
        match read_cache(&self.cache_file) {
            Ok(Some(tree)) => Some(self.set(Some(tree))),
            Ok(None) => {
                tracing::debug!(path = %self.cache_file.display(), "no config cache");
                None
            }
            Err(e) => {
                tracing::warn!(path = %self.cache_file.display(), error = %e, "config cache unreadable");
                None
            }
        }
    }

    /// Live state of every instance. Forwarding snapshots run concurrently.
    pub fn state(&self) -> StateReport {
        let forwarding = self.forwarding.instances();
        let dynamic = self.dynamic.instances();

        let mut states: BTreeMap<InstanceName, InstanceState> = BTreeMap::new();
        std::thread::scope(|scope| {
            let pending: Vec<_> = forwarding
                .iter()
                .map(|(name, instance)| (name, scope.spawn(move || instance.state())))
                .collect();
            for (name, handle) in pending {
                match handle.join() {
                    Ok(state) => {
                        states.entry(name.clone()).or_default().forwarding = Some((*state).clone());
                    }
                    Err(_) => tracing::error!(instance = %name, "state snapshot panicked"),
                }
            }
        });
        for (name, instance) in dynamic.iter() {
            states.entry(name.clone()).or_default().dynamic = Some(instance.status());
        }
        StateReport::from_instances(states)
    }

    pub fn forwarding_instances(&self) -> Arc<BTreeMap<InstanceName, Arc<ForwardingInstance>>> {
        self.forwarding.instances()
    }

    pub fn forwarding_instance(&self, name: &InstanceName) -> Option<Arc<ForwardingInstance>> {
        self.forwarding.get(name)
    }

    pub fn dynamic_instances(&self) -> Arc<BTreeMap<InstanceName, Arc<DynamicInstance>>> {
        self.dynamic.instances()
    }
}

fn read_cache(path: &Path) -> Result<Option<ConfigTree>, SyncError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(path, e)),
    };
    if text.trim().is_empty() {
        return Ok(None);
    }
    let tree: ConfigTree = serde_json::from_str(&text)?;
    tree.validate()?;
    Ok(Some(tree))
}

fn write_cache(path: &Path, tree: &ConfigTree, hashes: &mut HashStore) -> Result<(), SyncError> {
    let json = serde_json::to_string_pretty(tree)?;
    atomic_write_mode(path, &json, hashes, Some(PRIVATE_MODE))?;
    Ok(())
}
