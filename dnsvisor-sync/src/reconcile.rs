//! Maps a declared `name → configuration` set onto live instances.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use dnsvisor_core::{InstanceName, Versioned};

use crate::error::SyncError;

/// A configuration sink. `set(None)` tears everything down.
pub trait Instance: Send + Sync {
    type Config: Clone + PartialEq + Send + Sync;

    fn set(&self, config: Option<&Self::Config>) -> Result<(), SyncError>;
}

/// Creates the instance for a name the first time it is declared.
pub trait InstanceFactory: Send + Sync {
    type Instance: Instance;

    fn create(&self, name: &InstanceName) -> Result<Self::Instance, SyncError>;
}

type ConfigOf<F> = <<F as InstanceFactory>::Instance as Instance>::Config;
type LiveMap<F> = BTreeMap<InstanceName, Arc<<F as InstanceFactory>::Instance>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceFailure {
    pub instance: InstanceName,
    pub error: String,
}

/// What one reconciliation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub created: Vec<InstanceName>,
    pub updated: Vec<InstanceName>,
    pub removed: Vec<InstanceName>,
    pub failures: Vec<InstanceFailure>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, instance: &InstanceName, error: &SyncError) {
        tracing::error!(instance = %instance, error = %error, "instance update failed");
        self.failures.push(InstanceFailure {
            instance: instance.clone(),
            error: error.to_string(),
        });
    }
}

/// Live instance set, replaced wholesale after each pass.
pub struct Reconciler<F: InstanceFactory> {
    label: &'static str,
    factory: F,
    write: Mutex<()>,
    live: RwLock<Versioned<LiveMap<F>>>,
}

impl<F: InstanceFactory> Reconciler<F> {
    pub fn new(label: &'static str, factory: F) -> Self {
        Self {
            label,
            factory,
            write: Mutex::new(()),
            live: RwLock::new(Versioned::new(BTreeMap::new())),
        }
    }

    /// Complete live set as of the last pass.
    pub fn instances(&self) -> Arc<LiveMap<F>> {
        self.live.read().value()
    }

    pub fn get(&self, name: &InstanceName) -> Option<Arc<F::Instance>> {
        self.instances().get(name).cloned()
    }

    pub fn version(&self) -> u64 {
        self.live.read().version()
    }

    /// Bring the live set in line with `declared`.
    ///
    /// Removed names are torn down first; every declared name then receives
    /// its configuration. Failures are collected and never abort the pass.
    pub fn reconcile(&self, declared: &BTreeMap<InstanceName, ConfigOf<F>>) -> ReconcileReport {
        let _write = self.write.lock();
        let current = self.instances();
        let mut report = ReconcileReport::default();

        for (name, instance) in current.iter() {
            if declared.contains_key(name) {
                continue;
            }
            if let Err(e) = instance.set(None) {
                report.fail(name, &e);
            }
            report.removed.push(name.clone());
        }

        let mut next: LiveMap<F> = BTreeMap::new();
        for (name, config) in declared {
            let instance = match current.get(name) {
                Some(existing) => {
                    report.updated.push(name.clone());
                    existing.clone()
                }
                None => match self.factory.create(name) {
                    Ok(created) => {
                        report.created.push(name.clone());
                        Arc::new(created)
                    }
                    Err(e) => {
                        report.fail(name, &e);
                        continue;
                    }
                },
            };
            if let Err(e) = instance.set(Some(config)) {
                report.fail(name, &e);
            }
            next.insert(name.clone(), instance);
        }

        self.live.write().replace(next);
        tracing::debug!(
            reconciler = self.label,
            created = report.created.len(),
            updated = report.updated.len(),
            removed = report.removed.len(),
            failed = report.failures.len(),
            "reconciled",
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Sink(Mutex<Vec<Option<u32>>>);

    impl Instance for Sink {
        type Config = u32;
        fn set(&self, config: Option<&u32>) -> Result<(), SyncError> {
            self.0.lock().push(config.copied());
            Ok(())
        }
    }

    struct Factory;

    impl InstanceFactory for Factory {
        type Instance = Sink;
        fn create(&self, _name: &InstanceName) -> Result<Sink, SyncError> {
            Ok(Sink::default())
        }
    }

    #[test]
    fn live_set_version_advances_per_pass() {
        let reconciler = Reconciler::new("test", Factory);
        assert_eq!(reconciler.version(), 0);
        let declared = BTreeMap::from([(InstanceName::from("blue"), 1)]);
        reconciler.reconcile(&declared);
        reconciler.reconcile(&declared);
        assert_eq!(reconciler.version(), 2);
        let blue = reconciler.get(&InstanceName::from("blue")).unwrap();
        assert_eq!(*blue.0.lock(), vec![Some(1), Some(1)]);
    }
}
