//! Chooses the process variant for each instance.

use std::sync::Arc;

use dnsvisor_core::InstanceName;
use dnsvisor_process::{
    Action, DirectProcess, Dispatch, ManagedProcess, NamespaceAvailability, ProcessError,
    ServiceManager, VrfGatedProcess,
};

/// Builds the [`ManagedProcess`] for a unit of a given instance.
///
/// The default instance, and every instance when no namespace source is
/// configured, gets a [`DirectProcess`]. Routing instances get a
/// [`VrfGatedProcess`] around one.
#[derive(Clone)]
pub struct ProcessWiring {
    services: Arc<dyn ServiceManager>,
    namespaces: Option<Arc<dyn NamespaceAvailability>>,
}

impl ProcessWiring {
    pub fn new(
        services: Arc<dyn ServiceManager>,
        namespaces: Option<Arc<dyn NamespaceAvailability>>,
    ) -> Self {
        Self {
            services,
            namespaces,
        }
    }

    pub fn process(
        &self,
        instance: &InstanceName,
        unit: &str,
    ) -> Result<Arc<dyn ManagedProcess>, ProcessError> {
        let direct: Arc<dyn ManagedProcess> =
            Arc::new(DirectProcess::new(unit, self.services.clone()));
        match &self.namespaces {
            Some(namespaces) if !instance.is_default() => {
                let gated = VrfGatedProcess::new(instance.as_str(), namespaces.as_ref(), direct)?;
                Ok(Arc::new(gated))
            }
            _ => Ok(direct),
        }
    }
}

/// Dispatch `action` without waiting for a namespace to appear.
///
/// A deferred action still runs once the namespace is added; only the
/// result is not observed here.
pub(crate) fn request(process: &dyn ManagedProcess, action: Action) -> Result<(), ProcessError> {
    match process.dispatch(action) {
        Dispatch::Done(result) => result,
        Dispatch::Deferred(_) => {
            tracing::info!(unit = %process.unit(), %action, "namespace absent, action deferred");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dnsvisor_process::{NamespaceEvent, NamespaceHub, ServiceError, Signal};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Calls(Mutex<Vec<String>>);

    impl Calls {
        fn record(&self, verb: &str, unit: &str) -> Result<(), ServiceError> {
            self.0.lock().push(format!("{verb} {unit}"));
            Ok(())
        }
    }

    impl ServiceManager for Calls {
        fn start(&self, unit: &str) -> Result<(), ServiceError> {
            self.record("start", unit)
        }
        fn stop(&self, unit: &str) -> Result<(), ServiceError> {
            self.record("stop", unit)
        }
        fn reload(&self, unit: &str) -> Result<(), ServiceError> {
            self.record("reload", unit)
        }
        fn restart(&self, unit: &str) -> Result<(), ServiceError> {
            self.record("restart", unit)
        }
        fn signal(&self, unit: &str, signal: Signal) -> Result<(), ServiceError> {
            self.record(signal.as_str(), unit)
        }
    }

    #[test]
    fn default_instance_is_never_gated() {
        let calls = Arc::new(Calls::default());
        let hub = NamespaceHub::new();
        let wiring = ProcessWiring::new(calls.clone(), Some(Arc::new(hub)));
        let process = wiring
            .process(&InstanceName::default_instance(), "dnsmasq@default.service")
            .unwrap();
        assert!(matches!(process.dispatch(Action::Restart), Dispatch::Done(Ok(()))));
        assert_eq!(*calls.0.lock(), vec!["restart dnsmasq@default.service"]);
    }

    #[test]
    fn routing_instance_defers_until_namespace_exists() {
        let calls = Arc::new(Calls::default());
        let hub = NamespaceHub::new();
        let wiring = ProcessWiring::new(calls.clone(), Some(Arc::new(hub.clone())));
        let process = wiring
            .process(&InstanceName::from("blue"), "dnsmasq@blue.service")
            .unwrap();

        request(process.as_ref(), Action::Restart).unwrap();
        assert!(calls.0.lock().is_empty());

        hub.publish(NamespaceEvent::Added("blue".to_string()));
        // The deferred restart runs on the gate's own thread.
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while calls.0.lock().is_empty() && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert_eq!(*calls.0.lock(), vec!["restart dnsmasq@blue.service"]);
    }

    #[test]
    fn without_namespace_source_everything_is_direct() {
        let calls = Arc::new(Calls::default());
        let wiring = ProcessWiring::new(calls.clone(), None);
        let process = wiring
            .process(&InstanceName::from("blue"), "dnsmasq@blue.service")
            .unwrap();
        request(process.as_ref(), Action::Reload).unwrap();
        assert_eq!(*calls.0.lock(), vec!["reload dnsmasq@blue.service"]);
    }
}
