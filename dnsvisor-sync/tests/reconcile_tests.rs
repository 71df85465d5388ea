use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

use dnsvisor_core::InstanceName;
use dnsvisor_sync::{Instance, InstanceFactory, Reconciler, SyncError};

/// Remembers every configuration it was handed; refuses `fail`.
#[derive(Default)]
struct Sink {
    seen: Mutex<Vec<Option<String>>>,
}

impl Instance for Sink {
    type Config = String;

    fn set(&self, config: Option<&String>) -> Result<(), SyncError> {
        self.seen.lock().push(config.cloned());
        if config.map(String::as_str) == Some("fail") {
            return Err(SyncError::Io {
                path: "/dev/null".into(),
                source: io::Error::new(io::ErrorKind::Other, "refused"),
            });
        }
        Ok(())
    }
}

/// Creates sinks, except for instances named `broken`.
#[derive(Default)]
struct Factory {
    created: Arc<Mutex<Vec<InstanceName>>>,
}

impl InstanceFactory for Factory {
    type Instance = Sink;

    fn create(&self, name: &InstanceName) -> Result<Sink, SyncError> {
        if name.as_str() == "broken" {
            return Err(SyncError::Io {
                path: "/dev/null".into(),
                source: io::Error::new(io::ErrorKind::Other, "cannot create"),
            });
        }
        self.created.lock().push(name.clone());
        Ok(Sink::default())
    }
}

fn declared(pairs: &[(&str, &str)]) -> BTreeMap<InstanceName, String> {
    pairs
        .iter()
        .map(|(name, conf)| (InstanceName::from(*name), conf.to_string()))
        .collect()
}

fn names(list: &[InstanceName]) -> Vec<&str> {
    list.iter().map(InstanceName::as_str).collect()
}

#[test]
fn create_update_remove() {
    let created = Arc::new(Mutex::new(Vec::new()));
    let reconciler = Reconciler::new(
        "test",
        Factory {
            created: created.clone(),
        },
    );

    let report = reconciler.reconcile(&declared(&[("default", "a"), ("blue", "b")]));
    assert_eq!(names(&report.created), vec!["blue", "default"]);
    assert!(report.updated.is_empty());
    assert!(report.is_clean());

    let blue = reconciler.get(&InstanceName::from("blue")).expect("blue live");
    let report = reconciler.reconcile(&declared(&[("default", "a2")]));
    assert_eq!(names(&report.updated), vec!["default"]);
    assert_eq!(names(&report.removed), vec!["blue"]);
    assert!(reconciler.get(&InstanceName::from("blue")).is_none());
    assert_eq!(*blue.seen.lock(), vec![Some("b".to_string()), None]);

    let default = reconciler
        .get(&InstanceName::default_instance())
        .expect("default live");
    assert_eq!(
        *default.seen.lock(),
        vec![Some("a".to_string()), Some("a2".to_string())]
    );
    // Reused, never recreated.
    assert_eq!(created.lock().len(), 2);
}

#[test]
fn failures_are_collected_and_the_pass_continues() {
    let reconciler = Reconciler::new("test", Factory::default());

    let report = reconciler.reconcile(&declared(&[
        ("broken", "x"),
        ("green", "fail"),
        ("red", "ok"),
    ]));

    let failed: Vec<&str> = report.failures.iter().map(|f| f.instance.as_str()).collect();
    assert_eq!(failed, vec!["broken", "green"]);
    assert!(!report.is_clean());
    assert!(reconciler.get(&InstanceName::from("broken")).is_none());
    // A sink that failed its update stays live so the next pass can retry.
    assert!(reconciler.get(&InstanceName::from("green")).is_some());
    assert!(reconciler.get(&InstanceName::from("red")).is_some());
}

#[test]
fn empty_declaration_tears_everything_down() {
    let reconciler = Reconciler::new("test", Factory::default());
    reconciler.reconcile(&declared(&[("blue", "b"), ("red", "r")]));
    let version = reconciler.version();

    let report = reconciler.reconcile(&BTreeMap::new());
    assert_eq!(names(&report.removed), vec!["blue", "red"]);
    assert!(reconciler.instances().is_empty());
    assert_eq!(reconciler.version(), version + 1);
}
