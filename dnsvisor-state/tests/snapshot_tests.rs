//! Signal-and-wait snapshot protocol against a fake daemon.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dnsvisor_core::{ForwardingLayout, InstanceName, Provenance, Settings};
use dnsvisor_process::{
    Action, Dispatch, ManagedProcess, NamespaceHub, Signal, VrfGatedProcess,
};
use dnsvisor_state::SnapshotCoordinator;

const DUMP: &str = "\
Jul 23 11:57:35 dnsmasq[1]: cache size 150, 10/20 cache insertions re-used unexpired cache entries.
Jul 23 11:57:35 dnsmasq[1]: queries forwarded 7, queries answered locally 3
Jul 23 11:57:35 dnsmasq[1]: server 10.0.0.1#53: queries sent 5, retried or failed 1
";

/// Writes `dump` to the state file whenever it is asked for statistics.
struct FakeDaemon {
    state_file: PathBuf,
    dump: Option<&'static str>,
    signals: AtomicUsize,
}

impl ManagedProcess for FakeDaemon {
    fn unit(&self) -> &str {
        "dnsmasq@blue.service"
    }

    fn dispatch(&self, action: Action) -> Dispatch {
        if action == Action::Signal(Signal::SIGUSR1) {
            self.signals.fetch_add(1, Ordering::SeqCst);
            if let Some(dump) = self.dump {
                fs::write(&self.state_file, dump).expect("write dump");
            }
        }
        Dispatch::Done(Ok(()))
    }
}

/// Writes the dump in two bursts, holding the file open in between.
struct SlowDaemon {
    state_file: PathBuf,
}

impl ManagedProcess for SlowDaemon {
    fn unit(&self) -> &str {
        "dnsmasq@blue.service"
    }

    fn dispatch(&self, _action: Action) -> Dispatch {
        let path = self.state_file.clone();
        std::thread::spawn(move || {
            let (head, tail) = DUMP.split_at(DUMP.find('\n').expect("line") + 1);
            let mut file = fs::OpenOptions::new().append(true).create(true).open(path).expect("open");
            file.write_all(head.as_bytes()).expect("head");
            file.flush().expect("flush");
            std::thread::sleep(Duration::from_millis(30));
            file.write_all(tail.as_bytes()).expect("tail");
        });
        Dispatch::Done(Ok(()))
    }
}

fn fixture(dump: Option<&'static str>) -> (tempfile::TempDir, ForwardingLayout, Arc<FakeDaemon>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = Settings::rooted(dir.path());
    let layout = ForwardingLayout::for_instance(&settings, &InstanceName::from("blue"));
    fs::create_dir_all(&layout.instance_dir).expect("mkdir");
    fs::write(&layout.resolv_file, "nameserver 10.0.0.1\nnameserver 10.0.0.2\n").expect("resolv");
    fs::write(&layout.conf_file, "server=/corp/10.0.0.9\t# domain-override\n").expect("conf");
    let daemon = Arc::new(FakeDaemon {
        state_file: layout.state_file.clone(),
        dump,
        signals: AtomicUsize::new(0),
    });
    (dir, layout, daemon)
}

#[test]
fn fresh_dump_is_parsed_and_attributed() {
    let (_dir, layout, daemon) = fixture(Some(DUMP));
    let coordinator = SnapshotCoordinator::new(daemon.clone(), layout, Duration::from_secs(5));

    let state = coordinator.snapshot();
    assert_eq!(daemon.signals.load(Ordering::SeqCst), 1);
    assert_eq!(coordinator.version(), 1);
    assert_eq!(state.cache.size, 150);
    assert_eq!(state.queries_forwarded, 7);

    let addrs: Vec<(&str, Provenance)> = state
        .nameservers
        .iter()
        .map(|r| (r.address.as_str(), r.provenance))
        .collect();
    assert_eq!(
        addrs,
        vec![
            ("10.0.0.1", Provenance::System),
            ("10.0.0.2", Provenance::System),
            ("10.0.0.9", Provenance::Configuration),
        ]
    );
    assert_eq!(state.nameservers[0].queries_sent, 5);
    assert!(state.nameservers[2].domain_override_only);
}

#[test]
fn dump_is_read_once_the_writer_closes_it() {
    let (_dir, layout, _daemon) = fixture(None);
    let daemon = Arc::new(SlowDaemon {
        state_file: layout.state_file.clone(),
    });
    let coordinator = SnapshotCoordinator::new(daemon, layout, Duration::from_secs(5));

    let state = coordinator.snapshot();
    assert_eq!(state.cache.size, 150);
    assert_eq!(state.queries_forwarded, 7);
    assert_eq!(state.nameservers[0].queries_sent, 5);
}

#[test]
fn timeout_returns_previous_snapshot() {
    let (_dir, layout, daemon) = fixture(None);
    let coordinator = SnapshotCoordinator::new(daemon.clone(), layout, Duration::from_millis(150));

    let started = Instant::now();
    let state = coordinator.snapshot();
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert_eq!(daemon.signals.load(Ordering::SeqCst), 1);
    assert_eq!(coordinator.version(), 0);
    assert_eq!(*state, Default::default());
}

#[test]
fn absent_namespace_returns_cached_without_waiting() {
    let (_dir, layout, daemon) = fixture(Some(DUMP));
    let hub = NamespaceHub::new();
    let gated: Arc<dyn ManagedProcess> =
        Arc::new(VrfGatedProcess::new("blue", &hub, daemon.clone()).expect("gate"));
    let coordinator = SnapshotCoordinator::new(gated, layout, Duration::from_secs(5));

    let started = Instant::now();
    let state = coordinator.snapshot();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(daemon.signals.load(Ordering::SeqCst), 0);
    assert_eq!(*state, Default::default());
}

#[test]
fn missing_state_file_still_completes() {
    let (_dir, layout, daemon) = fixture(Some(DUMP));
    assert!(!layout.state_file.exists());
    let coordinator = SnapshotCoordinator::new(daemon, layout.clone(), Duration::from_secs(5));
    let state = coordinator.snapshot();
    assert_eq!(state.queries_answered, 3);
    assert!(layout.state_file.exists());
}
