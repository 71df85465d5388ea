//! End-to-end control socket round trips against a served daemon.

use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::TempDir;

use dnsvisor_core::{ConfigTree, ForwardingConfig, Settings};
use dnsvisor_daemon::{
    request, request_status, request_stop, serve, DaemonError, DaemonRequest, StatusSummary,
};
use dnsvisor_process::{ServiceError, ServiceManager, Signal};

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

fn settings(root: &TempDir) -> Settings {
    let mut settings = Settings::rooted(root.path());
    settings.snapshot_timeout_ms = 100;
    settings
}

fn forwarding_tree() -> ConfigTree {
    ConfigTree {
        forwarding: Some(ForwardingConfig {
            name_servers: vec!["192.0.2.1".to_string()],
            ..ForwardingConfig::default()
        }),
        ..ConfigTree::default()
    }
}

/// Run a blocking client call off the runtime threads.
async fn client<T, F>(f: F) -> T
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(f).await.expect("client join")
}

#[tokio::test(flavor = "multi_thread")]
async fn status_apply_state_and_stop() {
    let root = TempDir::new().expect("root");
    let settings = settings(&root);
    let socket = settings.socket_path.clone();
    let calls = Arc::new(Calls::default());
    let daemon = tokio::spawn(serve(settings, calls.clone()));

    let path = socket.clone();
    let status = client(move || request_status(&path)).await.expect("status");
    let status: StatusSummary = serde_json::from_value(status).expect("summary");
    assert!(status.running);
    assert!(status.forwarding_instances.is_empty());
    let mode = std::fs::metadata(&socket).expect("socket").permissions().mode() & 0o777;
    assert_eq!(mode, 0o600);

    let path = socket.clone();
    let report = client(move || {
        request(&path, &DaemonRequest::new("apply").with_config(forwarding_tree()))
    })
    .await
    .expect("apply");
    assert_eq!(report["forwarding"]["created"], serde_json::json!(["default"]));
    assert!(calls.0.lock().iter().any(|c| c == "restart dnsmasq@default.service"));

    let path = socket.clone();
    let state = client(move || request(&path, &DaemonRequest::new("state")))
        .await
        .expect("state");
    assert!(state["default"]["forwarding"].is_object());

    let path = socket.clone();
    let err = client(move || {
        request(&path, &DaemonRequest::new("update-dynamic-interface").with_interface("dp0s3"))
    })
    .await
    .unwrap_err();
    match err {
        DaemonError::NotConfigured { path, .. } => assert_eq!(path, "/interface/dp0s3"),
        other => panic!("expected NotConfigured, got {other:?}"),
    }

    let path = socket.clone();
    client(move || request_stop(&path)).await.expect("stop");
    tokio::time::timeout(Duration::from_secs(5), daemon)
        .await
        .expect("daemon exits")
        .expect("join")
        .expect("clean exit");
    assert!(!socket.exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn cached_configuration_is_replayed_on_start() {
    let root = TempDir::new().expect("root");
    let settings = settings(&root);
    let socket = settings.socket_path.clone();

    let first = tokio::spawn(serve(settings.clone(), Arc::new(Calls::default())));
    let path = socket.clone();
    client(move || {
        request_status(&path)?;
        request(&path, &DaemonRequest::new("apply").with_config(forwarding_tree()))?;
        request_stop(&path)
    })
    .await
    .expect("first run");
    first.await.expect("join").expect("first exit");

    let second = tokio::spawn(serve(settings, Arc::new(Calls::default())));
    let path = socket.clone();
    let config = client(move || {
        request_status(&path)?;
        let config = request(&path, &DaemonRequest::new("config"))?;
        request_stop(&path)?;
        Ok::<_, DaemonError>(config)
    })
    .await
    .expect("second run");
    second.await.expect("join").expect("second exit");

    let replayed: ConfigTree = serde_json::from_value(config).expect("tree");
    assert_eq!(replayed, forwarding_tree());
}

#[tokio::test(flavor = "multi_thread")]
async fn clear_stops_daemon_when_exit_on_clear() {
    let root = TempDir::new().expect("root");
    let mut settings = settings(&root);
    settings.exit_on_clear = true;
    let socket = settings.socket_path.clone();
    let daemon = tokio::spawn(serve(settings, Arc::new(Calls::default())));

    let path = socket.clone();
    client(move || {
        request_status(&path)?;
        request(&path, &DaemonRequest::new("clear"))
    })
    .await
    .expect("clear");

    tokio::time::timeout(Duration::from_secs(5), daemon)
        .await
        .expect("daemon exits")
        .expect("join")
        .expect("clean exit");
}
