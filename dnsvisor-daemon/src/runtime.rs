use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;

use dnsvisor_core::{ConfigTree, Settings};
use dnsvisor_process::{NamespaceEvent, NamespaceHub, ServiceManager, Systemctl, VrfListCommand};
use dnsvisor_sync::{ApplyReport, DnsService, ProcessWiring, RpcError};

use crate::error::{io_err, DaemonError};
use crate::protocol::{DaemonRequest, DaemonResponse};

/// Set to `1` to log JSON lines instead of human-readable text.
pub const LOG_JSON_ENV: &str = "DNSVISOR_LOG_JSON";

/// Payload of the `status` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub running: bool,
    pub pid: u32,
    pub started_at_unix: u64,
    pub socket: String,
    pub config_version: u64,
    pub forwarding_instances: Vec<String>,
    pub dynamic_instances: Vec<String>,
    /// Routing instances announced present through `namespace-added`.
    pub namespaces: Vec<String>,
    pub exit_on_clear: bool,
}

/// Everything a socket client can reach.
struct DaemonContext {
    settings: Settings,
    service: Arc<DnsService>,
    hub: NamespaceHub,
    shutdown: broadcast::Sender<()>,
    started_at_unix: u64,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(settings: Settings) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(settings))
}

/// Run the daemon against the system's `systemctl`.
pub async fn run(settings: Settings) -> Result<(), DaemonError> {
    let services: Arc<dyn ServiceManager> = Arc::new(Systemctl::new(&settings.systemctl));
    serve(settings, services).await
}

/// Run the daemon with an explicit service manager.
pub async fn serve(settings: Settings, services: Arc<dyn ServiceManager>) -> Result<(), DaemonError> {
    settings.validate()?;

    let hub = match &settings.vrf_list_command {
        Some(program) => NamespaceHub::with_checker(VrfListCommand::new(program)),
        None => NamespaceHub::new(),
    };
    let wiring = ProcessWiring::new(services, Some(Arc::new(hub.clone())));
    let service = Arc::new(DnsService::new(settings.clone(), wiring)?);

    let replay = service.clone();
    match tokio::task::spawn_blocking(move || replay.load_cache())
        .await
        .map_err(|err| DaemonError::Protocol(format!("cache replay join error: {err}")))?
    {
        Some(report) => tracing::info!(
            forwarding = report.forwarding.created.len(),
            dynamic = report.dynamic.created.len(),
            clean = report.is_clean(),
            "configuration cache replayed",
        ),
        None => tracing::info!("starting with empty configuration"),
    }

    let (shutdown_tx, _) = broadcast::channel::<()>(16);
    let ctx = Arc::new(DaemonContext {
        settings,
        service,
        hub,
        shutdown: shutdown_tx.clone(),
        started_at_unix: unix_seconds_now(),
    });

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let result = socket_server_task(ctx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move { signal_task(shutdown).await })
    };

    let (socket_result, signal_result) = tokio::join!(socket_handle, signal_handle);

    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("daemon stopped");
    Ok(())
}

async fn signal_task(shutdown: broadcast::Sender<()>) -> Result<(), DaemonError> {
    let mut shutdown_rx = shutdown.subscribe();
    let mut terminate =
        signal(SignalKind::terminate()).map_err(|e| io_err("SIGTERM handler", e))?;
    tokio::select! {
        _ = shutdown_rx.recv() => Ok(()),
        _ = terminate.recv() => {
            tracing::info!("received SIGTERM, shutting down daemon");
            let _ = shutdown.send(());
            Ok(())
        }
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => {
                    tracing::info!("received ctrl-c, shutting down daemon");
                    let _ = shutdown.send(());
                    Ok(())
                }
                Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
            }
        }
    }
}

async fn socket_server_task(
    ctx: Arc<DaemonContext>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = ctx.settings.socket_path.clone();
    if let Some(dir) = socket.parent() {
        fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "control socket listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, ctx).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(stream: UnixStream, ctx: Arc<DaemonContext>) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let cmd = request.cmd.clone();
        let response = dispatch(&ctx, request).await;
        write_response(&mut writer, &response).await?;

        let stopping = cmd == "stop" || (cmd == "clear" && ctx.settings.exit_on_clear);
        if stopping {
            tracing::info!(cmd = %cmd, "shutdown requested over control socket");
            let _ = ctx.shutdown.send(());
            break;
        }
    }

    Ok(())
}

async fn dispatch(ctx: &DaemonContext, request: DaemonRequest) -> DaemonResponse {
    let DaemonRequest {
        cmd,
        instance,
        interface,
        namespace,
        config,
    } = request;
    tracing::debug!(cmd = %cmd, "control request");

    match cmd.as_str() {
        "status" => DaemonResponse::ok(json!(status_summary(ctx))),
        "config" => DaemonResponse::ok(json!(*ctx.service.get())),
        "apply" => match config {
            Some(tree) => match tree.validate() {
                Ok(()) => apply(ctx, Some(tree)).await,
                Err(err) => DaemonResponse::error(err.to_string()),
            },
            None => DaemonResponse::error("apply requires a configuration tree"),
        },
        "clear" => apply(ctx, None).await,
        "state" => match blocking(&ctx.service, |service| service.state()).await {
            Ok(state) => DaemonResponse::ok(json!(state)),
            Err(err) => DaemonResponse::error(err.to_string()),
        },
        "reset-forwarding" => {
            let result =
                blocking(&ctx.service, move |service| service.reset_forwarding(instance.as_deref())).await;
            rpc_response(result, json!({ "reset": "forwarding" }))
        }
        "reset-forwarding-cache" => {
            let result = blocking(&ctx.service, move |service| {
                service.reset_forwarding_cache(instance.as_deref())
            })
            .await;
            rpc_response(result, json!({ "reset": "forwarding-cache" }))
        }
        "update-dynamic-interface" => match interface {
            Some(interface) => {
                let data = json!({ "interface": interface });
                let result = blocking(&ctx.service, move |service| {
                    service.update_dynamic_interface(&interface)
                })
                .await;
                rpc_response(result, data)
            }
            None => DaemonResponse::error("update-dynamic-interface requires an interface"),
        },
        "namespace-added" | "namespace-removed" => match namespace {
            Some(name) => publish_namespace(ctx, &cmd, name).await,
            None => DaemonResponse::error(format!("{cmd} requires a namespace")),
        },
        "stop" => DaemonResponse::ok(json!({ "stopping": true })),
        other => DaemonResponse::error(format!("unknown command '{other}'")),
    }
}

async fn apply(ctx: &DaemonContext, tree: Option<ConfigTree>) -> DaemonResponse {
    match blocking(&ctx.service, move |service| service.set(tree)).await {
        Ok(report) => apply_response(&report),
        Err(err) => DaemonResponse::error(err.to_string()),
    }
}

fn apply_response(report: &ApplyReport) -> DaemonResponse {
    if report.is_clean() {
        return DaemonResponse::ok(json!(report));
    }
    let failed = report.forwarding.failures.len() + report.dynamic.failures.len();
    DaemonResponse {
        data: Some(json!(report)),
        ..DaemonResponse::error(format!("{failed} instance update(s) failed"))
    }
}

async fn publish_namespace(ctx: &DaemonContext, cmd: &str, name: String) -> DaemonResponse {
    let event = if cmd == "namespace-added" {
        NamespaceEvent::Added(name.clone())
    } else {
        NamespaceEvent::Removed(name.clone())
    };
    let hub = ctx.hub.clone();
    // Subscribers may run deferred unit actions.
    match tokio::task::spawn_blocking(move || hub.publish(event)).await {
        Ok(()) => DaemonResponse::ok(json!({ "namespace": name })),
        Err(err) => DaemonResponse::error(format!("namespace publish join error: {err}")),
    }
}

fn rpc_response(result: Result<Result<(), RpcError>, DaemonError>, data: Value) -> DaemonResponse {
    match result {
        Ok(Ok(())) => DaemonResponse::ok(data),
        Ok(Err(RpcError::NotConfigured { path, message })) => {
            DaemonResponse::not_configured(path, message)
        }
        Ok(Err(err)) => DaemonResponse::error(err.to_string()),
        Err(err) => DaemonResponse::error(err.to_string()),
    }
}

/// Run a service call on the blocking pool; every service operation may
/// shell out or wait on the filesystem.
async fn blocking<T, F>(service: &Arc<DnsService>, f: F) -> Result<T, DaemonError>
where
    T: Send + 'static,
    F: FnOnce(&DnsService) -> T + Send + 'static,
{
    let service = service.clone();
    tokio::task::spawn_blocking(move || f(&service))
        .await
        .map_err(|err| DaemonError::Protocol(format!("service task join error: {err}")))
}

fn status_summary(ctx: &DaemonContext) -> StatusSummary {
    let service = &ctx.service;
    StatusSummary {
        running: true,
        pid: std::process::id(),
        started_at_unix: ctx.started_at_unix,
        socket: ctx.settings.socket_path.display().to_string(),
        config_version: service.config_version(),
        forwarding_instances: service
            .forwarding_instances()
            .keys()
            .map(|name| name.to_string())
            .collect(),
        dynamic_instances: service
            .dynamic_instances()
            .keys()
            .map(|name| name.to_string())
            .collect(),
        namespaces: ctx.hub.present(),
        exit_on_clear: ctx.settings.exit_on_clear,
    }
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var(LOG_JSON_ENV).map(|v| v == "1").unwrap_or(false);
    let _ = if json {
        fmt().json().with_env_filter(filter).with_target(false).try_init()
    } else {
        fmt().with_env_filter(filter).with_target(false).try_init()
    };
}

fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dnsvisor_core::{ForwardingConfig, InstanceName, RoutingInstanceConfig};
    use dnsvisor_process::{ServiceError, Signal};
    use parking_lot::Mutex;
    use tempfile::TempDir;

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

    fn context(root: &TempDir, calls: Arc<Calls>) -> DaemonContext {
        let mut settings = Settings::rooted(root.path());
        settings.snapshot_timeout_ms = 100;
        let hub = NamespaceHub::new();
        let wiring = ProcessWiring::new(calls, Some(Arc::new(hub.clone())));
        let service = DnsService::new(settings.clone(), wiring).expect("service");
        let (shutdown, _) = broadcast::channel(1);
        DaemonContext {
            settings,
            service: Arc::new(service),
            hub,
            shutdown,
            started_at_unix: 1_000_000,
        }
    }

    fn tree() -> ConfigTree {
        ConfigTree {
            forwarding: Some(ForwardingConfig {
                name_servers: vec!["192.0.2.1".to_string()],
                ..ForwardingConfig::default()
            }),
            dynamic: None,
            routing_instances: vec![RoutingInstanceConfig {
                name: InstanceName::from("blue"),
                forwarding: Some(ForwardingConfig::default()),
                dynamic: None,
            }],
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn apply_then_status_lists_instances() {
        let root = TempDir::new().expect("root");
        let ctx = context(&root, Arc::new(Calls::default()));

        let response = dispatch(&ctx, DaemonRequest::new("apply").with_config(tree())).await;
        assert!(response.ok, "{response:?}");

        let response = dispatch(&ctx, DaemonRequest::new("status")).await;
        let status: StatusSummary =
            serde_json::from_value(response.data.expect("data")).expect("status");
        assert_eq!(status.started_at_unix, 1_000_000);
        assert_eq!(status.config_version, 1);
        assert_eq!(status.forwarding_instances, vec!["blue", "default"]);
        assert!(status.dynamic_instances.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn namespace_added_releases_deferred_restart() {
        let root = TempDir::new().expect("root");
        let calls = Arc::new(Calls::default());
        let ctx = context(&root, calls.clone());

        dispatch(&ctx, DaemonRequest::new("apply").with_config(tree())).await;
        assert!(!calls.0.lock().iter().any(|c| c == "restart dnsmasq@blue.service"));

        let response = dispatch(&ctx, DaemonRequest::new("namespace-added").with_namespace("blue")).await;
        assert!(response.ok);
        assert_eq!(ctx.hub.present(), vec!["blue"]);
        // The deferred restart runs on the gate's own thread.
        let restarted = || calls.0.lock().iter().any(|c| c == "restart dnsmasq@blue.service");
        for _ in 0..250 {
            if restarted() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(restarted());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_instance_is_reported_with_path() {
        let root = TempDir::new().expect("root");
        let ctx = context(&root, Arc::new(Calls::default()));

        let response = dispatch(
            &ctx,
            DaemonRequest::new("reset-forwarding-cache").with_instance(Some("red".to_string())),
        )
        .await;
        assert!(!response.ok);
        assert_eq!(response.kind.as_deref(), Some("not-configured"));
        assert_eq!(response.path.as_deref(), Some("/routing-instance/red"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn malformed_commands_are_rejected() {
        let root = TempDir::new().expect("root");
        let ctx = context(&root, Arc::new(Calls::default()));

        for request in [
            DaemonRequest::new("apply"),
            DaemonRequest::new("update-dynamic-interface"),
            DaemonRequest::new("namespace-removed"),
            DaemonRequest::new("reboot"),
        ] {
            let response = dispatch(&ctx, request).await;
            assert!(!response.ok);
            assert!(response.error.is_some());
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn apply_refuses_reserved_routing_instance_name() {
        let root = TempDir::new().expect("root");
        let ctx = context(&root, Arc::new(Calls::default()));
        let mut invalid = tree();
        invalid.routing_instances[0].name = InstanceName::from("default");

        let response = dispatch(&ctx, DaemonRequest::new("apply").with_config(invalid)).await;
        assert!(!response.ok);
        assert!(response.error.expect("error").contains("reserved"));
        assert_eq!(ctx.service.config_version(), 0);
        assert!(!ctx.settings.config_cache.exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn clear_empties_config() {
        let root = TempDir::new().expect("root");
        let ctx = context(&root, Arc::new(Calls::default()));
        dispatch(&ctx, DaemonRequest::new("apply").with_config(tree())).await;

        let response = dispatch(&ctx, DaemonRequest::new("clear")).await;
        assert!(response.ok);
        let response = dispatch(&ctx, DaemonRequest::new("config")).await;
        assert_eq!(response.data, Some(json!({})));
    }

    #[test]
    fn live_socket_is_not_replaced() {
        let root = TempDir::new().expect("root");
        let socket = root.path().join("live.sock");
        let _listener = std::os::unix::net::UnixListener::bind(&socket).expect("bind");
        let err = prepare_socket_for_bind(&socket).unwrap_err();
        assert!(matches!(err, DaemonError::Protocol(_)));
    }

    #[test]
    fn stale_socket_is_removed() {
        let root = TempDir::new().expect("root");
        let socket = root.path().join("stale.sock");
        drop(std::os::unix::net::UnixListener::bind(&socket).expect("bind"));
        assert!(socket.exists());
        prepare_socket_for_bind(&socket).expect("prepare");
        assert!(!socket.exists());
    }
}
