//! Template contexts: serializable rendering payloads built from layouts and
//! declared configuration.

use serde::Serialize;

use dnsvisor_core::{DomainOverride, DynamicInterface, DynamicLayout, ForwardingConfig, ForwardingLayout};

use crate::error::RenderError;

fn path_str(path: &std::path::Path) -> String {
    path.display().to_string()
}

/// Payload for `dnsmasq.conf`.
#[derive(Debug, Clone, Serialize)]
pub struct ForwardingContext {
    pub state_file: String,
    pub conf_file: String,
    pub conf_dir: String,
    pub conf_dir_pattern: String,
    pub resolv_file: String,
    pub hosts_file: String,
    pub listen_on: Vec<String>,
    pub cache_size: u32,
    pub name_servers: Vec<String>,
    pub domain_overrides: Vec<DomainOverride>,
    /// Upstreams come from configuration; the resolver list is not read.
    pub use_config_nameservers: bool,
}

impl ForwardingContext {
    pub fn new(layout: &ForwardingLayout, conf: &ForwardingConfig) -> Self {
        Self {
            state_file: path_str(&layout.state_file),
            conf_file: path_str(&layout.conf_file),
            conf_dir: path_str(&layout.conf_dir),
            conf_dir_pattern: layout.conf_dir_pattern().to_string(),
            resolv_file: path_str(&layout.resolv_file),
            hosts_file: path_str(&layout.hosts_file),
            listen_on: conf.listen_on.clone(),
            cache_size: conf.cache_size,
            name_servers: conf.name_servers.clone(),
            domain_overrides: conf.domain_overrides.clone(),
            use_config_nameservers: conf.nameservers_from_config(),
        }
    }
}

/// Payload for `dnsmasq.env`.
#[derive(Debug, Clone, Serialize)]
pub struct ForwardingEnvContext {
    pub pid_file: String,
    pub conf_file: String,
}

impl ForwardingEnvContext {
    pub fn new(layout: &ForwardingLayout) -> Self {
        Self {
            pid_file: path_str(&layout.pid_file),
            conf_file: path_str(&layout.conf_file),
        }
    }
}

/// Payload for a `dnsmasq.d` nameserver fragment.
#[derive(Debug, Clone, Serialize)]
pub struct FragmentContext {
    /// Tag written after every line (`dhcp`, `system`).
    pub origin: String,
    pub nameservers: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceCtx {
    pub name: String,
    pub protocol: String,
    /// Empty when the provider default applies.
    pub server: String,
    pub login: String,
    pub password: String,
    pub host_names: Vec<String>,
}

/// ddclient protocol for a service whose protocol is not given explicitly.
pub fn default_protocol(service: &str) -> &str {
    match service {
        "dyndns" => "dyndns2",
        "dslreports" => "dslreports1",
        "afraid" => "freedns",
        other => other,
    }
}

/// Payload for `ddclient_<if>.conf` and its environment file.
#[derive(Debug, Clone, Serialize)]
pub struct DdclientContext {
    pub interface: String,
    pub config_file: String,
    pub cache_file: String,
    pub pid_file: String,
    pub services: Vec<ServiceCtx>,
}

impl DdclientContext {
    pub fn new(layout: &DynamicLayout, intf: &DynamicInterface) -> Self {
        let services = intf
            .services
            .iter()
            .map(|svc| ServiceCtx {
                name: svc.name.clone(),
                protocol: svc
                    .protocol
                    .clone()
                    .unwrap_or_else(|| default_protocol(&svc.name).to_string()),
                server: svc.server.clone().unwrap_or_default(),
                login: svc.login.clone(),
                password: svc.password.clone(),
                host_names: svc.host_names.clone(),
            })
            .collect();
        Self {
            interface: intf.name.clone(),
            config_file: path_str(&layout.config_file(&intf.name)),
            cache_file: path_str(&layout.cache_file(&intf.name)),
            pid_file: path_str(&layout.pid_file(&intf.name)),
            services,
        }
    }
}

pub(crate) fn to_tera_context<T: Serialize>(ctx: &T) -> Result<tera::Context, RenderError> {
    Ok(tera::Context::from_serialize(ctx)?)
}
