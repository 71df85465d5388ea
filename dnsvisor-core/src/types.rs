//! Domain types for dnsvisor.
//!
//! Configuration types mirror the management-plane tree and use kebab-case
//! keys. State types are what the management plane reads back. Everything is
//! serde-serializable; the wire format is chosen by the caller.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Name of the instance that lives outside any routing instance.
pub const DEFAULT_INSTANCE: &str = "default";

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed name for a supervised instance (one per routing context).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceName(pub String);

impl InstanceName {
    /// The non-namespaced instance.
    pub fn default_instance() -> Self {
        Self(DEFAULT_INSTANCE.to_owned())
    }

    pub fn is_default(&self) -> bool {
        self.0 == DEFAULT_INSTANCE
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for InstanceName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for InstanceName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Declared configuration
// ---------------------------------------------------------------------------

fn default_cache_size() -> u32 {
    150
}

/// A domain whose queries go to a specific server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainOverride {
    pub domain: String,
    pub server: String,
}

/// DNS forwarding settings for one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ForwardingConfig {
    /// Interfaces whose DHCP-learned nameservers are forwarded to.
    #[serde(default, rename = "dhcp", skip_serializing_if = "Vec::is_empty")]
    pub dhcp_interfaces: Vec<String>,
    #[serde(default = "default_cache_size")]
    pub cache_size: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub listen_on: Vec<String>,
    #[serde(default, rename = "name-server", skip_serializing_if = "Vec::is_empty")]
    pub name_servers: Vec<String>,
    /// Forward to the system resolver list.
    #[serde(default)]
    pub system: bool,
    #[serde(default, rename = "domain", skip_serializing_if = "Vec::is_empty")]
    pub domain_overrides: Vec<DomainOverride>,
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            dhcp_interfaces: Vec::new(),
            cache_size: default_cache_size(),
            listen_on: Vec::new(),
            name_servers: Vec::new(),
            system: false,
            domain_overrides: Vec::new(),
        }
    }
}

impl ForwardingConfig {
    /// True when upstream nameservers come from configuration rather than
    /// from the instance's resolver file.
    pub fn nameservers_from_config(&self) -> bool {
        !self.dhcp_interfaces.is_empty() || !self.name_servers.is_empty() || self.system
    }
}

/// One dynamic DNS provider account on an interface.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DynamicService {
    pub name: String,
    #[serde(default, rename = "host-name")]
    pub host_names: Vec<String>,
    #[serde(default)]
    pub login: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

impl fmt::Debug for DynamicService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicService")
            .field("name", &self.name)
            .field("host_names", &self.host_names)
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .field("server", &self.server)
            .field("protocol", &self.protocol)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicInterface {
    pub name: String,
    #[serde(default, rename = "service")]
    pub services: Vec<DynamicService>,
}

/// Dynamic DNS update settings for one instance.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DynamicConfig {
    #[serde(default, rename = "interface")]
    pub interfaces: Vec<DynamicInterface>,
}

impl DynamicConfig {
    pub fn interface(&self, name: &str) -> Option<&DynamicInterface> {
        self.interfaces.iter().find(|intf| intf.name == name)
    }
}

/// DNS settings scoped to a routing instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingInstanceConfig {
    pub name: InstanceName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forwarding: Option<ForwardingConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic: Option<DynamicConfig>,
}

/// Root of the declarative configuration tree.
///
/// The top-level sections belong to the default instance; every routing
/// instance contributes its own named instance.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConfigTree {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forwarding: Option<ForwardingConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic: Option<DynamicConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routing_instances: Vec<RoutingInstanceConfig>,
}

impl ConfigTree {
    /// Forwarding configuration keyed by instance name.
    pub fn forwarding_instances(&self) -> BTreeMap<InstanceName, ForwardingConfig> {
        let mut out = BTreeMap::new();
        if let Some(fwd) = &self.forwarding {
            out.insert(InstanceName::default_instance(), fwd.clone());
        }
        for ri in &self.routing_instances {
            if let Some(fwd) = &ri.forwarding {
                out.insert(ri.name.clone(), fwd.clone());
            }
        }
        out
    }

    /// Dynamic DNS configuration keyed by instance name.
    pub fn dynamic_instances(&self) -> BTreeMap<InstanceName, DynamicConfig> {
        let mut out = BTreeMap::new();
        if let Some(dynamic) = &self.dynamic {
            out.insert(InstanceName::default_instance(), dynamic.clone());
        }
        for ri in &self.routing_instances {
            if let Some(dynamic) = &ri.dynamic {
                out.insert(ri.name.clone(), dynamic.clone());
            }
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.forwarding_instances().is_empty() && self.dynamic_instances().is_empty()
    }

    /// Reject names that would collide with the default instance or escape
    /// their directory once used as a path component.
    pub fn validate(&self) -> Result<(), CoreError> {
        let mut seen = BTreeSet::new();
        for ri in &self.routing_instances {
            let name = ri.name.as_str();
            check_path_component("routing instance", name)?;
            if ri.name.is_default() {
                return Err(CoreError::InvalidConfig(format!(
                    "routing instance name '{DEFAULT_INSTANCE}' is reserved"
                )));
            }
            if !seen.insert(name) {
                return Err(CoreError::InvalidConfig(format!(
                    "routing instance '{name}' declared twice"
                )));
            }
        }
        let dynamic = self
            .dynamic
            .iter()
            .chain(self.routing_instances.iter().filter_map(|ri| ri.dynamic.as_ref()));
        for conf in dynamic {
            for intf in &conf.interfaces {
                check_path_component("interface", &intf.name)?;
            }
        }
        Ok(())
    }
}

fn check_path_component(what: &str, name: &str) -> Result<(), CoreError> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(CoreError::InvalidConfig(format!("invalid {what} name '{name}'")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Operational state
// ---------------------------------------------------------------------------

/// Where a nameserver was learned from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    #[default]
    System,
    Dhcp,
    Ppp,
    Configuration,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::System => write!(f, "system"),
            Provenance::Dhcp => write!(f, "dhcp"),
            Provenance::Ppp => write!(f, "ppp"),
            Provenance::Configuration => write!(f, "configuration"),
        }
    }
}

/// Port used for nameservers that were discovered rather than self-reported.
pub const DNS_PORT: u16 = 53;

/// One upstream nameserver as seen by a forwarding instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NameserverRecord {
    pub address: String,
    pub port: u16,
    pub queries_sent: u64,
    pub queries_retried_or_failed: u64,
    pub provenance: Provenance,
    pub in_use: bool,
    pub domain_override_only: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domains: Vec<String>,
}

impl NameserverRecord {
    /// A record as the forwarding daemon reports it, before provenance is known.
    pub fn reported(address: impl Into<String>, port: u16, sent: u64, retried: u64) -> Self {
        Self {
            address: address.into(),
            port,
            queries_sent: sent,
            queries_retried_or_failed: retried,
            provenance: Provenance::System,
            in_use: true,
            domain_override_only: false,
            domains: Vec::new(),
        }
    }

    /// A record learned from a resolver list or configuration file.
    pub fn discovered(address: impl Into<String>, provenance: Provenance, in_use: bool) -> Self {
        Self {
            address: address.into(),
            port: DNS_PORT,
            queries_sent: 0,
            queries_retried_or_failed: 0,
            provenance,
            in_use,
            domain_override_only: false,
            domains: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CacheStats {
    pub size: u32,
    #[serde(rename = "cache-entries")]
    pub entries: u64,
    #[serde(rename = "reused-cache-entries")]
    pub reused_entries: u64,
}

/// Point-in-time statistics of one forwarding daemon.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ForwardingState {
    pub queries_forwarded: u64,
    pub queries_answered: u64,
    pub cache: CacheStats,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nameservers: Vec<NameserverRecord>,
}

/// Outcome of the last dynamic DNS update for a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UpdateStatus {
    #[serde(rename = "successful")]
    Successful,
    #[default]
    #[serde(rename = "nochange")]
    NoChange,
    #[serde(rename = "noconnect")]
    NoConnect,
    #[serde(rename = "failed")]
    Failed,
}

impl fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateStatus::Successful => write!(f, "successful"),
            UpdateStatus::NoChange => write!(f, "nochange"),
            UpdateStatus::NoConnect => write!(f, "noconnect"),
            UpdateStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HostStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub hostname: String,
    /// RFC 3339 timestamp of the last successful update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<String>,
    pub status: UpdateStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceStatus {
    pub name: String,
    pub hosts: Vec<HostStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DynamicState {
    pub interfaces: Vec<InterfaceStatus>,
}

/// Everything one instance reports.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InstanceState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forwarding: Option<ForwardingState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic: Option<DynamicState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingInstanceState {
    pub name: InstanceName,
    #[serde(flatten)]
    pub state: InstanceState,
}

/// State of every live instance, shaped like [`ConfigTree`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StateReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<InstanceState>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routing_instances: Vec<RoutingInstanceState>,
}

impl StateReport {
    /// Fold per-instance states into the tree shape. Routing instances come
    /// out sorted by name.
    pub fn from_instances(instances: BTreeMap<InstanceName, InstanceState>) -> Self {
        let mut report = StateReport::default();
        for (name, state) in instances {
            if name.is_default() {
                report.default = Some(state);
            } else {
                report.routing_instances.push(RoutingInstanceState { name, state });
            }
        }
        report
    }

    pub fn instance(&self, name: &str) -> Option<&InstanceState> {
        if name == DEFAULT_INSTANCE {
            return self.default.as_ref();
        }
        self.routing_instances
            .iter()
            .find(|ri| ri.name.as_str() == name)
            .map(|ri| &ri.state)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn routing(names: &[&str]) -> ConfigTree {
        ConfigTree {
            routing_instances: names
                .iter()
                .map(|name| RoutingInstanceConfig {
                    name: InstanceName::from(*name),
                    forwarding: Some(ForwardingConfig::default()),
                    dynamic: None,
                })
                .collect(),
            ..ConfigTree::default()
        }
    }

    #[rstest]
    #[case(&[""])]
    #[case(&["default"])]
    #[case(&["blue/red"])]
    #[case(&[".."])]
    #[case(&["blue", "blue"])]
    fn unusable_routing_instance_names_are_rejected(#[case] names: &[&str]) {
        let err = routing(names).validate().unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfig(_)), "{err}");
    }

    #[test]
    fn distinct_routing_instances_validate() {
        routing(&["blue", "red"]).validate().expect("valid");
        ConfigTree::default().validate().expect("empty is valid");
    }

    #[test]
    fn interface_names_must_be_path_safe() {
        let tree = ConfigTree {
            dynamic: Some(DynamicConfig {
                interfaces: vec![DynamicInterface {
                    name: "../dp0s3".to_string(),
                    services: Vec::new(),
                }],
            }),
            ..ConfigTree::default()
        };
        assert!(tree.validate().is_err());
    }

    #[test]
    fn instance_name_default_detection() {
        assert!(InstanceName::default_instance().is_default());
        assert!(!InstanceName::from("blue").is_default());
        assert_eq!(InstanceName::from("blue").to_string(), "blue");
    }

    #[test]
    fn nameservers_from_config_follows_any_upstream_source() {
        let mut conf = ForwardingConfig::default();
        assert!(!conf.nameservers_from_config());
        conf.system = true;
        assert!(conf.nameservers_from_config());
        conf.system = false;
        conf.dhcp_interfaces.push("dp0s3".into());
        assert!(conf.nameservers_from_config());
    }

    #[test]
    fn tree_splits_into_instance_maps() {
        let yaml = r#"
forwarding:
  cache-size: 300
  listen-on: [dp0s3]
routing-instances:
  - name: blue
    forwarding:
      name-server: [10.0.0.1]
    dynamic:
      interface:
        - name: dp0s9
          service:
            - name: dyndns
              host-name: [blue.example.com]
              login: u
              password: p
  - name: red
"#;
        let tree: ConfigTree = serde_yaml::from_str(yaml).expect("parse tree");
        let fwd = tree.forwarding_instances();
        assert_eq!(fwd.len(), 2);
        assert_eq!(fwd[&InstanceName::default_instance()].cache_size, 300);
        assert_eq!(fwd[&InstanceName::from("blue")].cache_size, 150);
        let dynamic = tree.dynamic_instances();
        assert_eq!(dynamic.len(), 1);
        assert!(dynamic[&InstanceName::from("blue")].interface("dp0s9").is_some());
        assert!(!tree.is_empty());
    }

    #[test]
    fn service_debug_redacts_password() {
        let svc = DynamicService {
            name: "dyndns".into(),
            host_names: vec![],
            login: "user".into(),
            password: "hunter2".into(),
            server: None,
            protocol: None,
        };
        assert!(!format!("{svc:?}").contains("hunter2"));
    }

    #[test]
    fn state_report_places_default_and_named_instances() {
        let mut instances = BTreeMap::new();
        instances.insert(InstanceName::from("red"), InstanceState::default());
        instances.insert(InstanceName::default_instance(), InstanceState::default());
        instances.insert(InstanceName::from("blue"), InstanceState::default());
        let report = StateReport::from_instances(instances);
        assert!(report.default.is_some());
        let names: Vec<_> = report
            .routing_instances
            .iter()
            .map(|ri| ri.name.as_str())
            .collect();
        assert_eq!(names, vec!["blue", "red"]);
        assert!(report.instance("red").is_some());
        assert!(report.instance("green").is_none());
    }

    #[test]
    fn provenance_serializes_lowercase() {
        let json = serde_json::to_string(&Provenance::Configuration).expect("serialize");
        assert_eq!(json, "\"configuration\"");
        assert_eq!(Provenance::Dhcp.to_string(), "dhcp");
    }
}
