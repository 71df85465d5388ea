//! On-disk layout of every supervised instance.
//!
//! ```text
//! <run-root>/<instance>/
//!   dnsmasq.conf                 rendered daemon configuration
//!   dnsmasq.env                  unit environment (pid + conf paths)
//!   dnsmasq.pid
//!   dnsmasq.log                  state dump target (SIGUSR1)
//!   resolv.conf                  instance resolver list (non-default only)
//!   hosts                        instance hosts file (non-default only)
//!   dnsmasq.d/
//!     dhcpinterface-<if>.conf    nameservers learned over DHCP on <if>
//!     system.conf                mirror of the system resolver list
//!
//! <ddclient config-dir>/ddclient_<if>.conf
//! <ddclient cache-dir>/ddclient_<if>.cache
//! <ddclient run-dir>/<if>/ddclient.env
//! ```
//!
//! Pure path arithmetic. Nothing here touches the filesystem.

use std::path::{Path, PathBuf};

use crate::settings::Settings;
use crate::types::InstanceName;

/// File extension matched inside the `conf-dir`.
pub const CONF_DIR_PATTERN: &str = "*.conf";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardingLayout {
    pub instance: InstanceName,
    pub unit: String,
    pub instance_dir: PathBuf,
    pub conf_file: PathBuf,
    pub env_file: PathBuf,
    pub conf_dir: PathBuf,
    pub system_fragment: PathBuf,
    pub pid_file: PathBuf,
    pub state_file: PathBuf,
    /// Resolver list the daemon reads; also what `system` mirrors.
    pub resolv_file: PathBuf,
    pub hosts_file: PathBuf,
    pub dhcp_dir: PathBuf,
    pub ppp_dir: PathBuf,
}

impl ForwardingLayout {
    pub fn for_instance(settings: &Settings, name: &InstanceName) -> Self {
        let instance_dir = settings.run_root.join(name.as_str());
        let conf_dir = instance_dir.join("dnsmasq.d");
        let (resolv_file, hosts_file) = if name.is_default() {
            (settings.system_resolv.clone(), settings.system_hosts.clone())
        } else {
            (instance_dir.join("resolv.conf"), instance_dir.join("hosts"))
        };
        Self {
            instance: name.clone(),
            unit: format!("dnsmasq@{name}.service"),
            conf_file: instance_dir.join("dnsmasq.conf"),
            env_file: instance_dir.join("dnsmasq.env"),
            system_fragment: conf_dir.join("system.conf"),
            pid_file: instance_dir.join("dnsmasq.pid"),
            state_file: instance_dir.join("dnsmasq.log"),
            resolv_file,
            hosts_file,
            dhcp_dir: settings.dhcp_dir.clone(),
            ppp_dir: settings.ppp_dir.clone(),
            conf_dir,
            instance_dir,
        }
    }

    /// `dnsmasq.d/dhcpinterface-<if>.conf`
    pub fn dhcp_fragment(&self, interface: &str) -> PathBuf {
        self.conf_dir.join(format!("dhcpinterface-{interface}.conf"))
    }

    /// Lease file dhclient rewrites whenever `interface` renews.
    pub fn dhcp_lease_file(&self, interface: &str) -> PathBuf {
        self.dhcp_dir.join(format!("dhclient_{interface}_lease"))
    }

    /// Resolver list dhclient writes for `interface`.
    pub fn dhcp_resolv_file(&self, interface: &str) -> PathBuf {
        self.dhcp_dir.join(format!("dhclient-{interface}-resolv.conf"))
    }

    /// Glob over every per-interface DHCP resolver list.
    pub fn dhcp_resolv_pattern(&self) -> PathBuf {
        self.dhcp_dir.join("dhclient-*-resolv.conf")
    }

    /// Glob over every per-link PPP resolver list.
    pub fn ppp_resolv_pattern(&self) -> PathBuf {
        self.ppp_dir.join("resolv-*.conf")
    }

    pub fn conf_dir_pattern(&self) -> &'static str {
        CONF_DIR_PATTERN
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicLayout {
    pub instance: InstanceName,
    config_dir: PathBuf,
    cache_dir: PathBuf,
    run_dir: PathBuf,
}

impl DynamicLayout {
    pub fn for_instance(settings: &Settings, name: &InstanceName) -> Self {
        Self {
            instance: name.clone(),
            config_dir: settings.ddclient.config_dir.clone(),
            cache_dir: settings.ddclient.cache_dir.clone(),
            run_dir: settings.ddclient.run_dir.clone(),
        }
    }

    /// `ddclient@<if>.service`
    pub fn unit(&self, interface: &str) -> String {
        format!("ddclient@{interface}.service")
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn config_file(&self, interface: &str) -> PathBuf {
        self.config_dir.join(format!("ddclient_{interface}.conf"))
    }

    pub fn cache_file(&self, interface: &str) -> PathBuf {
        self.cache_dir.join(format!("ddclient_{interface}.cache"))
    }

    pub fn env_dir(&self, interface: &str) -> PathBuf {
        self.run_dir.join(interface)
    }

    pub fn env_file(&self, interface: &str) -> PathBuf {
        self.env_dir(interface).join("ddclient.env")
    }

    pub fn pid_file(&self, interface: &str) -> PathBuf {
        self.env_dir(interface).join("ddclient.pid")
    }
}
