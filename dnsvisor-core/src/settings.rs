//! Daemon settings.
//!
//! # Storage layout
//!
//! ```text
//! /etc/dnsvisor/dnsvisor.yaml   (optional; every key has a default)
//! ```
//!
//! # API pattern
//!
//! - `load_at(path)`: explicit file; used in tests with `TempDir`
//! - `load(override)`: resolves `--settings`, then `$DNSVISOR_SETTINGS`, then
//!   the default path, and delegates to `load_at`
//!
//! [`Settings::rooted`] relocates every path under one directory so tests
//! never touch the real system.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, CoreError};

pub const DEFAULT_SETTINGS_PATH: &str = "/etc/dnsvisor/dnsvisor.yaml";

/// Environment variable naming an alternative settings file.
pub const SETTINGS_ENV: &str = "DNSVISOR_SETTINGS";

/// Directories shared by every ddclient unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DdclientSettings {
    pub config_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub run_dir: PathBuf,
}

impl Default for DdclientSettings {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("/etc/ddclient"),
            cache_dir: PathBuf::from("/var/cache/ddclient"),
            run_dir: PathBuf::from("/run/ddclient"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Settings {
    /// Parent of every per-instance runtime directory.
    pub run_root: PathBuf,
    /// Resolver list of the default instance and source of `system` nameservers.
    pub system_resolv: PathBuf,
    pub system_hosts: PathBuf,
    /// Where dhclient drops leases and per-interface resolver lists.
    pub dhcp_dir: PathBuf,
    /// Where pppd drops per-link resolver lists.
    pub ppp_dir: PathBuf,
    pub ddclient: DdclientSettings,
    pub systemctl: PathBuf,
    /// Program listing live routing instances, one per line, name first.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vrf_list_command: Option<PathBuf>,
    pub config_cache: PathBuf,
    pub socket_path: PathBuf,
    pub snapshot_timeout_ms: u64,
    /// Stop the daemon once the configuration tree is cleared.
    pub exit_on_clear: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            run_root: PathBuf::from("/run/dns/vrf"),
            system_resolv: PathBuf::from("/etc/resolv.conf"),
            system_hosts: PathBuf::from("/etc/hosts"),
            dhcp_dir: PathBuf::from("/var/lib/dhcp"),
            ppp_dir: PathBuf::from("/etc/ppp"),
            ddclient: DdclientSettings::default(),
            systemctl: PathBuf::from("systemctl"),
            vrf_list_command: None,
            config_cache: PathBuf::from("/var/lib/dnsvisor/config.json"),
            socket_path: PathBuf::from("/run/dnsvisor/dnsvisor.sock"),
            snapshot_timeout_ms: 1000,
            exit_on_clear: false,
        }
    }
}

impl Settings {
    /// Load settings from `path`. A missing file yields the defaults.
    pub fn load_at(path: &Path) -> Result<Self, CoreError> {
        let settings = if path.exists() {
            let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
            if contents.trim().is_empty() {
                Settings::default()
            } else {
                serde_yaml::from_str(&contents).map_err(|source| CoreError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?
            }
        } else {
            Settings::default()
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Resolve the settings file (explicit override, `$DNSVISOR_SETTINGS`,
    /// default path) and load it.
    pub fn load(override_path: Option<&Path>) -> Result<Self, CoreError> {
        let path = match override_path {
            Some(p) => p.to_path_buf(),
            None => std::env::var_os(SETTINGS_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_PATH)),
        };
        Self::load_at(&path)
    }

    /// Defaults with every path placed under `root`.
    pub fn rooted(root: &Path) -> Self {
        Self {
            run_root: root.join("run/dns/vrf"),
            system_resolv: root.join("etc/resolv.conf"),
            system_hosts: root.join("etc/hosts"),
            dhcp_dir: root.join("var/lib/dhcp"),
            ppp_dir: root.join("etc/ppp"),
            ddclient: DdclientSettings {
                config_dir: root.join("etc/ddclient"),
                cache_dir: root.join("var/cache/ddclient"),
                run_dir: root.join("run/ddclient"),
            },
            config_cache: root.join("var/lib/dnsvisor/config.json"),
            socket_path: root.join("run/dnsvisor/dnsvisor.sock"),
            ..Settings::default()
        }
    }

    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_millis(self.snapshot_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.snapshot_timeout_ms == 0 {
            return Err(CoreError::InvalidSettings(
                "snapshot-timeout-ms must be greater than zero".into(),
            ));
        }
        if self.run_root.as_os_str().is_empty() {
            return Err(CoreError::InvalidSettings("run-root must not be empty".into()));
        }
        Ok(())
    }
}
