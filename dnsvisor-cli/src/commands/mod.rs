pub mod actions;
pub mod config;
pub mod daemon;
pub mod state;

use std::path::Path;

use anyhow::{Context as _, Result};
use serde_json::Value;

use dnsvisor_core::Settings;
use dnsvisor_daemon::{request, DaemonError, DaemonRequest};

/// Settings shared by every subcommand.
pub struct Context {
    pub settings: Settings,
}

impl Context {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let settings = Settings::load(path).context("failed to load settings")?;
        Ok(Self { settings })
    }

    pub fn socket(&self) -> &Path {
        &self.settings.socket_path
    }

    /// Send a request, turning an absent daemon into an actionable message.
    pub fn request(&self, req: &DaemonRequest) -> Result<Value> {
        match request(self.socket(), req) {
            Ok(data) => Ok(data),
            Err(err @ DaemonError::DaemonNotRunning { .. }) => {
                Err(err).context("daemon unavailable; start it with `dnsvisor daemon start`")
            }
            Err(err) => Err(err).with_context(|| format!("daemon rejected '{}'", req.cmd)),
        }
    }
}

pub fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to render JSON")?
    );
    Ok(())
}
