//! `dnsvisor apply | clear | config`

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use clap::Args;
use colored::Colorize;
use serde_json::Value;

use dnsvisor_core::ConfigTree;
use dnsvisor_daemon::DaemonRequest;

use super::{print_json, Context};

#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Configuration tree; `.json` files are read as JSON, anything else as YAML.
    pub file: PathBuf,
}

impl ApplyArgs {
    pub fn run(self, ctx: &Context) -> Result<()> {
        let tree = read_tree(&self.file)?;
        let report = ctx.request(&DaemonRequest::new("apply").with_config(tree))?;
        print_report("applied", &report);
        Ok(())
    }
}

pub fn clear(ctx: &Context) -> Result<()> {
    let report = ctx.request(&DaemonRequest::new("clear"))?;
    print_report("cleared", &report);
    Ok(())
}

pub fn show(ctx: &Context) -> Result<()> {
    let tree = ctx.request(&DaemonRequest::new("config"))?;
    print_json(&tree)
}

pub(crate) fn read_tree(path: &Path) -> Result<ConfigTree> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let tree = if is_json {
        serde_json::from_str(&text).with_context(|| format!("invalid JSON in {}", path.display()))?
    } else if text.trim().is_empty() {
        ConfigTree::default()
    } else {
        serde_yaml::from_str(&text).with_context(|| format!("invalid YAML in {}", path.display()))?
    };
    Ok(tree)
}

/// One line per reconciler: created, updated and removed instance names.
fn print_report(verb: &str, report: &Value) {
    println!("{} configuration {verb}", "✓".green().bold());
    for section in ["forwarding", "dynamic"] {
        let part = &report[section];
        let names = |key: &str| -> String {
            part[key]
                .as_array()
                .map(|list| {
                    list.iter()
                        .filter_map(Value::as_str)
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default()
        };
        for key in ["created", "updated", "removed"] {
            let list = names(key);
            if !list.is_empty() {
                println!("  {section:<10} {key:<8} {list}");
            }
        }
    }
}
