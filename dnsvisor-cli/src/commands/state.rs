//! `dnsvisor state`: forwarding statistics and dynamic DNS status.

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use dnsvisor_core::{
    DynamicState, ForwardingState, InstanceState, NameserverRecord, StateReport, UpdateStatus,
    DEFAULT_INSTANCE,
};
use dnsvisor_daemon::DaemonRequest;

use super::{print_json, Context};

#[derive(Args, Debug)]
pub struct StateArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StateArgs {
    pub fn run(self, ctx: &Context) -> Result<()> {
        let raw = ctx.request(&DaemonRequest::new("state"))?;
        if self.json {
            return print_json(&raw);
        }
        let report: StateReport =
            serde_json::from_value(raw).context("daemon returned malformed state")?;
        print_tables(&report, Utc::now());
        Ok(())
    }
}

#[derive(Tabled)]
struct NameserverRow {
    #[tabled(rename = "nameserver")]
    nameserver: String,
    #[tabled(rename = "source")]
    source: String,
    #[tabled(rename = "in use")]
    in_use: String,
    #[tabled(rename = "sent")]
    sent: u64,
    #[tabled(rename = "failed")]
    failed: u64,
    #[tabled(rename = "domains")]
    domains: String,
}

impl From<&NameserverRecord> for NameserverRow {
    fn from(record: &NameserverRecord) -> Self {
        Self {
            nameserver: format!("{}#{}", record.address, record.port),
            source: record.provenance.to_string(),
            in_use: in_use_label(record),
            sent: record.queries_sent,
            failed: record.queries_retried_or_failed,
            domains: record.domains.join(", "),
        }
    }
}

#[derive(Tabled)]
struct HostRow {
    #[tabled(rename = "interface")]
    interface: String,
    #[tabled(rename = "host")]
    host: String,
    #[tabled(rename = "address")]
    address: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "last update")]
    last_update: String,
}

fn print_tables(report: &StateReport, now: DateTime<Utc>) {
    let mut instances: Vec<(&str, &InstanceState)> = Vec::new();
    if let Some(default) = &report.default {
        instances.push((DEFAULT_INSTANCE, default));
    }
    for ri in &report.routing_instances {
        instances.push((ri.name.as_str(), &ri.state));
    }

    println!(
        "dnsvisor v{} | {} instances",
        env!("CARGO_PKG_VERSION"),
        instances.len()
    );
    if instances.is_empty() {
        println!("Nothing configured.");
        return;
    }

    let separator = "■".repeat(67).bright_black().to_string();
    println!("{separator}");
    for (name, state) in instances {
        println!("{}", name.to_uppercase().bold());
        if let Some(fwd) = &state.forwarding {
            print_forwarding(fwd);
        }
        if let Some(dynamic) = &state.dynamic {
            print_dynamic(dynamic, now);
        }
        println!("{separator}");
    }
}

fn print_forwarding(fwd: &ForwardingState) {
    println!(
        "cache size {} | entries {} | reused {} | forwarded {} | answered locally {}",
        fwd.cache.size,
        fwd.cache.entries,
        fwd.cache.reused_entries,
        fwd.queries_forwarded,
        fwd.queries_answered,
    );
    if fwd.nameservers.is_empty() {
        println!("No nameservers reported.");
        return;
    }
    let rows: Vec<NameserverRow> = fwd.nameservers.iter().map(NameserverRow::from).collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn print_dynamic(dynamic: &DynamicState, now: DateTime<Utc>) {
    let rows: Vec<HostRow> = dynamic
        .interfaces
        .iter()
        .flat_map(|intf| {
            intf.hosts.iter().map(move |host| HostRow {
                interface: intf.name.clone(),
                host: host.hostname.clone(),
                address: host.address.clone().unwrap_or_else(|| "-".to_string()),
                status: status_label(host.status),
                last_update: host
                    .last_update
                    .as_deref()
                    .map(|ts| format_age(ts, now))
                    .unwrap_or_else(|| "never".to_string()),
            })
        })
        .collect();
    if rows.is_empty() {
        println!("No dynamic DNS updates recorded.");
        return;
    }
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn in_use_label(record: &NameserverRecord) -> String {
    if !record.in_use {
        return "■ no".bright_black().to_string();
    }
    if record.domain_override_only {
        return "■ domains".cyan().to_string();
    }
    "■ yes".green().to_string()
}

fn status_label(status: UpdateStatus) -> String {
    let label = status.to_string().to_uppercase();
    match status {
        UpdateStatus::Successful => label.green().bold().to_string(),
        UpdateStatus::NoChange => label.bright_black().to_string(),
        UpdateStatus::NoConnect => label.yellow().bold().to_string(),
        UpdateStatus::Failed => label.red().bold().to_string(),
    }
}

/// Human age of an RFC 3339 timestamp; unparseable values are shown verbatim.
fn format_age(timestamp: &str, now: DateTime<Utc>) -> String {
    let Ok(at) = DateTime::parse_from_rfc3339(timestamp) else {
        return timestamp.to_string();
    };
    let secs = now.signed_duration_since(at.with_timezone(&Utc)).num_seconds().max(0);
    match secs {
        0..=59 => format!("{secs}s ago"),
        60..=3_599 => format!("{}m ago", secs / 60),
        3_600..=86_399 => format!("{}h ago", secs / 3_600),
        _ => format!("{}d ago", secs / 86_400),
    }
}
