//! Line-oriented readers for the files the forwarding and update daemons
//! leave behind.
//!
//! Every reader is tolerant: a malformed field becomes zero (or is skipped)
//! and is logged at debug, never returned as an error. A missing file reads
//! as empty.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat};

use dnsvisor_core::{ForwardingState, HostStatus, InterfaceStatus, NameserverRecord, UpdateStatus};

/// How deep `conf-dir=` directives are followed.
const MAX_CONF_DIR_DEPTH: usize = 4;

fn number<T: std::str::FromStr + Default>(token: &str, field: &'static str) -> T
where
    T::Err: std::fmt::Display,
{
    let trimmed = token.trim_end_matches(',');
    match trimmed.parse() {
        Ok(n) => n,
        Err(e) => {
            tracing::debug!(field, token, error = %e, "unparseable counter");
            T::default()
        }
    }
}

/// Read a file, treating any failure as empty content.
pub fn read_or_empty(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "file unreadable, treating as empty");
            String::new()
        }
    }
}

// ---------------------------------------------------------------------------
// Forwarding daemon statistics dump
// ---------------------------------------------------------------------------

/// Parse a statistics dump. Later lines overwrite earlier ones.
///
/// Recognised lines (any prefix such as a syslog timestamp is ignored):
///
/// ```text
/// cache size 150, 83961/1213146 cache insertions re-used unexpired cache entries.
/// queries forwarded 363690, queries answered locally 229001
/// server 172.22.20.4#53: queries sent 15524, retried or failed 412
/// ```
pub fn parse_state_log(text: &str) -> ForwardingState {
    let mut state = ForwardingState::default();
    for line in text.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if let Some(i) = find_pair(&tokens, "cache", "size") {
            parse_cache_line(&tokens[i..], &mut state);
        } else if let Some(i) = find_pair(&tokens, "queries", "forwarded") {
            parse_query_line(&tokens[i..], &mut state);
        } else if let Some(i) = tokens.iter().position(|t| *t == "server") {
            if let Some(record) = parse_server_line(&tokens[i..]) {
                state.nameservers.push(record);
            }
        }
    }
    state
}

fn find_pair(tokens: &[&str], first: &str, second: &str) -> Option<usize> {
    tokens
        .windows(2)
        .position(|w| w[0] == first && w[1] == second)
}

// cache size <N>, <reused>/<entries> ...
fn parse_cache_line(tokens: &[&str], state: &mut ForwardingState) {
    if tokens.len() < 4 {
        tracing::debug!(line = tokens.join(" "), "short cache statistics line");
        return;
    }
    state.cache.size = number(tokens[2], "cache size");
    match tokens[3].split_once('/') {
        Some((reused, entries)) => {
            state.cache.reused_entries = number(reused, "reused cache entries");
            state.cache.entries = number(entries, "cache entries");
        }
        None => tracing::debug!(token = tokens[3], "unexpected cache entries format"),
    }
}

// queries forwarded <F>, queries answered locally <A>
fn parse_query_line(tokens: &[&str], state: &mut ForwardingState) {
    if tokens.len() < 7 {
        tracing::debug!(line = tokens.join(" "), "short query statistics line");
        return;
    }
    state.queries_forwarded = number(tokens[2], "queries forwarded");
    state.queries_answered = number(tokens[6], "queries answered");
}

// server <ip>#<port>: queries sent <S>, retried or failed <R>
// server <ip>#<port>: queries sent <S>, retried <R>, failed <F>, ...
fn parse_server_line(tokens: &[&str]) -> Option<NameserverRecord> {
    if tokens.len() < 9 || tokens[2] != "queries" {
        return None;
    }
    let endpoint = tokens[1].trim_end_matches(':');
    let parts: Vec<&str> = endpoint.split('#').collect();
    if parts.len() != 2 {
        tracing::debug!(endpoint, "invalid server endpoint");
        return None;
    }
    let port: u16 = number(parts[1], "server port");
    let sent: u64 = number(tokens[4], "queries sent");
    let retried_or_failed: u64 = if tokens[5] == "retried" && tokens[6] == "or" {
        number(tokens[8], "retried or failed")
    } else if tokens[5] == "retried" && tokens[7] == "failed" {
        number::<u64>(tokens[6], "retried") + number::<u64>(tokens[8], "failed")
    } else {
        tracing::debug!(line = tokens.join(" "), "unrecognised server statistics layout");
        0
    };
    Some(NameserverRecord::reported(parts[0], port, sent, retried_or_failed))
}

// ---------------------------------------------------------------------------
// Resolver lists
// ---------------------------------------------------------------------------

/// Addresses from `nameserver <ip>` lines.
pub fn parse_resolv_nameservers(text: &str) -> Vec<String> {
    text.lines()
        .filter(|line| line.starts_with("nameserver"))
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(str::to_string)
        .collect()
}

pub fn read_resolv_nameservers(path: &Path) -> Vec<String> {
    parse_resolv_nameservers(&read_or_empty(path))
}

/// Regular files matching the glob `pattern`, sorted by path. A bad pattern
/// or an unreadable entry is logged and skipped.
pub fn glob_files(pattern: &Path) -> Vec<PathBuf> {
    let pattern = pattern.to_string_lossy();
    let paths = match glob::glob(&pattern) {
        Ok(paths) => paths,
        Err(e) => {
            tracing::debug!(pattern = %pattern, error = %e, "invalid glob pattern");
            return Vec::new();
        }
    };
    let mut out: Vec<PathBuf> = paths
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::debug!(pattern = %pattern, error = %e, "glob entry unreadable");
                None
            }
        })
        .filter(|path| path.is_file())
        .collect();
    out.sort();
    out
}

/// Nameservers from every resolver list matching `pattern`.
pub fn read_glob_nameservers(pattern: &Path) -> Vec<String> {
    glob_files(pattern)
        .iter()
        .flat_map(|file| read_resolv_nameservers(file))
        .collect()
}

// ---------------------------------------------------------------------------
// Forwarding daemon configuration
// ---------------------------------------------------------------------------

/// An upstream named by a `server=` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfiguredServer {
    pub server: String,
    /// Set for `server=/<domain>/<ip>` overrides; `None` is a catch-all.
    pub domain: Option<String>,
}

impl ConfiguredServer {
    pub fn catch_all(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            domain: None,
        }
    }

    pub fn for_domain(server: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            domain: Some(domain.into()),
        }
    }
}

/// Strip `#port` and `@source` suffixes from a server address.
fn bare_address(value: &str) -> &str {
    value.split(['#', '@']).next().unwrap_or(value)
}

fn parse_server_directive(value: &str, out: &mut Vec<ConfiguredServer>) {
    let value = value.split_whitespace().next().unwrap_or("");
    if let Some(rest) = value.strip_prefix('/') {
        // /dom1/dom2/.../server
        let mut parts: Vec<&str> = rest.split('/').collect();
        let server = bare_address(parts.pop().unwrap_or(""));
        if server.is_empty() {
            return;
        }
        for domain in parts.into_iter().filter(|d| !d.is_empty()) {
            out.push(ConfiguredServer::for_domain(server, domain));
        }
    } else {
        let server = bare_address(value);
        if !server.is_empty() {
            out.push(ConfiguredServer::catch_all(server));
        }
    }
}

fn conf_dir_files(value: &str) -> Vec<PathBuf> {
    let mut fields = value.split(',').map(str::trim);
    let Some(dir) = fields.next().filter(|d| !d.is_empty()) else {
        return Vec::new();
    };
    let dir = Path::new(dir);
    let (includes, excludes): (Vec<&str>, Vec<&str>) =
        fields.filter(|f| !f.is_empty()).partition(|f| f.starts_with('*'));

    let mut files: Vec<PathBuf> = if includes.is_empty() {
        glob_files(&dir.join("*"))
    } else {
        includes
            .iter()
            .flat_map(|pattern| glob_files(&dir.join(pattern)))
            .collect()
    };
    files.retain(|f| {
        let name = f.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        !excludes.iter().any(|ext| name.ends_with(ext))
    });
    files.sort();
    files.dedup();
    files
}

fn collect_dnsmasq_servers(text: &str, depth: usize, out: &mut Vec<ConfiguredServer>) {
    for line in text.lines() {
        let line = line.trim();
        if let Some(value) = line.strip_prefix("server=") {
            parse_server_directive(value, out);
        } else if let Some(value) = line.strip_prefix("conf-dir=") {
            if depth >= MAX_CONF_DIR_DEPTH {
                tracing::debug!(value, "conf-dir nesting too deep, skipping");
                continue;
            }
            let value = value.split_whitespace().next().unwrap_or("");
            for file in conf_dir_files(value) {
                collect_dnsmasq_servers(&read_or_empty(&file), depth + 1, out);
            }
        }
    }
}

/// Every `server=` directive in a configuration text, following `conf-dir=`.
pub fn parse_dnsmasq_servers(text: &str) -> Vec<ConfiguredServer> {
    let mut out = Vec::new();
    collect_dnsmasq_servers(text, 0, &mut out);
    out
}

pub fn read_dnsmasq_servers(path: &Path) -> Vec<ConfiguredServer> {
    parse_dnsmasq_servers(&read_or_empty(path))
}

// ---------------------------------------------------------------------------
// Update daemon cache
// ---------------------------------------------------------------------------

pub fn map_update_status(raw: &str) -> UpdateStatus {
    match raw {
        "good" => UpdateStatus::Successful,
        "nochg" | "" => UpdateStatus::NoChange,
        "noconnect" => UpdateStatus::NoConnect,
        "failed" => UpdateStatus::Failed,
        other => {
            tracing::debug!(status = other, "unknown update status");
            UpdateStatus::NoChange
        }
    }
}

fn host_from_fields(fields: &[(&str, &str)]) -> HostStatus {
    let get = |key: &str| {
        fields
            .iter()
            .rev()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| *v)
            .unwrap_or("")
    };
    let mtime: i64 = match get("mtime") {
        "" => 0,
        raw => number(raw, "mtime"),
    };
    let last_update = if mtime == 0 {
        None
    } else {
        DateTime::from_timestamp(mtime, 0).map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
    };
    let address = Some(get("ip")).filter(|ip| !ip.is_empty()).map(str::to_string);
    HostStatus {
        address,
        hostname: get("host").to_string(),
        last_update,
        status: map_update_status(get("status")),
    }
}

/// One host per non-comment line of `key=value` pairs separated by commas or
/// whitespace.
pub fn parse_ddclient_cache(text: &str, interface: &str) -> InterfaceStatus {
    let hosts = text
        .lines()
        .filter(|line| !line.starts_with('#') && !line.trim().is_empty())
        .map(|line| {
            let fields: Vec<(&str, &str)> = line
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|f| !f.is_empty())
                .filter_map(|f| {
                    let mut kv = f.split('=');
                    match (kv.next(), kv.next(), kv.next()) {
                        (Some(k), Some(v), None) => Some((k, v)),
                        _ => None,
                    }
                })
                .collect();
            host_from_fields(&fields)
        })
        .collect();
    InterfaceStatus {
        name: interface.to_string(),
        hosts,
    }
}

pub fn read_ddclient_cache(path: &Path, interface: &str) -> InterfaceStatus {
    parse_ddclient_cache(&read_or_empty(path), interface)
}
