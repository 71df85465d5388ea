//! Fresh statistics from a running forwarding daemon.
//!
//! The daemon dumps its counters to its log file on `SIGUSR1`. A request
//! truncates that file, watches its directory, signals the daemon, and waits
//! for the write. On timeout the previous snapshot is returned unchanged.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use notify::event::{AccessKind, AccessMode, ModifyKind};
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};
use tracing::Span;

use dnsvisor_core::{ForwardingLayout, ForwardingState, Versioned};
use dnsvisor_process::{Action, ManagedProcess, Signal};

use crate::parse::{
    parse_state_log, read_dnsmasq_servers, read_glob_nameservers, read_or_empty,
    read_resolv_nameservers,
};
use crate::provenance::{merge_provenance, ProvenanceSources};

/// Quiet period after a data write before a dump without a close event is
/// taken as complete.
pub const DUMP_SETTLE: Duration = Duration::from_millis(50);

pub struct SnapshotCoordinator {
    process: Arc<dyn ManagedProcess>,
    layout: ForwardingLayout,
    timeout: Duration,
    single_flight: Mutex<()>,
    cached: RwLock<Versioned<ForwardingState>>,
    span: Span,
}

impl SnapshotCoordinator {
    pub fn new(process: Arc<dyn ManagedProcess>, layout: ForwardingLayout, timeout: Duration) -> Self {
        let span = tracing::info_span!("snapshot", instance = %layout.instance);
        Self {
            process,
            layout,
            timeout,
            single_flight: Mutex::new(()),
            cached: RwLock::new(Versioned::default()),
            span,
        }
    }

    /// Last snapshot taken, without asking the daemon.
    pub fn current(&self) -> Arc<ForwardingState> {
        self.cached.read().value()
    }

    pub fn version(&self) -> u64 {
        self.cached.read().version()
    }

    /// Request, await and merge a fresh dump. Only one request per instance
    /// is in flight; concurrent callers queue on the instance lock.
    pub fn snapshot(&self) -> Arc<ForwardingState> {
        let _flight = self.single_flight.lock();
        let _enter = self.span.enter();
        let state_file = &self.layout.state_file;

        if let Err(e) = std::fs::OpenOptions::new().write(true).truncate(true).open(state_file) {
            tracing::debug!(path = %state_file.display(), error = %e, "state file truncate failed");
        }

        let (tx, rx) = crossbeam_channel::unbounded();
        let watcher = match watch_parent(state_file, tx) {
            Ok(w) => w,
            Err(e) => {
                tracing::warn!(path = %state_file.display(), error = %e, "cannot watch state file");
                return self.current();
            }
        };

        // A pending restart must survive a state query, so the signal is
        // never parked.
        match self.process.try_dispatch(Action::Signal(Signal::SIGUSR1)) {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                tracing::error!(error = %e, "state dump request failed");
                return self.current();
            }
            None => {
                tracing::info!("daemon namespace absent, returning cached state");
                return self.current();
            }
        }

        let fresh = self.wait_for_dump(&rx, state_file);
        drop(watcher);
        if !fresh {
            return self.current();
        }

        let state = self.read_state();
        self.cached.write().replace(state)
    }

    /// `true` once the dump is complete: the writer closed the file, or no
    /// further write arrived within [`DUMP_SETTLE`] of the last one.
    fn wait_for_dump(&self, rx: &Receiver<notify::Result<Event>>, state_file: &Path) -> bool {
        let deadline = Instant::now() + self.timeout;
        let mut settle: Option<Instant> = None;
        loop {
            let until = settle.map_or(deadline, |at| at.min(deadline));
            match rx.recv_timeout(until.saturating_duration_since(Instant::now())) {
                Ok(Ok(event)) if touches(&event, state_file) => match dump_progress(&event.kind) {
                    Some(DumpProgress::Closed) => return true,
                    Some(DumpProgress::Written) => settle = Some(Instant::now() + DUMP_SETTLE),
                    None => {}
                },
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "state watcher error"),
                Err(RecvTimeoutError::Timeout) if settle.is_some() => {
                    tracing::debug!("state dump settled without close");
                    return true;
                }
                Err(RecvTimeoutError::Timeout) => {
                    tracing::warn!(timeout_ms = self.timeout.as_millis() as u64, "timed out waiting for state dump");
                    return false;
                }
                Err(RecvTimeoutError::Disconnected) => return settle.is_some(),
            }
        }
    }

    /// Parse the dump and attribute its nameservers.
    fn read_state(&self) -> ForwardingState {
        let layout = &self.layout;
        let mut state = parse_state_log(&read_or_empty(&layout.state_file));
        let sources = ProvenanceSources {
            system: read_resolv_nameservers(&layout.resolv_file),
            dhcp: read_glob_nameservers(&layout.dhcp_resolv_pattern()),
            ppp: read_glob_nameservers(&layout.ppp_resolv_pattern()),
            configured: read_dnsmasq_servers(&layout.conf_file),
        };
        state.nameservers = merge_provenance(std::mem::take(&mut state.nameservers), &sources);
        tracing::debug!(nameservers = state.nameservers.len(), "state snapshot refreshed");
        state
    }
}

fn watch_parent(
    file: &Path,
    tx: crossbeam_channel::Sender<notify::Result<Event>>,
) -> notify::Result<RecommendedWatcher> {
    let dir = file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let mut watcher = recommended_watcher(move |event| {
        let _ = tx.send(event);
    })?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

enum DumpProgress {
    Written,
    Closed,
}

fn dump_progress(kind: &EventKind) -> Option<DumpProgress> {
    match kind {
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => Some(DumpProgress::Closed),
        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
            Some(DumpProgress::Written)
        }
        _ => None,
    }
}

fn touches(event: &Event, file: &Path) -> bool {
    let Some(name) = file.file_name() else {
        return false;
    };
    event.paths.iter().any(|p| p.file_name() == Some(name))
}
