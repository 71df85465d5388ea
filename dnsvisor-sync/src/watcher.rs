//! File watchers that route filesystem events for specific files to handlers.
//!
//! A [`FileWatcher`] watches the parent directory of every registered file
//! (non-recursively) and dispatches events on one background thread. Events
//! for files nobody registered are ignored. Handler errors are logged.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use notify::event::{AccessKind, AccessMode, ModifyKind};
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use dnsvisor_process::{Action, ManagedProcess};

use crate::error::{io_err, SyncError};
use crate::wiring::request;

/// Filesystem event classes a handler can react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsEventKind {
    Create,
    Write,
    CloseWrite,
    Rename,
    Remove,
}

impl FsEventKind {
    pub fn from_notify(kind: &EventKind) -> Option<Self> {
        match kind {
            EventKind::Create(_) => Some(FsEventKind::Create),
            EventKind::Modify(ModifyKind::Name(_)) => Some(FsEventKind::Rename),
            EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
                Some(FsEventKind::Write)
            }
            EventKind::Access(AccessKind::Close(AccessMode::Write)) => Some(FsEventKind::CloseWrite),
            EventKind::Remove(_) => Some(FsEventKind::Remove),
            _ => None,
        }
    }

    fn dispatch(self, handler: &dyn FileEventHandler, path: &Path) -> Result<(), SyncError> {
        match self {
            FsEventKind::Create => handler.create(path),
            FsEventKind::Write => handler.write(path),
            FsEventKind::CloseWrite => handler.close_write(path),
            FsEventKind::Rename => handler.rename(path),
            FsEventKind::Remove => handler.remove(path),
        }
    }
}

/// Reacts to events on one watched file. Every method defaults to a no-op.
pub trait FileEventHandler: Send + Sync {
    fn create(&self, _path: &Path) -> Result<(), SyncError> {
        Ok(())
    }

    fn write(&self, _path: &Path) -> Result<(), SyncError> {
        Ok(())
    }

    fn close_write(&self, _path: &Path) -> Result<(), SyncError> {
        Ok(())
    }

    fn rename(&self, _path: &Path) -> Result<(), SyncError> {
        Ok(())
    }

    fn remove(&self, _path: &Path) -> Result<(), SyncError> {
        Ok(())
    }
}

type Routes = HashMap<PathBuf, Arc<dyn FileEventHandler>>;

/// Background watcher over a fixed set of files.
///
/// Stops when [`stop`](Self::stop) is called or the value is dropped.
pub struct FileWatcher {
    label: String,
    watcher: Option<RecommendedWatcher>,
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl FileWatcher {
    pub fn start(
        label: impl Into<String>,
        files: Vec<(PathBuf, Arc<dyn FileEventHandler>)>,
    ) -> Result<Self, SyncError> {
        let label = label.into();
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);

        let mut watcher = recommended_watcher(move |event| {
            let _ = event_tx.send(event);
        })?;

        let dirs: BTreeSet<PathBuf> = files.iter().map(|(path, _)| parent_dir(path)).collect();
        for dir in &dirs {
            // A missing directory only disables events for the files in it.
            match watcher.watch(dir, RecursiveMode::NonRecursive) {
                Ok(()) => tracing::debug!(watcher = %label, path = %dir.display(), "watching"),
                Err(e) => {
                    tracing::warn!(watcher = %label, path = %dir.display(), error = %e, "cannot watch directory")
                }
            }
        }

        let routes: Routes = files.into_iter().collect();
        let thread_label = label.clone();
        let thread = std::thread::Builder::new()
            .name(format!("watch-{label}"))
            .spawn(move || run_dispatch(&thread_label, routes, event_rx, stop_rx))
            .map_err(|e| io_err(format!("watch-{label}"), e))?;

        Ok(Self {
            label,
            watcher: Some(watcher),
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.watcher.take();
        self.stop_tx.take();
        if let Some(thread) = self.thread.take() {
            // A handler stopping its own watcher must not join itself.
            if thread.thread().id() != std::thread::current().id() && thread.join().is_err() {
                tracing::warn!(watcher = %self.label, "watcher thread panicked");
            }
        }
        tracing::debug!(watcher = %self.label, "stopped");
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn run_dispatch(
    label: &str,
    routes: Routes,
    events: Receiver<notify::Result<Event>>,
    stop: Receiver<()>,
) {
    loop {
        crossbeam_channel::select! {
            recv(stop) -> _ => break,
            recv(events) -> msg => match msg {
                Ok(Ok(event)) => route(label, &routes, &event),
                Ok(Err(e)) => tracing::warn!(watcher = %label, error = %e, "watcher event error"),
                Err(_) => break,
            },
        }
    }
}

fn route(label: &str, routes: &Routes, event: &Event) {
    let Some(kind) = FsEventKind::from_notify(&event.kind) else {
        return;
    };
    for path in &event.paths {
        let Some(handler) = routes.get(path) else {
            continue;
        };
        if let Err(e) = kind.dispatch(handler.as_ref(), path) {
            tracing::warn!(watcher = %label, path = %path.display(), event = ?kind, error = %e, "handler failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Reload watcher
// ---------------------------------------------------------------------------

/// Reloads a process whenever a file it reads is rewritten.
pub struct ReloadWatcher {
    watcher: FileWatcher,
}

struct ReloadOnWrite {
    process: Arc<dyn ManagedProcess>,
}

impl ReloadOnWrite {
    fn reload(&self) -> Result<(), SyncError> {
        request(self.process.as_ref(), Action::Reload).map_err(SyncError::from)
    }
}

impl FileEventHandler for ReloadOnWrite {
    fn close_write(&self, _path: &Path) -> Result<(), SyncError> {
        self.reload()
    }

    /// Replaced by rename into place.
    fn rename(&self, path: &Path) -> Result<(), SyncError> {
        if path.exists() {
            self.reload()
        } else {
            Ok(())
        }
    }
}

impl ReloadWatcher {
    pub fn start(file: &Path, process: Arc<dyn ManagedProcess>) -> Result<Self, SyncError> {
        let label = format!("reload-{}", process.unit());
        let handler: Arc<dyn FileEventHandler> = Arc::new(ReloadOnWrite { process });
        let watcher = FileWatcher::start(label, vec![(file.to_path_buf(), handler)])?;
        Ok(Self { watcher })
    }

    pub fn stop(self) {
        self.watcher.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind, RenameMode};
    use std::time::Duration;

    #[test]
    fn notify_kinds_map_to_handler_methods() {
        let cases = [
            (EventKind::Create(CreateKind::File), Some(FsEventKind::Create)),
            (EventKind::Modify(ModifyKind::Data(DataChange::Content)), Some(FsEventKind::Write)),
            (EventKind::Modify(ModifyKind::Name(RenameMode::To)), Some(FsEventKind::Rename)),
            (
                EventKind::Access(AccessKind::Close(AccessMode::Write)),
                Some(FsEventKind::CloseWrite),
            ),
            (EventKind::Remove(RemoveKind::File), Some(FsEventKind::Remove)),
            (EventKind::Access(AccessKind::Open(AccessMode::Any)), None),
        ];
        for (kind, expected) in cases {
            assert_eq!(FsEventKind::from_notify(&kind), expected, "{kind:?}");
        }
    }

    struct Notify(Sender<(FsEventKind, PathBuf)>);

    impl FileEventHandler for Notify {
        fn close_write(&self, path: &Path) -> Result<(), SyncError> {
            let _ = self.0.send((FsEventKind::CloseWrite, path.to_path_buf()));
            Ok(())
        }
    }

    #[test]
    fn only_registered_files_reach_their_handler() {
        let dir = tempfile::tempdir().unwrap();
        let watched = dir.path().join("resolv.conf");
        let (tx, rx) = crossbeam_channel::unbounded();
        let watcher = FileWatcher::start(
            "test",
            vec![(watched.clone(), Arc::new(Notify(tx)) as Arc<dyn FileEventHandler>)],
        )
        .unwrap();

        std::fs::write(dir.path().join("other.conf"), "x").unwrap();
        std::fs::write(&watched, "nameserver 1.1.1.1\n").unwrap();

        let (kind, path) = rx.recv_timeout(Duration::from_secs(5)).expect("event");
        assert_eq!(kind, FsEventKind::CloseWrite);
        assert_eq!(path, watched);

        watcher.stop();
        std::fs::write(&watched, "nameserver 2.2.2.2\n").unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    }

    #[test]
    fn missing_directory_does_not_fail_start() {
        let dir = tempfile::tempdir().unwrap();
        let handler: Arc<dyn FileEventHandler> = Arc::new(ReloadNever);
        let watcher = FileWatcher::start(
            "missing",
            vec![(dir.path().join("nope").join("lease"), handler)],
        )
        .unwrap();
        assert_eq!(watcher.label(), "missing");
    }

    struct ReloadNever;
    impl FileEventHandler for ReloadNever {}
}
