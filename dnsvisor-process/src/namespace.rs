//! Namespace (routing instance) availability: events plus an existence check.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Command;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// Called with the namespace name on every matching event.
pub type NamespaceHandler = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceEvent {
    Added(String),
    Removed(String),
}

impl NamespaceEvent {
    pub fn name(&self) -> &str {
        match self {
            NamespaceEvent::Added(name) | NamespaceEvent::Removed(name) => name,
        }
    }
}

/// Source of namespace lifecycle events.
pub trait NamespaceAvailability: Send + Sync {
    fn subscribe_added(&self, handler: NamespaceHandler) -> Subscription;
    fn subscribe_removed(&self, handler: NamespaceHandler) -> Subscription;
    /// Synchronous point-in-time check.
    fn exists(&self, name: &str) -> bool;
}

/// Answers "does this namespace exist right now" without events.
pub trait NamespaceChecker: Send + Sync {
    fn exists(&self, name: &str) -> bool;
}

/// Registration handle. Dropping it (or calling [`cancel`](Self::cancel))
/// detaches the handler.
#[must_use]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn cancel(mut self) {
        self.run_cancel();
    }

    fn run_cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[derive(Clone, Copy)]
enum Topic {
    Added,
    Removed,
}

#[derive(Default)]
struct HubState {
    next_id: u64,
    added: BTreeMap<u64, NamespaceHandler>,
    removed: BTreeMap<u64, NamespaceHandler>,
    /// Last published presence per name; wins over the checker.
    known: BTreeMap<String, bool>,
}

struct HubInner {
    state: Mutex<HubState>,
    checker: Option<Box<dyn NamespaceChecker>>,
}

/// In-process publisher fed by the management plane.
#[derive(Clone)]
pub struct NamespaceHub {
    inner: Arc<HubInner>,
}

impl Default for NamespaceHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NamespaceHub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                state: Mutex::new(HubState::default()),
                checker: None,
            }),
        }
    }

    /// Hub that falls back to `checker` for names it has no event for.
    pub fn with_checker(checker: impl NamespaceChecker + 'static) -> Self {
        Self {
            inner: Arc::new(HubInner {
                state: Mutex::new(HubState::default()),
                checker: Some(Box::new(checker)),
            }),
        }
    }

    /// Record the event and notify subscribers. Handlers run on the calling
    /// thread, outside the hub lock.
    pub fn publish(&self, event: NamespaceEvent) {
        let handlers: Vec<NamespaceHandler> = {
            let mut state = self.inner.state.lock();
            match &event {
                NamespaceEvent::Added(name) => {
                    state.known.insert(name.clone(), true);
                    state.added.values().cloned().collect()
                }
                NamespaceEvent::Removed(name) => {
                    state.known.insert(name.clone(), false);
                    state.removed.values().cloned().collect()
                }
            }
        };
        tracing::info!(namespace = event.name(), ?event, subscribers = handlers.len(), "namespace event");
        for handler in handlers {
            handler(event.name());
        }
    }

    /// Names currently known to be present through published events.
    pub fn present(&self) -> Vec<String> {
        self.inner
            .state
            .lock()
            .known
            .iter()
            .filter(|(_, present)| **present)
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn subscribe(&self, topic: Topic, handler: NamespaceHandler) -> Subscription {
        let id = {
            let mut state = self.inner.state.lock();
            let id = state.next_id;
            state.next_id += 1;
            match topic {
                Topic::Added => state.added.insert(id, handler),
                Topic::Removed => state.removed.insert(id, handler),
            };
            id
        };
        let weak: Weak<HubInner> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                let mut state = inner.state.lock();
                match topic {
                    Topic::Added => state.added.remove(&id),
                    Topic::Removed => state.removed.remove(&id),
                };
            }
        })
    }
}

impl NamespaceAvailability for NamespaceHub {
    fn subscribe_added(&self, handler: NamespaceHandler) -> Subscription {
        self.subscribe(Topic::Added, handler)
    }

    fn subscribe_removed(&self, handler: NamespaceHandler) -> Subscription {
        self.subscribe(Topic::Removed, handler)
    }

    fn exists(&self, name: &str) -> bool {
        if let Some(present) = self.inner.state.lock().known.get(name) {
            return *present;
        }
        self.inner
            .checker
            .as_ref()
            .map(|checker| checker.exists(name))
            .unwrap_or(false)
    }
}

/// Runs an external program that prints one routing instance per line, name
/// in the first field.
#[derive(Debug, Clone)]
pub struct VrfListCommand {
    program: PathBuf,
}

impl VrfListCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl NamespaceChecker for VrfListCommand {
    fn exists(&self, name: &str) -> bool {
        let output = match Command::new(&self.program).output() {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(program = %self.program.display(), error = %e, "vrf list command failed to run");
                return false;
            }
        };
        if !output.status.success() {
            tracing::warn!(program = %self.program.display(), status = %output.status, "vrf list command failed");
            return false;
        }
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|line| line.split_whitespace().next())
            .any(|first| first == name)
    }
}
