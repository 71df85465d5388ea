//! The controllable-daemon abstraction and its pass-through implementation.

use std::fmt;
use std::sync::Arc;

use nix::sys::signal::Signal;
use tokio::sync::oneshot;
use tracing::Span;

use crate::error::ProcessError;
use crate::service::ServiceManager;

/// A control action against one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
    Reload,
    Restart,
    Signal(Signal),
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Start => write!(f, "start"),
            Action::Stop => write!(f, "stop"),
            Action::Reload => write!(f, "reload"),
            Action::Restart => write!(f, "restart"),
            Action::Signal(sig) => write!(f, "signal {}", sig.as_str()),
        }
    }
}

/// Outcome of handing an action to a [`ManagedProcess`].
#[must_use]
#[derive(Debug)]
pub enum Dispatch {
    /// The action ran; this is its result.
    Done(Result<(), ProcessError>),
    /// The action is parked until its precondition holds.
    Deferred(DeferredAction),
}

impl Dispatch {
    /// Block until the action has run (or will never run).
    pub fn wait(self) -> Result<(), ProcessError> {
        match self {
            Dispatch::Done(result) => result,
            Dispatch::Deferred(deferred) => deferred.wait(),
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Dispatch::Deferred(_))
    }
}

/// Handle on a parked action.
#[derive(Debug)]
pub struct DeferredAction {
    unit: String,
    action: Action,
    reply: oneshot::Receiver<Result<(), ProcessError>>,
}

impl DeferredAction {
    pub(crate) fn new(
        unit: impl Into<String>,
        action: Action,
        reply: oneshot::Receiver<Result<(), ProcessError>>,
    ) -> Self {
        Self {
            unit: unit.into(),
            action,
            reply,
        }
    }

    pub fn action(&self) -> Action {
        self.action
    }

    /// Block the calling thread until the action resolves. Must not be
    /// called from inside an async task.
    pub fn wait(self) -> Result<(), ProcessError> {
        let unit = self.unit;
        self.reply
            .blocking_recv()
            .unwrap_or(Err(ProcessError::Terminated { unit }))
    }

    /// Non-blocking poll; `None` while still parked.
    pub fn try_result(&mut self) -> Option<Result<(), ProcessError>> {
        match self.reply.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(ProcessError::Terminated {
                unit: self.unit.clone(),
            })),
        }
    }
}

/// One controllable daemon instance.
///
/// `dispatch` is the only required operation; the blocking verbs are built
/// on it and wait for deferred actions.
pub trait ManagedProcess: Send + Sync {
    fn unit(&self) -> &str;

    fn dispatch(&self, action: Action) -> Dispatch;

    /// Run `action` only if it can run now. `None` means it was not run and
    /// nothing was parked; an action already pending is left in place.
    ///
    /// The default suits processes that never defer. Processes that do must
    /// override it.
    fn try_dispatch(&self, action: Action) -> Option<Result<(), ProcessError>> {
        match self.dispatch(action) {
            Dispatch::Done(result) => Some(result),
            Dispatch::Deferred(_) => None,
        }
    }

    fn run(&self, action: Action) -> Result<(), ProcessError> {
        self.dispatch(action).wait()
    }

    fn start(&self) -> Result<(), ProcessError> {
        self.run(Action::Start)
    }

    fn stop(&self) -> Result<(), ProcessError> {
        self.run(Action::Stop)
    }

    fn reload(&self) -> Result<(), ProcessError> {
        self.run(Action::Reload)
    }

    fn restart(&self) -> Result<(), ProcessError> {
        self.run(Action::Restart)
    }

    fn signal(&self, signal: Signal) -> Result<(), ProcessError> {
        self.run(Action::Signal(signal))
    }

    /// Final stop, after which the process object is inert.
    fn shutdown(&self) -> Result<(), ProcessError> {
        self.stop()
    }
}

/// Forwards every action straight to the service manager.
pub struct DirectProcess {
    unit: String,
    services: Arc<dyn ServiceManager>,
    span: Span,
}

impl DirectProcess {
    pub fn new(unit: impl Into<String>, services: Arc<dyn ServiceManager>) -> Self {
        let unit = unit.into();
        let span = tracing::info_span!("process", unit = %unit);
        Self {
            unit,
            services,
            span,
        }
    }
}

impl ManagedProcess for DirectProcess {
    fn unit(&self) -> &str {
        &self.unit
    }

    fn dispatch(&self, action: Action) -> Dispatch {
        let _enter = self.span.enter();
        let unit = self.unit.as_str();
        let result = match action {
            Action::Start => self.services.start(unit),
            Action::Stop => self.services.stop(unit),
            Action::Reload => self.services.reload(unit),
            Action::Restart => self.services.restart(unit),
            Action::Signal(sig) => self.services.signal(unit, sig),
        };
        match &result {
            Ok(()) => tracing::debug!(%action, "unit action applied"),
            Err(e) => tracing::warn!(%action, error = %e, "unit action failed"),
        }
        Dispatch::Done(result.map_err(ProcessError::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use parking_lot::Mutex;
    use rstest::rstest;

    #[derive(Default)]
    struct Calls(Mutex<Vec<String>>);

    impl ServiceManager for Calls {
        fn start(&self, unit: &str) -> Result<(), ServiceError> {
            self.0.lock().push(format!("start {unit}"));
            Ok(())
        }
        fn stop(&self, unit: &str) -> Result<(), ServiceError> {
            self.0.lock().push(format!("stop {unit}"));
            Ok(())
        }
        fn reload(&self, unit: &str) -> Result<(), ServiceError> {
            self.0.lock().push(format!("reload {unit}"));
            Ok(())
        }
        fn restart(&self, unit: &str) -> Result<(), ServiceError> {
            Err(ServiceError::Failed {
                program: "systemctl".into(),
                verb: "restart".into(),
                unit: unit.into(),
                status: "exit status: 1".into(),
                output: "boom".into(),
            })
        }
        fn signal(&self, unit: &str, signal: Signal) -> Result<(), ServiceError> {
            self.0.lock().push(format!("{} {unit}", signal.as_str()));
            Ok(())
        }
    }

    #[test]
    fn direct_process_forwards_one_to_one() {
        let calls = Arc::new(Calls::default());
        let proc = DirectProcess::new("dnsmasq@default.service", calls.clone());
        proc.start().expect("start");
        proc.reload().expect("reload");
        proc.signal(Signal::SIGHUP).expect("signal");
        proc.shutdown().expect("shutdown");
        assert_eq!(
            *calls.0.lock(),
            vec![
                "start dnsmasq@default.service",
                "reload dnsmasq@default.service",
                "SIGHUP dnsmasq@default.service",
                "stop dnsmasq@default.service",
            ]
        );
    }

    #[test]
    fn direct_process_propagates_service_errors() {
        let proc = DirectProcess::new("u.service", Arc::new(Calls::default()));
        let err = proc.restart().unwrap_err();
        assert!(matches!(err, ProcessError::Service(ServiceError::Failed { .. })));
        assert!(!proc.dispatch(Action::Restart).is_deferred());
    }

    #[rstest]
    #[case(Action::Start, "start")]
    #[case(Action::Reload, "reload")]
    #[case(Action::Signal(Signal::SIGUSR1), "signal SIGUSR1")]
    #[case(Action::Signal(Signal::SIGHUP), "signal SIGHUP")]
    fn action_display(#[case] action: Action, #[case] expected: &str) {
        assert_eq!(action.to_string(), expected);
    }
}
