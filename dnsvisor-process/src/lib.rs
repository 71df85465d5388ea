//! Process supervision: the service manager seam, controllable processes and
//! the namespace-gated decorator.
//!
//! - [`service`]: [`ServiceManager`] and the `systemctl` driver
//! - [`managed`]: [`ManagedProcess`], [`Action`], [`Dispatch`], [`DirectProcess`]
//! - [`gated`]: [`VrfGatedProcess`]
//! - [`namespace`]: [`NamespaceAvailability`] and the in-process [`NamespaceHub`]

mod error;
pub mod gated;
pub mod managed;
pub mod namespace;
pub mod service;

pub use error::{ProcessError, ServiceError};
pub use gated::VrfGatedProcess;
pub use managed::{Action, DeferredAction, DirectProcess, Dispatch, ManagedProcess};
pub use namespace::{
    NamespaceAvailability, NamespaceChecker, NamespaceEvent, NamespaceHandler, NamespaceHub,
    Subscription, VrfListCommand,
};
pub use nix::sys::signal::Signal;
pub use service::{ServiceManager, Systemctl};
