//! # dnsvisor-sync
//!
//! Applies the declared configuration tree to live daemon instances.
//!
//! [`DnsService::set`] reconciles forwarding and dynamic DNS instances,
//! writing their files through the hash-gated [`writer`] and keeping derived
//! fragments fresh with [`watcher`]. [`DnsService::state`] collects snapshots
//! from every instance.

pub mod dynamic;
pub mod error;
pub mod forwarding;
pub mod reconcile;
pub mod rpc;
pub mod service;
pub mod watcher;
pub mod wiring;
pub mod writer;

pub use dynamic::DynamicInstance;
pub use error::SyncError;
pub use forwarding::ForwardingInstance;
pub use reconcile::{Instance, InstanceFactory, InstanceFailure, ReconcileReport, Reconciler};
pub use rpc::RpcError;
pub use service::{ApplyReport, DnsService};
pub use watcher::{FileEventHandler, FileWatcher, FsEventKind, ReloadWatcher};
pub use wiring::ProcessWiring;
pub use writer::{atomic_write, WriteResult};
