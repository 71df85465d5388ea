//! dnsvisor core library: domain types, settings, on-disk layout, errors.
//!
//! - [`types`]: instance names, declared configuration tree, state records
//! - [`settings`]: [`Settings`] loaded from YAML with defaults
//! - [`layout`]: per-instance file locations derived from settings
//! - [`versioned`]: [`Versioned`] copy-on-write values
//! - [`error`]: [`CoreError`]

pub mod error;
pub mod layout;
pub mod settings;
pub mod types;
pub mod versioned;

pub use error::CoreError;
pub use layout::{DynamicLayout, ForwardingLayout};
pub use settings::{DdclientSettings, Settings};
pub use types::{
    CacheStats, ConfigTree, DomainOverride, DynamicConfig, DynamicInterface, DynamicService,
    DynamicState, ForwardingConfig, ForwardingState, HostStatus, InstanceName, InstanceState,
    InterfaceStatus, NameserverRecord, Provenance, RoutingInstanceConfig, RoutingInstanceState,
    StateReport, UpdateStatus, DEFAULT_INSTANCE, DNS_PORT,
};
pub use versioned::Versioned;
