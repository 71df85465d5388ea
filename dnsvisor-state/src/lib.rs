//! Live operational state of the supervised daemons.
//!
//! - [`parse`]: tolerant readers for statistics dumps, resolver lists,
//!   daemon configuration and update caches
//! - [`provenance`]: [`merge_provenance`], a pure attribution merge
//! - [`snapshot`]: [`SnapshotCoordinator`], the signal-and-wait protocol

pub mod parse;
pub mod provenance;
pub mod snapshot;

pub use parse::{
    glob_files, map_update_status, parse_ddclient_cache, parse_dnsmasq_servers,
    parse_resolv_nameservers, parse_state_log, read_ddclient_cache, read_glob_nameservers,
    read_resolv_nameservers, ConfiguredServer,
};
pub use provenance::{merge_provenance, ProvenanceSources};
pub use snapshot::SnapshotCoordinator;
