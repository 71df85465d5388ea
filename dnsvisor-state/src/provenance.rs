//! Attribution of upstream nameservers to where they were learned from.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::IpAddr;

use dnsvisor_core::{NameserverRecord, Provenance};

use crate::parse::ConfiguredServer;

/// Independently observed nameserver lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvenanceSources {
    /// The resolver list the forwarding daemon reads.
    pub system: Vec<String>,
    /// Nameservers handed out by DHCP leases.
    pub dhcp: Vec<String>,
    /// Nameservers learned on PPP links.
    pub ppp: Vec<String>,
    /// `server=` directives of the daemon's configuration.
    pub configured: Vec<ConfiguredServer>,
}

/// Orders addresses numerically when they parse, lexically otherwise.
fn address_key(address: &str) -> (bool, Option<IpAddr>, String) {
    let ip = address.parse::<IpAddr>().ok();
    (ip.is_none(), ip, address.to_string())
}

fn build_records(sources: &ProvenanceSources) -> BTreeMap<String, NameserverRecord> {
    // Only a catch-all `server=` line takes the resolver list out of use.
    let baseline_in_use = !sources.configured.iter().any(|c| c.domain.is_none());

    let system: BTreeSet<&str> = sources.system.iter().map(String::as_str).collect();
    let mut built = BTreeMap::new();
    for ns in &system {
        built.insert(
            ns.to_string(),
            NameserverRecord::discovered(*ns, Provenance::System, baseline_in_use),
        );
    }
    // Lease and link lists only relabel addresses that reached the resolver list.
    for (list, provenance) in [(&sources.dhcp, Provenance::Dhcp), (&sources.ppp, Provenance::Ppp)] {
        let relabel: BTreeSet<&str> = list
            .iter()
            .map(String::as_str)
            .filter(|ns| system.contains(ns))
            .collect();
        for ns in relabel {
            built.insert(
                ns.to_string(),
                NameserverRecord::discovered(ns, provenance, baseline_in_use),
            );
        }
    }

    for entry in &sources.configured {
        let record = built.entry(entry.server.clone()).or_insert_with(|| {
            let mut r = NameserverRecord::discovered(&entry.server, Provenance::Configuration, true);
            r.domain_override_only = true;
            r
        });
        record.provenance = Provenance::Configuration;
        record.in_use = true;
        match &entry.domain {
            Some(domain) => record.domains.push(domain.clone()),
            None => record.domain_override_only = false,
        }
    }
    for record in built.values_mut() {
        record.domains.sort();
        record.domains.dedup();
    }
    built
}

/// Merge the daemon's self-reported records with the observed sources.
///
/// Self-reported records keep their counters and position and take their
/// attribution from the sources. Records the sources know about but the daemon
/// did not report are appended in address order. The result has one record
/// per address and does not depend on the order of the source lists.
pub fn merge_provenance(
    reported: Vec<NameserverRecord>,
    sources: &ProvenanceSources,
) -> Vec<NameserverRecord> {
    let built = build_records(sources);

    let mut out: Vec<NameserverRecord> = Vec::with_capacity(reported.len() + built.len());
    let mut index: HashMap<String, usize> = HashMap::new();
    for record in reported {
        match index.get(&record.address) {
            Some(&i) => {
                let existing = &mut out[i];
                existing.port = record.port;
                existing.queries_sent = record.queries_sent;
                existing.queries_retried_or_failed = record.queries_retried_or_failed;
            }
            None => {
                index.insert(record.address.clone(), out.len());
                out.push(record);
            }
        }
    }

    for record in out.iter_mut() {
        if let Some(b) = built.get(&record.address) {
            record.provenance = b.provenance;
            record.in_use = b.in_use;
            record.domain_override_only = b.domain_override_only;
            record.domains = b.domains.clone();
        }
    }

    let mut unreported: Vec<NameserverRecord> = built
        .into_iter()
        .filter(|(address, _)| !index.contains_key(address))
        .map(|(_, record)| record)
        .collect();
    unreported.sort_by_key(|r| address_key(&r.address));
    out.extend(unreported);
    out
}
