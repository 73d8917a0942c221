// Shared test helpers
#![allow(dead_code)]

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use netmon::models::*;

/// Fixed base instant so tests never depend on the wall clock.
pub fn ts(offset_secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + offset_secs, 0).unwrap()
}

/// Domain metrics whose byte and connection counters are derived from `access`.
pub fn domain(name: &str, access: u64) -> DomainMetrics {
    DomainMetrics {
        domain: name.to_string(),
        access_count: access,
        bytes_sent: access * 100,
        bytes_received: access * 1000,
        connection_count: access,
        ..DomainMetrics::new(name)
    }
}

/// Report from `agent` with the given startup and report offsets and per-domain access counts.
pub fn report(agent: &str, startup: i64, at: i64, domains: &[(&str, u64)]) -> Report {
    let delta_stats: BTreeMap<String, DomainMetrics> = domains
        .iter()
        .map(|(name, access)| {
            let mut m = domain(name, *access);
            m.last_access_time = ts(at);
            (name.to_string(), m)
        })
        .collect();
    Report {
        agent_id: agent.to_string(),
        startup_time: ts(startup),
        report_time: ts(at),
        delta_stats,
        system_info: SystemMetrics::default(),
        metadata: ReportMetadata::default(),
    }
}

pub fn snapshot(domains: &[(&str, u64)]) -> Snapshot {
    Snapshot {
        timestamp: Utc::now(),
        host_id: "host-1".into(),
        hostname: "host-1".into(),
        total_connections: domains.iter().map(|(_, a)| *a).sum(),
        domain_stats: domains
            .iter()
            .map(|(name, access)| (name.to_string(), domain(name, *access)))
            .collect(),
        ..Default::default()
    }
}

/// Counters and sub-maps only; `last_access_time` is "latest seen" and not part of the sum invariant.
pub fn counters_of(
    map: &BTreeMap<String, DomainMetrics>,
) -> BTreeMap<String, ((u64, u64, u64, u64), BTreeMap<String, u64>, BTreeMap<u16, u64>)> {
    map.iter()
        .map(|(d, m)| {
            (
                d.clone(),
                (m.counters(), m.protocol_stats.clone(), m.port_stats.clone()),
            )
        })
        .collect()
}
