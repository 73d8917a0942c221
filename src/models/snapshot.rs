// Point-in-time network snapshot produced by a metrics source

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::DomainMetrics;

/// Counters cumulative since the producing process started.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub host_id: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub total_connections: u64,
    #[serde(default)]
    pub total_bytes_sent: u64,
    #[serde(default)]
    pub total_bytes_received: u64,
    #[serde(default)]
    pub total_packets_sent: u64,
    #[serde(default)]
    pub total_packets_received: u64,
    #[serde(default)]
    pub domain_stats: BTreeMap<String, DomainMetrics>,
    #[serde(default)]
    pub ips_accessed: BTreeMap<String, u64>,
    #[serde(default)]
    pub protocol_stats: BTreeMap<String, u64>,
    #[serde(default)]
    pub port_stats: BTreeMap<u16, u64>,
}

impl Snapshot {
    /// Field-wise merge of `other` into `self`: totals and map counts are summed,
    /// domain entries merge with latest `last_access_time`, timestamp keeps the later one.
    pub fn merge(&mut self, other: &Snapshot) {
        if other.timestamp > self.timestamp {
            self.timestamp = other.timestamp;
        }
        if self.host_id.is_empty() {
            self.host_id.clone_from(&other.host_id);
        }
        if self.hostname.is_empty() {
            self.hostname.clone_from(&other.hostname);
        }
        self.total_connections = self.total_connections.saturating_add(other.total_connections);
        self.total_bytes_sent = self.total_bytes_sent.saturating_add(other.total_bytes_sent);
        self.total_bytes_received = self
            .total_bytes_received
            .saturating_add(other.total_bytes_received);
        self.total_packets_sent = self.total_packets_sent.saturating_add(other.total_packets_sent);
        self.total_packets_received = self
            .total_packets_received
            .saturating_add(other.total_packets_received);

        for (domain, metrics) in &other.domain_stats {
            self.domain_stats
                .entry(domain.clone())
                .or_insert_with(|| DomainMetrics::new(domain.clone()))
                .merge(metrics);
        }
        sum_into(&mut self.ips_accessed, &other.ips_accessed);
        sum_into(&mut self.protocol_stats, &other.protocol_stats);
        sum_into(&mut self.port_stats, &other.port_stats);
    }

    /// Merge a batch of snapshots into one. Returns `None` for an empty batch.
    pub fn merge_all(batch: &[Snapshot]) -> Option<Snapshot> {
        let (first, rest) = batch.split_first()?;
        let mut combined = first.clone();
        for s in rest {
            combined.merge(s);
        }
        Some(combined)
    }
}

fn sum_into<K: Ord + Clone>(target: &mut BTreeMap<K, u64>, source: &BTreeMap<K, u64>) {
    for (k, v) in source {
        let entry = target.entry(k.clone()).or_insert(0);
        *entry = entry.saturating_add(*v);
    }
}
