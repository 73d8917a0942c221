// Per-domain counters and the field-wise arithmetic the aggregator is built on

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Access counters for one domain. Within one agent lifetime every counter is non-decreasing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainMetrics {
    pub domain: String,
    #[serde(default)]
    pub access_count: u64,
    #[serde(default)]
    pub bytes_sent: u64,
    #[serde(default)]
    pub bytes_received: u64,
    #[serde(default)]
    pub connection_count: u64,
    #[serde(default)]
    pub last_access_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub protocol_stats: BTreeMap<String, u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub port_stats: BTreeMap<u16, u64>,
}

impl DomainMetrics {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            ..Default::default()
        }
    }

    /// Field-wise add: counters and non-zero sub-map entries are summed, `last_access_time` keeps the later value.
    pub fn merge(&mut self, other: &DomainMetrics) {
        self.access_count = self.access_count.saturating_add(other.access_count);
        self.bytes_sent = self.bytes_sent.saturating_add(other.bytes_sent);
        self.bytes_received = self.bytes_received.saturating_add(other.bytes_received);
        self.connection_count = self.connection_count.saturating_add(other.connection_count);
        if other.last_access_time > self.last_access_time {
            self.last_access_time = other.last_access_time;
        }
        for (protocol, count) in other.protocol_stats.iter().filter(|(_, c)| **c > 0) {
            let entry = self.protocol_stats.entry(protocol.clone()).or_insert(0);
            *entry = entry.saturating_add(*count);
        }
        for (port, count) in other.port_stats.iter().filter(|(_, c)| **c > 0) {
            let entry = self.port_stats.entry(*port).or_insert(0);
            *entry = entry.saturating_add(*count);
        }
    }

    /// Field-wise subtract clamped at zero. Sub-map entries that reach zero are removed.
    /// `last_access_time` is left untouched.
    pub fn subtract(&mut self, other: &DomainMetrics) {
        self.access_count = self.access_count.saturating_sub(other.access_count);
        self.bytes_sent = self.bytes_sent.saturating_sub(other.bytes_sent);
        self.bytes_received = self.bytes_received.saturating_sub(other.bytes_received);
        self.connection_count = self.connection_count.saturating_sub(other.connection_count);
        for (protocol, count) in &other.protocol_stats {
            if let Some(entry) = self.protocol_stats.get_mut(protocol) {
                *entry = entry.saturating_sub(*count);
                if *entry == 0 {
                    self.protocol_stats.remove(protocol);
                }
            }
        }
        for (port, count) in &other.port_stats {
            if let Some(entry) = self.port_stats.get_mut(port) {
                *entry = entry.saturating_sub(*count);
                if *entry == 0 {
                    self.port_stats.remove(port);
                }
            }
        }
    }

    /// True when every counter is zero and both sub-maps are empty.
    pub fn is_zero(&self) -> bool {
        self.access_count == 0
            && self.bytes_sent == 0
            && self.bytes_received == 0
            && self.connection_count == 0
            && self.protocol_stats.is_empty()
            && self.port_stats.is_empty()
    }

    /// True if any top-level counter went backwards relative to `previous`.
    pub fn has_decreased_from(&self, previous: &DomainMetrics) -> bool {
        self.access_count < previous.access_count
            || self.bytes_sent < previous.bytes_sent
            || self.bytes_received < previous.bytes_received
            || self.connection_count < previous.connection_count
    }

    /// Counters only (no timestamps); handy for comparing aggregates.
    pub fn counters(&self) -> (u64, u64, u64, u64) {
        (
            self.access_count,
            self.bytes_sent,
            self.bytes_received,
            self.connection_count,
        )
    }
}
