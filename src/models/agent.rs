// Server-side per-agent bookkeeping and fleet query results

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DomainMetrics, SystemMetrics};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentState {
    pub agent_id: String,
    /// Last hostname seen in a report or heartbeat.
    #[serde(default)]
    pub hostname: String,
    /// Agent build version; only heartbeats carry it.
    #[serde(default)]
    pub version: String,
    pub last_startup_time: DateTime<Utc>,
    pub last_report_time: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub restart_count: u32,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Online,
    Offline,
}

/// Row of `GET /api/agents`: the stored state plus status derived from the agent timeout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSummary {
    #[serde(flatten)]
    pub state: AgentState,
    pub status: AgentStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartReason {
    /// Reported startup time is later than the recorded one.
    StartupTimeAdvanced,
    /// Some domain counter is smaller than in the previous report.
    CountersDecreased,
}

/// Outcome of restart detection for one report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartDetection {
    pub is_restart: bool,
    pub reason: Option<RestartReason>,
    pub previous_startup: Option<DateTime<Utc>>,
    pub current_startup: DateTime<Utc>,
    pub restart_count: u32,
}

impl RestartDetection {
    pub fn none(current_startup: DateTime<Utc>) -> Self {
        Self {
            is_restart: false,
            reason: None,
            previous_startup: None,
            current_startup,
            restart_count: 0,
        }
    }
}

/// Fleet-wide view returned by `GET /api/cumulative`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CumulativeMetrics {
    pub domain_stats: BTreeMap<String, DomainMetrics>,
    pub system_stats: SystemMetrics,
    pub generated_at: DateTime<Utc>,
    /// Agents whose last heartbeat is within the agent timeout window.
    pub data_sources: Vec<String>,
}

impl CumulativeMetrics {
    /// Builds the query result from a copy of the global map, summing system-wide totals.
    pub fn from_global(
        domain_stats: BTreeMap<String, DomainMetrics>,
        data_sources: Vec<String>,
        generated_at: DateTime<Utc>,
    ) -> Self {
        let mut system_stats = SystemMetrics {
            active_domains: domain_stats.len(),
            ..Default::default()
        };
        for stats in domain_stats.values() {
            system_stats.total_connections = system_stats
                .total_connections
                .saturating_add(stats.connection_count);
            system_stats.total_bytes_sent = system_stats
                .total_bytes_sent
                .saturating_add(stats.bytes_sent);
            system_stats.total_bytes_received = system_stats
                .total_bytes_received
                .saturating_add(stats.bytes_received);
        }
        Self {
            domain_stats,
            system_stats,
            generated_at,
            data_sources,
        }
    }
}
