// Wire contract between agent and server

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DomainMetrics, Snapshot};
use crate::version::VERSION;

/// Body of `POST /metrics`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRequest {
    pub agent_id: String,
    #[serde(default)]
    pub hostname: String,
    pub timestamp: DateTime<Utc>,
    /// Startup time of the reporting agent process. Older agents omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup_time: Option<DateTime<Utc>>,
    pub metrics: Snapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ReportResponse {
    pub fn accepted(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Host-level totals carried alongside a report; also used for fleet-wide sums.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemMetrics {
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub total_connections: u64,
    #[serde(default)]
    pub total_bytes_sent: u64,
    #[serde(default)]
    pub total_bytes_received: u64,
    #[serde(default)]
    pub active_domains: usize,
    #[serde(default)]
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportMetadata {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub report_mode: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

/// One agent's per-domain counters as of `report_time`, cumulative since `startup_time`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub agent_id: String,
    pub startup_time: DateTime<Utc>,
    pub report_time: DateTime<Utc>,
    #[serde(default)]
    pub delta_stats: BTreeMap<String, DomainMetrics>,
    #[serde(default)]
    pub system_info: SystemMetrics,
    #[serde(default)]
    pub metadata: ReportMetadata,
}

impl Report {
    /// Decoded ingest request -> report. A missing startup time maps to the Unix epoch,
    /// which never counts as "later", so only the counter-decrease heuristic can flag a restart.
    pub fn from_request(request: ReportRequest) -> Self {
        let ReportRequest {
            agent_id,
            hostname,
            timestamp,
            startup_time,
            metrics,
        } = request;
        let startup_time = startup_time.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let uptime_seconds = (timestamp - startup_time).num_seconds().max(0) as u64;

        let delta_stats: BTreeMap<String, DomainMetrics> = metrics
            .domain_stats
            .into_iter()
            .map(|(domain, mut stats)| {
                stats.domain.clone_from(&domain);
                (domain, stats)
            })
            .collect();

        let system_info = SystemMetrics {
            hostname,
            total_connections: metrics.total_connections,
            total_bytes_sent: metrics.total_bytes_sent,
            total_bytes_received: metrics.total_bytes_received,
            active_domains: delta_stats.len(),
            uptime_seconds,
        };

        Report {
            agent_id,
            startup_time,
            report_time: timestamp,
            delta_stats,
            system_info,
            metadata: ReportMetadata {
                version: VERSION.to_string(),
                report_mode: "cumulative".to_string(),
                tags: BTreeMap::new(),
            },
        }
    }
}

/// Liveness record posted by the agent's heartbeat task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub id: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub version: String,
    pub start_time: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub status: String,
}
