// Server-side aggregation: restart detection, baselines, fleet-wide cumulative view.
// Two strategies share one external contract; a deployment picks exactly one at startup.

mod ledger;
mod manager;
mod recompute;
mod tracking;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{AggregationConfig, AggregationStrategy};
use crate::error::AggregationError;
use crate::models::{
    AgentInfo, AgentState, AgentSummary, CumulativeMetrics, DomainMetrics, Report,
    RestartDetection,
};

pub use ledger::ContributionLedger;
pub use manager::{CumulativeManager, StorageSnapshot};
pub use recompute::RecomputingAggregator;
pub use tracking::AgentTracker;

#[derive(Debug, Clone)]
pub struct AggregatorOptions {
    /// Window within which an agent counts as an active data source.
    pub agent_timeout: Duration,
    pub enable_restart_detection: bool,
    pub enable_baseline_tracking: bool,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self {
            agent_timeout: Duration::from_secs(300),
            enable_restart_detection: true,
            enable_baseline_tracking: true,
        }
    }
}

/// Counts for the periodic stats log line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AggregatorStats {
    pub agents: usize,
    pub active_agents: usize,
    pub domains: usize,
}

/// Operations the ingest and query endpoints run against the fleet aggregate.
///
/// The `_at` variants take the current time explicitly so expiry and liveness can be
/// driven deterministically; the plain variants use the wall clock.
pub trait MetricsAggregator: Send + Sync {
    /// Folds one agent report into the aggregate. Never fails: arithmetic
    /// inconsistencies are clamped at zero.
    fn process_metrics_at(&self, report: Report, now: DateTime<Utc>) -> RestartDetection;

    fn process_metrics(&self, report: Report) -> RestartDetection {
        self.process_metrics_at(report, Utc::now())
    }

    fn cumulative_metrics_at(&self, now: DateTime<Utc>) -> CumulativeMetrics;

    fn cumulative_metrics(&self) -> CumulativeMetrics {
        self.cumulative_metrics_at(Utc::now())
    }

    fn domain_metrics(&self, domain: &str) -> Result<DomainMetrics, AggregationError>;

    /// Drops every agent whose last heartbeat is older than `max_age` together with its
    /// contribution. Returns the removed agent ids, sorted.
    fn cleanup_expired_data_at(&self, max_age: Duration, now: DateTime<Utc>) -> Vec<String>;

    fn cleanup_expired_data(&self, max_age: Duration) -> Vec<String> {
        self.cleanup_expired_data_at(max_age, Utc::now())
    }

    /// Refreshes liveness of a known agent. Returns false for unknown ids.
    fn record_heartbeat_at(&self, agent_id: &str, now: DateTime<Utc>) -> bool;

    fn record_heartbeat(&self, agent_id: &str) -> bool {
        self.record_heartbeat_at(agent_id, Utc::now())
    }

    /// Heartbeat carrying the agent's self-description. Refreshes liveness and stores
    /// hostname and version. Returns false for unknown ids.
    fn record_agent_info_at(&self, info: &AgentInfo, now: DateTime<Utc>) -> bool;

    fn record_agent_info(&self, info: &AgentInfo) -> bool {
        self.record_agent_info_at(info, Utc::now())
    }

    /// Known agents sorted by id.
    fn agents(&self) -> Vec<AgentState>;

    /// Known agents with online/offline status relative to the agent timeout.
    fn agent_summaries_at(&self, now: DateTime<Utc>) -> Vec<AgentSummary>;

    fn agent_summaries(&self) -> Vec<AgentSummary> {
        self.agent_summaries_at(Utc::now())
    }

    fn stats_at(&self, now: DateTime<Utc>) -> AggregatorStats;

    fn stats(&self) -> AggregatorStats {
        self.stats_at(Utc::now())
    }
}

/// Builds the aggregator selected by `config.strategy`.
pub fn build(config: &AggregationConfig) -> Arc<dyn MetricsAggregator> {
    let options = config.options();
    match config.strategy {
        AggregationStrategy::Incremental => Arc::new(CumulativeManager::new(options)),
        AggregationStrategy::Recompute => Arc::new(RecomputingAggregator::new(
            options,
            Duration::from_secs(config.cache_ttl_secs),
        )),
    }
}
