// Incremental, restart-aware cumulative aggregation.
// All mutation goes through one write lock; no I/O (including logging) happens while it is held.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, instrument};

use super::ledger::ContributionLedger;
use super::tracking::AgentTracker;
use super::{AggregatorOptions, AggregatorStats, MetricsAggregator};
use crate::error::AggregationError;
use crate::models::{
    AgentInfo, AgentState, AgentSummary, CumulativeMetrics, DomainMetrics, Report,
    RestartDetection,
};

#[derive(Debug, Default)]
struct ManagerState {
    tracker: AgentTracker,
    ledger: ContributionLedger,
    last_updated: Option<DateTime<Utc>>,
}

/// Structural copy of everything the manager holds, for inspection.
#[derive(Debug, Clone, Serialize)]
pub struct StorageSnapshot {
    pub raw_metrics: BTreeMap<String, Report>,
    pub agent_states: BTreeMap<String, AgentState>,
    pub restart_baselines: BTreeMap<String, BTreeMap<String, DomainMetrics>>,
    pub contributions: BTreeMap<String, BTreeMap<String, DomainMetrics>>,
    pub global_cumulative: BTreeMap<String, DomainMetrics>,
    pub last_updated: Option<DateTime<Utc>>,
}

pub struct CumulativeManager {
    state: RwLock<ManagerState>,
    options: AggregatorOptions,
}

impl CumulativeManager {
    pub fn new(options: AggregatorOptions) -> Self {
        Self {
            state: RwLock::new(ManagerState::default()),
            options,
        }
    }

    pub fn storage_snapshot(&self) -> StorageSnapshot {
        let state = self.state.read();
        StorageSnapshot {
            raw_metrics: state
                .tracker
                .raw_last_reports()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            agent_states: state
                .tracker
                .agent_states()
                .map(|s| (s.agent_id.clone(), s.clone()))
                .collect(),
            restart_baselines: state
                .tracker
                .baselines()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            contributions: state
                .ledger
                .entries()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            global_cumulative: state.ledger.global().clone(),
            last_updated: state.last_updated,
        }
    }

    /// Global map recomputed from the ledger entries; equals the incremental global.
    pub fn resummed_global(&self) -> BTreeMap<String, DomainMetrics> {
        self.state.read().ledger.resum()
    }
}

impl MetricsAggregator for CumulativeManager {
    #[instrument(skip(self, report, now), fields(agent_id = %report.agent_id, domains = report.delta_stats.len()))]
    fn process_metrics_at(&self, report: Report, now: DateTime<Utc>) -> RestartDetection {
        let agent_id = report.agent_id.clone();
        let (detection, touched) = {
            let mut guard = self.state.write();
            let ManagerState {
                tracker,
                ledger,
                last_updated,
            } = &mut *guard;
            let detection = tracker.observe(report, now, &self.options);
            let touched = ledger.replace_agent(&agent_id, tracker.contribution(&agent_id));
            *last_updated = Some(now);
            (detection, touched)
        };

        if detection.is_restart {
            info!(
                agent_id = %agent_id,
                reason = ?detection.reason,
                previous_startup = ?detection.previous_startup,
                current_startup = %detection.current_startup,
                restart_count = detection.restart_count,
                "agent restart detected"
            );
        }
        debug!(
            restart_detected = detection.is_restart,
            domains_touched = touched,
            "processed metrics report"
        );
        detection
    }

    fn cumulative_metrics_at(&self, now: DateTime<Utc>) -> CumulativeMetrics {
        let state = self.state.read();
        let data_sources = state.tracker.active_agents(self.options.agent_timeout, now);
        CumulativeMetrics::from_global(state.ledger.global().clone(), data_sources, now)
    }

    fn domain_metrics(&self, domain: &str) -> Result<DomainMetrics, AggregationError> {
        self.state
            .read()
            .ledger
            .get(domain)
            .cloned()
            .ok_or_else(|| AggregationError::DomainNotFound(domain.to_string()))
    }

    #[instrument(skip(self, now), fields(max_age_secs = max_age.as_secs()))]
    fn cleanup_expired_data_at(&self, max_age: Duration, now: DateTime<Utc>) -> Vec<String> {
        let removed: Vec<(String, Vec<String>)> = {
            let mut guard = self.state.write();
            let ManagerState {
                tracker,
                ledger,
                last_updated,
            } = &mut *guard;
            let expired = tracker.expired_agents(max_age, now);
            let removed = expired
                .into_iter()
                .map(|agent_id| {
                    let gone = ledger.remove_agent(&agent_id);
                    tracker.remove(&agent_id);
                    (agent_id, gone)
                })
                .collect::<Vec<_>>();
            if !removed.is_empty() {
                *last_updated = Some(now);
            }
            removed
        };

        for (agent_id, domains) in &removed {
            info!(
                agent_id = %agent_id,
                domains_removed = domains.len(),
                "cleaned up expired agent data"
            );
        }
        removed.into_iter().map(|(id, _)| id).collect()
    }

    fn record_heartbeat_at(&self, agent_id: &str, now: DateTime<Utc>) -> bool {
        self.state.write().tracker.touch(agent_id, now)
    }

    fn record_agent_info_at(&self, info: &AgentInfo, now: DateTime<Utc>) -> bool {
        self.state.write().tracker.touch_with_info(info, now)
    }

    fn agent_summaries_at(&self, now: DateTime<Utc>) -> Vec<AgentSummary> {
        self.state
            .read()
            .tracker
            .summaries(self.options.agent_timeout, now)
    }

    fn agents(&self) -> Vec<AgentState> {
        let state = self.state.read();
        let mut agents: Vec<AgentState> = state.tracker.agent_states().cloned().collect();
        agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        agents
    }

    fn stats_at(&self, now: DateTime<Utc>) -> AggregatorStats {
        let state = self.state.read();
        AggregatorStats {
            agents: state.tracker.len(),
            active_agents: state
                .tracker
                .active_agents(self.options.agent_timeout, now)
                .len(),
            domains: state.ledger.global().len(),
        }
    }
}
