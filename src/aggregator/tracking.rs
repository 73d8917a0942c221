// Per-agent bookkeeping shared by both aggregation strategies:
// last raw report, agent state, restart baselines.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use super::AggregatorOptions;
use crate::models::{
    AgentInfo, AgentState, AgentStatus, AgentSummary, DomainMetrics, Report, RestartDetection,
    RestartReason,
};

#[derive(Debug, Clone, Default)]
pub struct AgentTracker {
    raw_last_report: HashMap<String, Report>,
    agent_states: HashMap<String, AgentState>,
    baselines: HashMap<String, BTreeMap<String, DomainMetrics>>,
}

pub(crate) fn to_time_delta(d: Duration) -> TimeDelta {
    TimeDelta::from_std(d).unwrap_or(TimeDelta::MAX)
}

impl AgentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// First-ever report is never a restart. Otherwise a later startup time, or
    /// (fallback) any domain counter smaller than in the previous report, is one.
    pub fn detect_restart(&self, report: &Report, options: &AggregatorOptions) -> RestartDetection {
        let mut result = RestartDetection::none(report.startup_time);
        if !options.enable_restart_detection {
            return result;
        }
        let Some(state) = self.agent_states.get(&report.agent_id) else {
            return result;
        };

        if report.startup_time > state.last_startup_time {
            result.is_restart = true;
            result.reason = Some(RestartReason::StartupTimeAdvanced);
            result.previous_startup = Some(state.last_startup_time);
            result.restart_count = state.restart_count + 1;
            return result;
        }

        if let Some(previous) = self.raw_last_report.get(&report.agent_id) {
            let decreased = report.delta_stats.iter().any(|(domain, current)| {
                previous
                    .delta_stats
                    .get(domain)
                    .is_some_and(|last| current.has_decreased_from(last))
            });
            if decreased {
                result.is_restart = true;
                result.reason = Some(RestartReason::CountersDecreased);
                result.previous_startup = Some(state.last_startup_time);
                result.restart_count = state.restart_count + 1;
            }
        }
        result
    }

    /// Runs restart detection, carries the previous report into the baseline on restart,
    /// updates the agent state and stores `report` as the agent's latest raw report.
    pub fn observe(
        &mut self,
        report: Report,
        now: DateTime<Utc>,
        options: &AggregatorOptions,
    ) -> RestartDetection {
        let detection = self.detect_restart(&report, options);
        if detection.is_restart && options.enable_baseline_tracking {
            self.carry_forward_baseline(&report.agent_id);
        }
        self.update_agent_state(&report, &detection, now);
        self.raw_last_report.insert(report.agent_id.clone(), report);
        detection
    }

    fn carry_forward_baseline(&mut self, agent_id: &str) {
        let Some(previous) = self.raw_last_report.get(agent_id) else {
            return;
        };
        let baseline = self.baselines.entry(agent_id.to_string()).or_default();
        for (domain, stats) in &previous.delta_stats {
            baseline
                .entry(domain.clone())
                .or_insert_with(|| DomainMetrics::new(domain.clone()))
                .merge(stats);
        }
    }

    fn update_agent_state(&mut self, report: &Report, detection: &RestartDetection, now: DateTime<Utc>) {
        let state = self
            .agent_states
            .entry(report.agent_id.clone())
            .or_insert_with(|| AgentState {
                agent_id: report.agent_id.clone(),
                hostname: String::new(),
                version: String::new(),
                last_startup_time: report.startup_time,
                last_report_time: report.report_time,
                last_heartbeat: now,
                restart_count: 0,
                is_active: true,
            });
        if !report.system_info.hostname.is_empty() {
            state.hostname.clone_from(&report.system_info.hostname);
        }
        state.last_report_time = report.report_time;
        state.last_heartbeat = now;
        state.is_active = true;
        if detection.is_restart {
            state.restart_count += 1;
            state.last_startup_time = report.startup_time;
        }
    }

    /// The agent's real contribution per domain: baseline ⊕ latest raw counters,
    /// over the union of baseline and reported domains.
    pub fn contribution(&self, agent_id: &str) -> BTreeMap<String, DomainMetrics> {
        let mut out: BTreeMap<String, DomainMetrics> = self
            .baselines
            .get(agent_id)
            .cloned()
            .unwrap_or_default();
        if let Some(report) = self.raw_last_report.get(agent_id) {
            for (domain, stats) in &report.delta_stats {
                out.entry(domain.clone())
                    .or_insert_with(|| DomainMetrics::new(domain.clone()))
                    .merge(stats);
            }
        }
        for (domain, stats) in out.iter_mut() {
            stats.domain.clone_from(domain);
        }
        out
    }

    /// Refreshes `last_heartbeat` for a known agent. Unknown agents are ignored.
    pub fn touch(&mut self, agent_id: &str, now: DateTime<Utc>) -> bool {
        match self.agent_states.get_mut(agent_id) {
            Some(state) => {
                state.last_heartbeat = now;
                state.is_active = true;
                true
            }
            None => false,
        }
    }

    /// Like `touch`, and also records the hostname and version the heartbeat carries.
    pub fn touch_with_info(&mut self, info: &AgentInfo, now: DateTime<Utc>) -> bool {
        let Some(state) = self.agent_states.get_mut(&info.id) else {
            return false;
        };
        state.last_heartbeat = now;
        state.is_active = true;
        if !info.hostname.is_empty() {
            state.hostname.clone_from(&info.hostname);
        }
        if !info.version.is_empty() {
            state.version.clone_from(&info.version);
        }
        true
    }

    pub fn is_live(state: &AgentState, timeout: Duration, now: DateTime<Utc>) -> bool {
        state.is_active && now - state.last_heartbeat < to_time_delta(timeout)
    }

    /// Sorted ids of agents heard from within `timeout`.
    pub fn active_agents(&self, timeout: Duration, now: DateTime<Utc>) -> Vec<String> {
        let mut ids: Vec<String> = self
            .agent_states
            .values()
            .filter(|s| Self::is_live(s, timeout, now))
            .map(|s| s.agent_id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Every known agent sorted by id, marked online when heard from within `timeout`.
    pub fn summaries(&self, timeout: Duration, now: DateTime<Utc>) -> Vec<AgentSummary> {
        let mut rows: Vec<AgentSummary> = self
            .agent_states
            .values()
            .map(|s| AgentSummary {
                state: s.clone(),
                status: if Self::is_live(s, timeout, now) {
                    AgentStatus::Online
                } else {
                    AgentStatus::Offline
                },
            })
            .collect();
        rows.sort_by(|a, b| a.state.agent_id.cmp(&b.state.agent_id));
        rows
    }

    /// Sorted ids of agents whose last heartbeat is older than `max_age`.
    pub fn expired_agents(&self, max_age: Duration, now: DateTime<Utc>) -> Vec<String> {
        let max_age = to_time_delta(max_age);
        let mut ids: Vec<String> = self
            .agent_states
            .values()
            .filter(|s| now - s.last_heartbeat > max_age)
            .map(|s| s.agent_id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn remove(&mut self, agent_id: &str) {
        self.raw_last_report.remove(agent_id);
        self.agent_states.remove(agent_id);
        self.baselines.remove(agent_id);
    }

    pub fn agent_states(&self) -> impl Iterator<Item = &AgentState> {
        self.agent_states.values()
    }

    pub fn raw_last_reports(&self) -> &HashMap<String, Report> {
        &self.raw_last_report
    }

    pub fn baselines(&self) -> &HashMap<String, BTreeMap<String, DomainMetrics>> {
        &self.baselines
    }

    pub fn len(&self) -> usize {
        self.agent_states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agent_states.is_empty()
    }
}
