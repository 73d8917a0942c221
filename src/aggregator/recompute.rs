// Full-recompute aggregation for small fleets: the global map is rebuilt from every
// active agent's contribution and cached for a short TTL. Any mutation drops the cache,
// and a cached map is only reused while the set of active agents at `now` is unchanged.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use super::tracking::AgentTracker;
use super::{AggregatorOptions, AggregatorStats, MetricsAggregator};
use crate::error::AggregationError;
use crate::models::{
    AgentInfo, AgentState, AgentSummary, CumulativeMetrics, DomainMetrics, Report,
    RestartDetection,
};

struct CachedGlobal {
    computed_at: Instant,
    sources: Vec<String>,
    global: BTreeMap<String, DomainMetrics>,
}

pub struct RecomputingAggregator {
    tracker: RwLock<AgentTracker>,
    cache: Mutex<Option<CachedGlobal>>,
    options: AggregatorOptions,
    cache_ttl: Duration,
}

impl RecomputingAggregator {
    pub fn new(options: AggregatorOptions, cache_ttl: Duration) -> Self {
        Self {
            tracker: RwLock::new(AgentTracker::new()),
            cache: Mutex::new(None),
            options,
            cache_ttl,
        }
    }

    fn invalidate(&self) {
        *self.cache.lock() = None;
    }

    /// Global map and the sorted active agents it was summed over, both evaluated at `now`.
    fn global_at(&self, now: DateTime<Utc>) -> (BTreeMap<String, DomainMetrics>, Vec<String>) {
        let tracker = self.tracker.read();
        let sources = tracker.active_agents(self.options.agent_timeout, now);
        let mut cache = self.cache.lock();
        if let Some(cached) = cache.as_ref()
            && cached.computed_at.elapsed() < self.cache_ttl
            && cached.sources == sources
        {
            return (cached.global.clone(), sources);
        }

        let mut global: BTreeMap<String, DomainMetrics> = BTreeMap::new();
        for agent_id in &sources {
            for (domain, stats) in tracker.contribution(agent_id) {
                global
                    .entry(domain.clone())
                    .or_insert_with(|| DomainMetrics::new(domain))
                    .merge(&stats);
            }
        }
        global.retain(|_, m| !m.is_zero());
        *cache = Some(CachedGlobal {
            computed_at: Instant::now(),
            sources: sources.clone(),
            global: global.clone(),
        });
        (global, sources)
    }
}

impl MetricsAggregator for RecomputingAggregator {
    fn process_metrics_at(&self, report: Report, now: DateTime<Utc>) -> RestartDetection {
        let agent_id = report.agent_id.clone();
        let domains = report.delta_stats.len();
        let detection = self.tracker.write().observe(report, now, &self.options);
        self.invalidate();

        if detection.is_restart {
            info!(
                agent_id = %agent_id,
                reason = ?detection.reason,
                restart_count = detection.restart_count,
                "agent restart detected"
            );
        }
        debug!(agent_id = %agent_id, domains, "processed metrics report");
        detection
    }

    fn cumulative_metrics_at(&self, now: DateTime<Utc>) -> CumulativeMetrics {
        let (global, data_sources) = self.global_at(now);
        CumulativeMetrics::from_global(global, data_sources, now)
    }

    fn domain_metrics(&self, domain: &str) -> Result<DomainMetrics, AggregationError> {
        self.global_at(Utc::now())
            .0
            .remove(domain)
            .ok_or_else(|| AggregationError::DomainNotFound(domain.to_string()))
    }

    fn cleanup_expired_data_at(&self, max_age: Duration, now: DateTime<Utc>) -> Vec<String> {
        let expired = {
            let mut tracker = self.tracker.write();
            let expired = tracker.expired_agents(max_age, now);
            for agent_id in &expired {
                tracker.remove(agent_id);
            }
            expired
        };
        if !expired.is_empty() {
            self.invalidate();
            info!(agents = expired.len(), "cleaned up expired agent data");
        }
        expired
    }

    fn record_heartbeat_at(&self, agent_id: &str, now: DateTime<Utc>) -> bool {
        let known = self.tracker.write().touch(agent_id, now);
        if known {
            self.invalidate();
        }
        known
    }

    fn record_agent_info_at(&self, info: &AgentInfo, now: DateTime<Utc>) -> bool {
        let known = self.tracker.write().touch_with_info(info, now);
        if known {
            self.invalidate();
        }
        known
    }

    fn agent_summaries_at(&self, now: DateTime<Utc>) -> Vec<AgentSummary> {
        self.tracker
            .read()
            .summaries(self.options.agent_timeout, now)
    }

    fn agents(&self) -> Vec<AgentState> {
        let mut agents: Vec<AgentState> = self.tracker.read().agent_states().cloned().collect();
        agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        agents
    }

    fn stats_at(&self, now: DateTime<Utc>) -> AggregatorStats {
        let agents = self.tracker.read().len();
        let (global, sources) = self.global_at(now);
        AggregatorStats {
            agents,
            active_agents: sources.len(),
            domains: global.len(),
        }
    }
}
