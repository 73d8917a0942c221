// Background cleanup worker: expires silent agents and logs aggregator stats.

use std::sync::Arc;

use tokio::time::{Duration, interval};
use tracing::Instrument;

use crate::aggregator::MetricsAggregator;

/// Aggregator handle and shutdown signal for the worker.
pub struct WorkerDeps {
    pub aggregator: Arc<dyn MetricsAggregator>,
    pub shutdown_rx: tokio::sync::oneshot::Receiver<()>,
}

/// Worker timing. Both intervals are real time.
pub struct WorkerConfig {
    /// How often to run expiry.
    pub cleanup_interval: Duration,
    /// Agents whose last heartbeat is older than this are dropped.
    pub cleanup_max_age: Duration,
    /// How often to log aggregator stats.
    pub stats_log_interval: Duration,
}

pub fn spawn(deps: WorkerDeps, config: WorkerConfig) -> tokio::task::JoinHandle<()> {
    let WorkerDeps {
        aggregator,
        mut shutdown_rx,
    } = deps;
    let WorkerConfig {
        cleanup_interval,
        cleanup_max_age,
        stats_log_interval,
    } = config;

    let worker_span = tracing::span!(
        tracing::Level::DEBUG,
        "cleanup_worker",
        cleanup_interval_secs = cleanup_interval.as_secs()
    );

    tokio::spawn(
        async move {
            let mut cleanup_tick = interval(cleanup_interval);
            cleanup_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut stats_log_tick = interval(stats_log_interval);
            stats_log_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            let mut agents_expired_total: u64 = 0;

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        tracing::debug!("Worker shutting down");
                        break;
                    }
                    _ = cleanup_tick.tick() => {
                        let removed = aggregator.cleanup_expired_data(cleanup_max_age);
                        if removed.is_empty() {
                            tracing::debug!(operation = "cleanup_expired_data", "No expired agents");
                        } else {
                            agents_expired_total += removed.len() as u64;
                            tracing::info!(
                                operation = "cleanup_expired_data",
                                removed = removed.len(),
                                agents = ?removed,
                                "Expired agents removed"
                            );
                        }
                    }
                    _ = stats_log_tick.tick() => {
                        let stats = aggregator.stats();
                        tracing::info!(
                            agents = stats.agents,
                            active_agents = stats.active_agents,
                            domains = stats.domains,
                            agents_expired_total,
                            "aggregator stats"
                        );
                    }
                }
            }
        }
        .instrument(worker_span),
    )
}
