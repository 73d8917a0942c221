// Agent collection loop: poll a metrics source, hand snapshots to the reporter

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use crate::error::ReporterError;
use crate::models::Snapshot;
use crate::reporter::Reporter;
use crate::transport::Transport;

/// Anything that can produce a point-in-time snapshot with counters cumulative since
/// the source started (packet capture, eBPF maps, interface counters).
pub trait MetricsSource: Send + Sync + 'static {
    fn snapshot(&self) -> impl Future<Output = anyhow::Result<Snapshot>> + Send;
}

/// Polls `source` every `every` until `cancel` fires. Source errors and a full
/// reporter queue are logged; the loop keeps going.
pub fn spawn_collector<S, T>(
    source: Arc<S>,
    reporter: Arc<Reporter<T>>,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    S: MetricsSource,
    T: Transport,
{
    tokio::spawn(async move {
        let mut tick = interval(every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut dropped: u64 = 0;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {
                    let snapshot = match source.snapshot().await {
                        Ok(s) => s,
                        Err(e) => {
                            tracing::warn!(error = %e, operation = "snapshot", "metrics source failed");
                            continue;
                        }
                    };
                    match reporter.report(snapshot) {
                        Ok(()) => {}
                        Err(ReporterError::QueueFull) => {
                            dropped += 1;
                            tracing::warn!(dropped, "reporter queue full, snapshot dropped");
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, "reporter no longer accepting snapshots");
                            break;
                        }
                    }
                }
            }
        }
        tracing::debug!("collector shutting down");
    })
}
