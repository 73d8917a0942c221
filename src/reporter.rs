// Agent-side reporter: bounded queue, batch flusher, fixed-delay retry, heartbeat.
// Delivery is best-effort; every lost snapshot or batch shows up in the stats.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

use crate::config::{FlushMode, ReporterConfig};
use crate::error::ReporterError;
use crate::models::{AgentInfo, ReportRequest, Snapshot};
use crate::transport::{HttpTransport, Transport};
use crate::version::VERSION;

/// Who is reporting: stamped on every request and heartbeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentIdentity {
    pub agent_id: String,
    pub hostname: String,
    pub startup_time: DateTime<Utc>,
}

impl AgentIdentity {
    /// Uses the local hostname; without a configured id the agent id is
    /// "<hostname>-<unix secs>", so every process start gets a fresh id.
    pub fn detect(agent_id: Option<String>) -> Self {
        let hostname = sysinfo::System::host_name().unwrap_or_else(|| "unknown".to_string());
        let agent_id = agent_id.unwrap_or_else(|| {
            let secs = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            format!("{hostname}-{secs}")
        });
        Self {
            agent_id,
            hostname,
            startup_time: Utc::now(),
        }
    }
}

/// Delivery counters. `total_reports` counts flushed batches; each batch ends as exactly
/// one success or one failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReporterStats {
    pub total_reports: u64,
    pub success_reports: u64,
    pub failed_reports: u64,
    /// Retry attempts across all batches (not counting first attempts).
    pub retry_count: u64,
    /// Snapshots rejected because the queue was full.
    pub dropped_reports: u64,
    pub last_report_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Snapshots waiting in the queue right now.
    pub queue_size: usize,
    /// Snapshots in the most recently flushed batch.
    pub batch_size: usize,
}

struct Shared<T> {
    transport: T,
    config: ReporterConfig,
    identity: AgentIdentity,
    stats: Mutex<ReporterStats>,
}

pub struct Reporter<T: Transport = HttpTransport> {
    shared: Arc<Shared<T>>,
    tx: mpsc::Sender<Snapshot>,
    rx: Mutex<Option<mpsc::Receiver<Snapshot>>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Reporter<HttpTransport> {
    /// Reporter delivering over HTTP to `config.server_url`.
    pub fn new(config: ReporterConfig, identity: AgentIdentity) -> Result<Self, ReporterError> {
        let transport = HttpTransport::new(&config, &identity.agent_id, &identity.hostname)?;
        Ok(Self::with_transport(config, identity, transport))
    }
}

impl<T: Transport> Reporter<T> {
    pub fn with_transport(config: ReporterConfig, identity: AgentIdentity, transport: T) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity().max(1));
        Self {
            shared: Arc::new(Shared {
                transport,
                config,
                identity,
                stats: Mutex::new(ReporterStats::default()),
            }),
            tx,
            rx: Mutex::new(Some(rx)),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Enqueues a snapshot without waiting. A full queue drops the snapshot and
    /// returns `QueueFull`; nothing is retried.
    pub fn report(&self, snapshot: Snapshot) -> Result<(), ReporterError> {
        if self.cancel.is_cancelled() {
            return Err(ReporterError::Stopped);
        }
        match self.tx.try_send(snapshot) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.shared.stats.lock().dropped_reports += 1;
                Err(ReporterError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(ReporterError::Stopped),
        }
    }

    /// Spawns the flush and heartbeat tasks. Calling it again is a no-op.
    pub fn start(&self) {
        let Some(rx) = self.rx.lock().take() else {
            tracing::debug!("reporter already started");
            return;
        };
        let flush = tokio::spawn(run_flusher(
            Arc::clone(&self.shared),
            rx,
            self.cancel.clone(),
        ));
        let heartbeat = tokio::spawn(run_heartbeat(Arc::clone(&self.shared), self.cancel.clone()));
        self.tasks.lock().extend([flush, heartbeat]);
        tracing::info!(
            agent_id = %self.shared.identity.agent_id,
            server_url = %self.shared.config.server_url,
            batch_size = self.shared.config.batch_size,
            flush_mode = ?self.shared.config.flush_mode,
            "reporter started"
        );
    }

    /// Cancels both tasks, lets the flusher send what is still queued, and waits for
    /// them at most `shutdown_timeout`.
    ///
    /// Nothing is lost silently. Snapshots still queued when the reporter was never started,
    /// or when the timeout fires, count as dropped. A batch still in delivery at the timeout
    /// counts as failed.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let unstarted = self.rx.lock().take();
        if let Some(mut rx) = unstarted {
            rx.close();
            let mut discarded = 0u64;
            while rx.try_recv().is_ok() {
                discarded += 1;
            }
            if discarded > 0 {
                self.shared.stats.lock().dropped_reports += discarded;
                tracing::warn!(discarded, "reporter stopped before start, queued snapshots dropped");
            }
        }

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        if handles.is_empty() {
            return;
        }
        let aborts: Vec<AbortHandle> = handles.iter().map(JoinHandle::abort_handle).collect();
        let timeout = self.shared.config.shutdown_timeout();
        match tokio::time::timeout(timeout, futures_util::future::join_all(handles)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        tracing::warn!(error = %e, "reporter task ended abnormally");
                    }
                }
                tracing::info!("reporter stopped");
            }
            Err(_) => {
                let queued = (self.tx.max_capacity() - self.tx.capacity()) as u64;
                for abort in &aborts {
                    abort.abort();
                }
                let abandoned = {
                    let mut stats = self.shared.stats.lock();
                    let settled = stats.success_reports + stats.failed_reports;
                    let abandoned = stats.total_reports.saturating_sub(settled);
                    if abandoned > 0 {
                        stats.failed_reports += abandoned;
                        stats.last_error = Some("shutdown timed out during delivery".to_string());
                    }
                    stats.dropped_reports += queued;
                    abandoned
                };
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    abandoned_batches = abandoned,
                    dropped_snapshots = queued,
                    "reporter shutdown timed out, abandoning in-flight work"
                );
            }
        }
    }

    pub fn stats(&self) -> ReporterStats {
        let mut stats = self.shared.stats.lock().clone();
        stats.queue_size = self.tx.max_capacity() - self.tx.capacity();
        stats
    }
}

async fn run_flusher<T: Transport>(
    shared: Arc<Shared<T>>,
    mut rx: mpsc::Receiver<Snapshot>,
    cancel: CancellationToken,
) {
    let batch_size = shared.config.batch_size.max(1);
    let period = shared.config.flush_interval();
    let mut tick = interval_at(Instant::now() + period, period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut batch: Vec<Snapshot> = Vec::with_capacity(batch_size);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            item = rx.recv() => {
                let Some(snapshot) = item else { break };
                batch.push(snapshot);
                while batch.len() < batch_size {
                    match rx.try_recv() {
                        Ok(snapshot) => batch.push(snapshot),
                        Err(_) => break,
                    }
                }
                if batch.len() >= batch_size {
                    flush(&shared, std::mem::take(&mut batch)).await;
                }
            }
            _ = tick.tick() => {
                if !batch.is_empty() {
                    flush(&shared, std::mem::take(&mut batch)).await;
                }
            }
        }
    }

    rx.close();
    while let Ok(snapshot) = rx.try_recv() {
        batch.push(snapshot);
        if batch.len() >= batch_size {
            flush(&shared, std::mem::take(&mut batch)).await;
        }
    }
    if !batch.is_empty() {
        flush(&shared, batch).await;
    }
    tracing::debug!("flush task shutting down");
}

/// Collapses the batch per the flush mode and wraps it in an ingest request.
fn build_request(shared: &Shared<impl Transport>, batch: &[Snapshot]) -> Option<ReportRequest> {
    let metrics = match shared.config.flush_mode {
        FlushMode::Latest => batch.last().cloned(),
        FlushMode::Merge => Snapshot::merge_all(batch),
    }?;
    Some(ReportRequest {
        agent_id: shared.identity.agent_id.clone(),
        hostname: shared.identity.hostname.clone(),
        timestamp: Utc::now(),
        startup_time: Some(shared.identity.startup_time),
        metrics,
    })
}

async fn flush<T: Transport>(shared: &Shared<T>, batch: Vec<Snapshot>) {
    let Some(request) = build_request(shared, &batch) else {
        return;
    };
    {
        let mut stats = shared.stats.lock();
        stats.total_reports += 1;
        stats.batch_size = batch.len();
    }

    let body = match serde_json::to_vec(&request) {
        Ok(body) => Bytes::from(body),
        Err(e) => {
            let err = ReporterError::from(e);
            tracing::error!(error = %err, "failed to serialize report, dropping batch");
            record_failure(shared, &err);
            return;
        }
    };

    let retry_count = shared.config.retry_count;
    let retry_delay = shared.config.retry_delay();
    let mut attempt: u32 = 0;
    loop {
        match shared.transport.send_report(body.clone()).await {
            Ok(()) => {
                let mut stats = shared.stats.lock();
                stats.success_reports += 1;
                stats.last_report_time = Some(Utc::now());
                drop(stats);
                tracing::debug!(
                    snapshots = batch.len(),
                    bytes = body.len(),
                    attempts = attempt + 1,
                    "report delivered"
                );
                return;
            }
            Err(e) if e.is_retryable() && attempt < retry_count => {
                attempt += 1;
                shared.stats.lock().retry_count += 1;
                tracing::warn!(
                    error = %e,
                    attempt,
                    retry_count,
                    retry_delay_ms = retry_delay.as_millis() as u64,
                    "report delivery failed, retrying"
                );
                tokio::time::sleep(retry_delay).await;
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    attempts = attempt + 1,
                    snapshots = batch.len(),
                    "report delivery failed, giving up"
                );
                record_failure(shared, &e);
                return;
            }
        }
    }
}

fn record_failure<T>(shared: &Shared<T>, err: &ReporterError) {
    let mut stats = shared.stats.lock();
    stats.failed_reports += 1;
    stats.last_error = Some(err.to_string());
}

async fn run_heartbeat<T: Transport>(shared: Arc<Shared<T>>, cancel: CancellationToken) {
    let period = shared.config.heartbeat_interval();
    let mut tick = interval_at(Instant::now() + period, period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                let info = AgentInfo {
                    id: shared.identity.agent_id.clone(),
                    hostname: shared.identity.hostname.clone(),
                    version: VERSION.to_string(),
                    start_time: shared.identity.startup_time,
                    last_seen: Utc::now(),
                    status: "running".to_string(),
                };
                match shared.transport.send_heartbeat(&info).await {
                    Ok(()) => tracing::debug!("heartbeat sent"),
                    Err(e) => tracing::warn!(error = %e, "heartbeat failed"),
                }
            }
        }
    }
    tracing::debug!("heartbeat task shutting down");
}
