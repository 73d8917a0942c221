// Host interface counters via sysinfo

use std::sync::Arc;

use chrono::Utc;
use sysinfo::{Networks, System};
use tracing::instrument;

use crate::collector::MetricsSource;
use crate::models::Snapshot;

#[derive(Debug, Default, Clone, Copy)]
struct Totals {
    bytes_sent: u64,
    bytes_received: u64,
    packets_sent: u64,
    packets_received: u64,
}

/// Reports host-wide interface totals cumulative since this source was created.
/// Per-domain maps stay empty; domain attribution needs a packet capture source.
pub struct SysinfoSource {
    networks: Arc<std::sync::Mutex<(Networks, Totals)>>,
    host_id: String,
    hostname: String,
}

impl SysinfoSource {
    pub fn new(host_id: impl Into<String>) -> Self {
        // Baseline refresh so the first snapshot only counts traffic after startup.
        let networks = Networks::new_with_refreshed_list();
        Self {
            networks: Arc::new(std::sync::Mutex::new((networks, Totals::default()))),
            host_id: host_id.into(),
            hostname: System::host_name().unwrap_or_default(),
        }
    }
}

impl MetricsSource for SysinfoSource {
    #[instrument(skip(self), fields(source = "sysinfo", operation = "snapshot"))]
    async fn snapshot(&self) -> anyhow::Result<Snapshot> {
        let networks = self.networks.clone();
        let totals = tokio::task::spawn_blocking(move || {
            let mut guard = networks
                .lock()
                .map_err(|e| anyhow::anyhow!("sysinfo networks lock poisoned: {}", e))?;
            let (networks, totals) = &mut *guard;
            networks.refresh(true);
            // transmitted()/received() are deltas since the previous refresh.
            for data in networks.list().values() {
                totals.bytes_sent = totals.bytes_sent.saturating_add(data.transmitted());
                totals.bytes_received = totals.bytes_received.saturating_add(data.received());
                totals.packets_sent = totals
                    .packets_sent
                    .saturating_add(data.packets_transmitted());
                totals.packets_received = totals
                    .packets_received
                    .saturating_add(data.packets_received());
            }
            Ok::<_, anyhow::Error>(*totals)
        })
        .await
        .map_err(|e| anyhow::anyhow!("sysinfo task join: {}", e))??;

        Ok(Snapshot {
            timestamp: Utc::now(),
            host_id: self.host_id.clone(),
            hostname: self.hostname.clone(),
            total_bytes_sent: totals.bytes_sent,
            total_bytes_received: totals.bytes_received,
            total_packets_sent: totals.packets_sent,
            total_packets_received: totals.packets_received,
            ..Default::default()
        })
    }
}
