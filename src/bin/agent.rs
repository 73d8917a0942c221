use anyhow::Result;
use netmon::collector::spawn_collector;
use netmon::config::AgentAppConfig;
use netmon::reporter::{AgentIdentity, Reporter};
use netmon::sysinfo_source::SysinfoSource;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    netmon::logging::init();

    let app_config = AgentAppConfig::load()?;
    let identity = AgentIdentity::detect(app_config.agent.agent_id.clone());
    tracing::info!(
        agent_id = %identity.agent_id,
        hostname = %identity.hostname,
        "agent starting"
    );

    let reporter = Arc::new(Reporter::new(app_config.reporter.clone(), identity.clone())?);
    reporter.start();

    let source = Arc::new(SysinfoSource::new(identity.agent_id.clone()));
    let cancel = CancellationToken::new();
    let collector = spawn_collector(
        source,
        reporter.clone(),
        Duration::from_millis(app_config.agent.collect_interval_ms),
        cancel.clone(),
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal");

    cancel.cancel();
    if let Err(e) = collector.await {
        tracing::warn!(error = %e, "collector task ended abnormally");
    }
    reporter.stop().await;

    let stats = reporter.stats();
    tracing::info!(
        total_reports = stats.total_reports,
        success_reports = stats.success_reports,
        failed_reports = stats.failed_reports,
        retry_count = stats.retry_count,
        dropped_reports = stats.dropped_reports,
        "agent stopped"
    );
    Ok(())
}
