use anyhow::Result;
use netmon::*;
use std::time::Duration;

/// Upper bound on waiting for the cleanup worker after a shutdown signal.
const WORKER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let app_config = config::ServerAppConfig::load()?;
    let aggregator = aggregator::build(&app_config.aggregation);
    tracing::info!(
        strategy = ?app_config.aggregation.strategy,
        agent_timeout_secs = app_config.aggregation.agent_timeout_secs,
        restart_detection = app_config.aggregation.restart_detection,
        baseline_tracking = app_config.aggregation.baseline_tracking,
        "aggregator ready"
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let worker_handle = worker::spawn(
        worker::WorkerDeps {
            aggregator: aggregator.clone(),
            shutdown_rx,
        },
        worker::WorkerConfig {
            cleanup_interval: Duration::from_secs(app_config.aggregation.cleanup_interval_secs),
            cleanup_max_age: app_config.aggregation.cleanup_max_age(),
            stats_log_interval: Duration::from_secs(
                app_config.monitoring.stats_log_interval_secs,
            ),
        },
    );

    let app = routes::app(aggregator);
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Received shutdown signal");
    let _ = shutdown_tx.send(());
    if tokio::time::timeout(WORKER_SHUTDOWN_TIMEOUT, worker_handle)
        .await
        .is_err()
    {
        tracing::warn!("cleanup worker did not stop in time");
    }

    Ok(())
}
