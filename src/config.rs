// TOML configuration for the server and the agent.
// Path comes from CONFIG_FILE; each binary has its own default file name.

use serde::Deserialize;
use std::time::Duration;

use crate::aggregator::AggregatorOptions;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerAppConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

/// Which aggregation strategy the server runs. Chosen once at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationStrategy {
    /// Incremental subtract-then-add over a contribution ledger.
    #[default]
    Incremental,
    /// Full recompute over active agents with a short-lived cache. Small fleets only.
    Recompute,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregationConfig {
    #[serde(default)]
    pub strategy: AggregationStrategy,
    /// Agents silent for longer than this are no longer listed as data sources.
    #[serde(default = "default_agent_timeout_secs")]
    pub agent_timeout_secs: u64,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// Expiry threshold for cleanup; defaults to twice the agent timeout.
    #[serde(default)]
    pub cleanup_max_age_secs: Option<u64>,
    #[serde(default = "default_true")]
    pub restart_detection: bool,
    #[serde(default = "default_true")]
    pub baseline_tracking: bool,
    /// Cache lifetime for the recompute strategy.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

fn default_agent_timeout_secs() -> u64 {
    300
}

fn default_cleanup_interval_secs() -> u64 {
    3600
}

fn default_cache_ttl_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            strategy: AggregationStrategy::default(),
            agent_timeout_secs: default_agent_timeout_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            cleanup_max_age_secs: None,
            restart_detection: true,
            baseline_tracking: true,
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl AggregationConfig {
    pub fn cleanup_max_age(&self) -> Duration {
        Duration::from_secs(
            self.cleanup_max_age_secs
                .unwrap_or(self.agent_timeout_secs.saturating_mul(2)),
        )
    }

    pub fn options(&self) -> AggregatorOptions {
        AggregatorOptions {
            agent_timeout: Duration::from_secs(self.agent_timeout_secs),
            enable_restart_detection: self.restart_detection,
            enable_baseline_tracking: self.baseline_tracking,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    /// How often to log aggregator stats (agents, domains) at INFO level.
    #[serde(default = "default_stats_log_interval_secs")]
    pub stats_log_interval_secs: u64,
}

fn default_stats_log_interval_secs() -> u64 {
    60
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            stats_log_interval_secs: default_stats_log_interval_secs(),
        }
    }
}

impl ServerAppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let s = read_config_file("config.toml")?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: ServerAppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(!self.server.host.is_empty(), "server.host must be non-empty");
        anyhow::ensure!(
            self.aggregation.agent_timeout_secs > 0,
            "aggregation.agent_timeout_secs must be > 0, got {}",
            self.aggregation.agent_timeout_secs
        );
        anyhow::ensure!(
            self.aggregation.cleanup_interval_secs > 0,
            "aggregation.cleanup_interval_secs must be > 0, got {}",
            self.aggregation.cleanup_interval_secs
        );
        if let Some(max_age) = self.aggregation.cleanup_max_age_secs {
            anyhow::ensure!(
                max_age > 0,
                "aggregation.cleanup_max_age_secs must be > 0, got {}",
                max_age
            );
        }
        anyhow::ensure!(
            self.aggregation.cache_ttl_secs > 0,
            "aggregation.cache_ttl_secs must be > 0, got {}",
            self.aggregation.cache_ttl_secs
        );
        anyhow::ensure!(
            self.monitoring.stats_log_interval_secs > 0,
            "monitoring.stats_log_interval_secs must be > 0, got {}",
            self.monitoring.stats_log_interval_secs
        );
        Ok(())
    }
}

/// What the reporter does with several snapshots collected inside one flush window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushMode {
    /// Forward only the most recent snapshot. Correct for cumulative-since-start sources.
    #[default]
    Latest,
    /// Field-wise sum of every pending snapshot. Only correct for sources emitting true deltas.
    Merge,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentAppConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    pub reporter: ReporterConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Fixed agent id. Defaults to "<hostname>-<unix secs at startup>".
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default = "default_collect_interval_ms")]
    pub collect_interval_ms: u64,
}

fn default_collect_interval_ms() -> u64 {
    5000
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_id: None,
            collect_interval_ms: default_collect_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReporterConfig {
    /// Ingest endpoint, e.g. "http://collector:8080/metrics".
    pub server_url: String,
    /// Heartbeat endpoint; defaults to "heartbeat" resolved against `server_url`.
    #[serde(default)]
    pub heartbeat_url: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Additional attempts after the first failed send.
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Flush threshold; the queue holds twice this many snapshots.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Upper bound on how long `stop` waits for the background tasks.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    #[serde(default)]
    pub flush_mode: FlushMode,
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    5_000
}

fn default_batch_size() -> usize {
    10
}

fn default_flush_interval_ms() -> u64 {
    10_000
}

fn default_heartbeat_interval_secs() -> u64 {
    60
}

fn default_shutdown_timeout_ms() -> u64 {
    5_000
}

impl ReporterConfig {
    /// Defaults for everything except the ingest url.
    pub fn with_server_url(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            heartbeat_url: None,
            timeout_ms: default_timeout_ms(),
            retry_count: default_retry_count(),
            retry_delay_ms: default_retry_delay_ms(),
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            flush_mode: FlushMode::default(),
        }
    }

    pub fn queue_capacity(&self) -> usize {
        self.batch_size * 2
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.server_url.is_empty(),
            "reporter.server_url must be non-empty"
        );
        anyhow::ensure!(
            self.timeout_ms > 0,
            "reporter.timeout_ms must be > 0, got {}",
            self.timeout_ms
        );
        anyhow::ensure!(
            self.batch_size > 0,
            "reporter.batch_size must be > 0, got {}",
            self.batch_size
        );
        anyhow::ensure!(
            self.flush_interval_ms > 0,
            "reporter.flush_interval_ms must be > 0, got {}",
            self.flush_interval_ms
        );
        anyhow::ensure!(
            self.heartbeat_interval_secs > 0,
            "reporter.heartbeat_interval_secs must be > 0, got {}",
            self.heartbeat_interval_secs
        );
        anyhow::ensure!(
            self.shutdown_timeout_ms > 0,
            "reporter.shutdown_timeout_ms must be > 0, got {}",
            self.shutdown_timeout_ms
        );
        Ok(())
    }
}

impl AgentAppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let s = read_config_file("agent.toml")?;
        Self::load_from_str(&s)
    }

    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AgentAppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if let Some(id) = &self.agent.agent_id {
            anyhow::ensure!(!id.is_empty(), "agent.agent_id must be non-empty when set");
        }
        anyhow::ensure!(
            self.agent.collect_interval_ms > 0,
            "agent.collect_interval_ms must be > 0, got {}",
            self.agent.collect_interval_ms
        );
        self.reporter.validate()
    }
}

fn read_config_file(default_path: &str) -> anyhow::Result<String> {
    let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| default_path.into());
    Ok(std::fs::read_to_string(&path)?)
}
