// Delivery seam between the reporter and the ingest server

use std::future::Future;

use bytes::Bytes;
use reqwest::Url;
use reqwest::header::CONTENT_TYPE;

use crate::config::ReporterConfig;
use crate::error::ReporterError;
use crate::models::{AgentInfo, ReportResponse};
use crate::version::VERSION;

/// Moves serialized reports and heartbeats to the server.
///
/// `send_report` receives a body that was serialized once per batch, so retries resend
/// the same bytes. Any error for which [`ReporterError::is_retryable`] holds is retried by
/// the caller.
pub trait Transport: Send + Sync + 'static {
    fn send_report(&self, body: Bytes) -> impl Future<Output = Result<(), ReporterError>> + Send;

    fn send_heartbeat(
        &self,
        info: &AgentInfo,
    ) -> impl Future<Output = Result<(), ReporterError>> + Send;
}

pub struct HttpTransport {
    client: reqwest::Client,
    report_url: Url,
    heartbeat_url: Url,
    agent_id: String,
    hostname: String,
}

fn parse_url(raw: &str) -> Result<Url, ReporterError> {
    Url::parse(raw).map_err(|e| ReporterError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })
}

impl HttpTransport {
    pub fn new(
        config: &ReporterConfig,
        agent_id: impl Into<String>,
        hostname: impl Into<String>,
    ) -> Result<Self, ReporterError> {
        let report_url = parse_url(&config.server_url)?;
        let heartbeat_url = match &config.heartbeat_url {
            Some(raw) => parse_url(raw)?,
            None => report_url
                .join("heartbeat")
                .map_err(|e| ReporterError::InvalidUrl {
                    url: config.server_url.clone(),
                    reason: e.to_string(),
                })?,
        };
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(format!("netmon-agent/{VERSION}"))
            .build()?;

        Ok(Self {
            client,
            report_url,
            heartbeat_url,
            agent_id: agent_id.into(),
            hostname: hostname.into(),
        })
    }

    pub fn report_url(&self) -> &Url {
        &self.report_url
    }

    pub fn heartbeat_url(&self) -> &Url {
        &self.heartbeat_url
    }

    async fn post(&self, url: &Url, body: Bytes) -> Result<ReportResponse, ReporterError> {
        let resp = self
            .client
            .post(url.clone())
            .header(CONTENT_TYPE, "application/json")
            .header("X-Agent-ID", self.agent_id.as_str())
            .header("X-Hostname", self.hostname.as_str())
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.bytes().await?;
        if status != reqwest::StatusCode::OK {
            return Err(ReporterError::Status(status.as_u16()));
        }

        let response: ReportResponse = serde_json::from_slice(&body)
            .map_err(|e| ReporterError::Rejected(format!("unreadable response: {e}")))?;
        if !response.success {
            return Err(ReporterError::Rejected(response.message));
        }
        Ok(response)
    }
}

impl Transport for HttpTransport {
    async fn send_report(&self, body: Bytes) -> Result<(), ReporterError> {
        let response = self.post(&self.report_url, body).await?;
        tracing::debug!(message = %response.message, "report accepted");
        Ok(())
    }

    async fn send_heartbeat(&self, info: &AgentInfo) -> Result<(), ReporterError> {
        let body = Bytes::from(serde_json::to_vec(info)?);
        self.post(&self.heartbeat_url, body).await?;
        Ok(())
    }
}
