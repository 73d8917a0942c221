// Error taxonomy for the reporting and aggregation pipeline

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::models::ReportResponse;

/// Agent-side failures. Callers of `Reporter::report` only ever see `QueueFull` or `Stopped`;
/// the rest are handled inside the flush task.
#[derive(Error, Debug)]
pub enum ReporterError {
    /// Queue saturated; the snapshot was dropped and counted.
    #[error("report queue is full, snapshot dropped")]
    QueueFull,

    #[error("reporter is stopped")]
    Stopped,

    /// Connection, timeout or body read failure.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server returned status {0}")]
    Status(u16),

    #[error("server rejected report: {0}")]
    Rejected(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl ReporterError {
    /// Transient delivery failures are retried with the fixed delay; everything else is not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReporterError::Transport(_) | ReporterError::Status(_) | ReporterError::Rejected(_)
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AggregationError {
    #[error("domain {0} not found")]
    DomainNotFound(String),
}

/// Errors surfaced by the HTTP handlers.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("invalid request body: {0}")]
    MalformedRequest(String),

    #[error(transparent)]
    Aggregation(#[from] AggregationError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Aggregation(AggregationError::DomainNotFound(_)) => StatusCode::NOT_FOUND,
        };
        (status, Json(ReportResponse::rejected(self.to_string()))).into_response()
    }
}
