// POST handlers used by agents: metrics reports and heartbeats

use axum::{Json, body::Bytes, extract::State};
use serde::de::DeserializeOwned;

use super::AppState;
use crate::error::ApiError;
use crate::models::{AgentInfo, Report, ReportRequest, ReportResponse};

/// Decode failures become a 400 with a JSON error body.
fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::MalformedRequest(e.to_string()))
}

/// POST /metrics: body is a `ReportRequest`. Nothing is mutated unless it decodes.
pub(super) async fn ingest_metrics(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ReportResponse>, ApiError> {
    let request: ReportRequest = decode(&body)?;
    if request.agent_id.trim().is_empty() {
        return Err(ApiError::MalformedRequest("agent_id must be non-empty".into()));
    }

    let report = Report::from_request(request);
    let detection = state.aggregator.process_metrics(report);
    let message = if detection.is_restart {
        "metrics processed, agent restart detected"
    } else {
        "metrics processed"
    };
    Ok(Json(ReportResponse::accepted(message)))
}

/// POST /heartbeat: body is an `AgentInfo`. Unknown agents are acknowledged but not tracked.
pub(super) async fn heartbeat(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ReportResponse>, ApiError> {
    let info: AgentInfo = decode(&body)?;
    let message = if state.aggregator.record_agent_info(&info) {
        "heartbeat recorded"
    } else {
        tracing::debug!(agent_id = %info.id, "heartbeat from agent with no reports yet");
        "agent not yet known"
    };
    Ok(Json(ReportResponse::accepted(message)))
}
