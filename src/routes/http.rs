// GET handlers: cumulative view, single domain, agents, health, version

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};

use super::AppState;
use crate::error::ApiError;
use crate::models::{AgentSummary, CumulativeMetrics, DomainMetrics};
use crate::version::{NAME, VERSION};

/// GET /version: service name and version (from Cargo.toml at build time).
pub(super) async fn version_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": NAME,
        "version": VERSION,
    }))
}

/// GET /health: liveness plus aggregator counts.
pub(super) async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.aggregator.stats();
    Json(serde_json::json!({
        "status": "ok",
        "agents": stats.agents,
        "active_agents": stats.active_agents,
        "domains": stats.domains,
    }))
}

/// GET /api/cumulative: fleet-wide per-domain totals and active data sources.
pub(super) async fn cumulative_handler(State(state): State<AppState>) -> Json<CumulativeMetrics> {
    Json(state.aggregator.cumulative_metrics())
}

pub(super) async fn domain_handler(
    State(state): State<AppState>,
    Path(domain): Path<String>,
) -> Result<Json<DomainMetrics>, ApiError> {
    Ok(Json(state.aggregator.domain_metrics(&domain)?))
}

/// GET /api/agents: every known agent with hostname, version and online/offline status.
pub(super) async fn agents_handler(State(state): State<AppState>) -> Json<Vec<AgentSummary>> {
    Json(state.aggregator.agent_summaries())
}
