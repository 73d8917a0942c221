// HTTP routes: ingest (agents) and query (dashboards, operators)

mod http;
mod ingest;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::aggregator::MetricsAggregator;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) aggregator: Arc<dyn MetricsAggregator>,
}

pub fn app(aggregator: Arc<dyn MetricsAggregator>) -> Router {
    let state = AppState { aggregator };
    Router::new()
        .route("/metrics", post(ingest::ingest_metrics)) // POST /metrics
        .route("/heartbeat", post(ingest::heartbeat)) // POST /heartbeat
        .route("/api/cumulative", get(http::cumulative_handler)) // GET /api/cumulative
        .route("/api/domains/{domain}", get(http::domain_handler)) // GET /api/domains/{domain}
        .route("/api/agents", get(http::agents_handler)) // GET /api/agents
        .route("/health", get(http::health_handler)) // GET /health
        .route("/version", get(http::version_handler)) // GET /version
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
