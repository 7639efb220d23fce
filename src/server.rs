//! Admin HTTP router.
//!
//! Exposes `/health`, a JSON summary of every node in the local cluster,
//! and `/metrics` in Prometheus text format.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::metrics::metrics_handler;
use crate::AppState;

/// Build the admin [`Router`].
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// `GET /health` -- node summary plus the last workload report.
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let network = state.cluster.network();
    let nodes: Vec<_> = state
        .cluster
        .nodes()
        .iter()
        .map(|node| {
            json!({
                "name": node.name(),
                "endpoint": node.endpoint().to_string(),
                "datacenter": node.datacenter(),
                "applied": node.applier().applied_count(),
                "pending": node.applier().pending_count(),
                "isolated": network.is_isolated(node.endpoint()),
            })
        })
        .collect();
    let report = state.last_report.read().await.clone();

    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "nodes": nodes,
            "messages": {
                "delivered": network.delivered(),
                "dropped": network.dropped(),
            },
            "last_report": report,
        })),
    )
}
