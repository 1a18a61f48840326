use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde_json::json;

use crate::metrics::get_metrics;
use crate::startup::AppState;

/// Liveness: the agent process is up.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "service": "mesh-registrar",
            "version": env!("CARGO_PKG_VERSION"),
            "registered": state.status.is_registered(),
            "identity": state.identity,
            "load_balancer": state.load_balancer.to_string(),
        })),
    )
}

/// Readiness: the registration has been written at least once.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.status.is_registered() {
        (StatusCode::OK, Json(json!({"status": "ready"})))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "registering"})),
        )
    }
}

pub async fn metrics_endpoint() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}
