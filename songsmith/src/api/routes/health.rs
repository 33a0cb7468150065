//! Health check routes.

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};

use crate::api::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/live", get(liveness_check))
        .route("/ready", get(readiness_check))
}

/// Liveness check - is the process responsive?
async fn liveness_check(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.start_time.elapsed().as_secs();
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "alive",
            "uptime_secs": uptime
        })),
    )
}

/// Readiness check - 200 once the recovery sweep ran and until shutdown starts.
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let generation = &state.generation;
    let status = if generation.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(serde_json::json!({
            "ready": generation.is_ready(),
            "shutting_down": generation.is_shutting_down(),
            "active_jobs": generation.active_job_count(),
        })),
    )
}
