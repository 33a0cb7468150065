//! Logging API routes.
//!
//! Read and replace the runtime log filter.

use axum::{Json, Router, extract::State, routing::get};
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_logging_config).put(update_logging_config))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfigResponse {
    pub filter: String,
    pub log_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateLogFilterRequest {
    /// EnvFilter directive, e.g. `songsmith=debug,sqlx=warn`.
    pub filter: String,
}

fn response(config: &crate::logging::LoggingConfig) -> LoggingConfigResponse {
    LoggingConfigResponse {
        filter: config.get_filter(),
        log_dir: config.log_dir().display().to_string(),
    }
}

async fn get_logging_config(
    State(state): State<AppState>,
) -> ApiResult<Json<LoggingConfigResponse>> {
    let logging_config = state
        .logging_config
        .as_ref()
        .ok_or_else(|| ApiError::internal("Logging configuration not available"))?;
    Ok(Json(response(logging_config)))
}

async fn update_logging_config(
    State(state): State<AppState>,
    Json(request): Json<UpdateLogFilterRequest>,
) -> ApiResult<Json<LoggingConfigResponse>> {
    let logging_config = state
        .logging_config
        .as_ref()
        .ok_or_else(|| ApiError::internal("Logging configuration not available"))?;

    logging_config
        .set_filter(&request.filter)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    Ok(Json(response(logging_config)))
}
