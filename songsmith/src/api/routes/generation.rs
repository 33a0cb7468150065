//! Generation job routes.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | POST | `/api/generations` | Submit a generation request (202 Accepted) |
//! | GET | `/api/generations` | List the caller's jobs, newest first |
//! | GET | `/api/generations/{id}` | Poll one job |
//!
//! The caller is identified by the `x-owner-id` header; a job owned by
//! someone else is reported as not found.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::get,
};
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::database::models::{GenerationJob, JobStatus};
use crate::generation::request::GenerationRequest;
use crate::generation::runner::Dispatch;

/// Header carrying the authenticated principal.
pub const OWNER_HEADER: &str = "x-owner-id";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_generations).post(submit_generation))
        .route("/{id}", get(get_generation))
}

/// Response body for an accepted submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub total_items: u32,
    /// `spawned` or the queue name.
    pub dispatched_to: String,
    pub poll_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListParams {
    /// Number of jobs to return (default: 20, max: 100).
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobListResponse {
    pub items: Vec<GenerationJob>,
    pub limit: u32,
    pub offset: u32,
}

fn owner_id(headers: &HeaderMap) -> ApiResult<String> {
    headers
        .get(OWNER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            ApiError::new(
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                format!("missing {OWNER_HEADER} header"),
            )
        })
}

async fn submit_generation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<GenerationRequest>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let owner = owner_id(&headers)?;
    let submission = state.generation.submit(&owner, request).await?;

    let dispatched_to = match submission.dispatch {
        Dispatch::Spawned => "spawned".to_string(),
        Dispatch::Enqueued { queue } => queue,
    };
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            poll_url: format!("/api/generations/{}", submission.job_id),
            job_id: submission.job_id,
            status: JobStatus::Queued,
            total_items: submission.total_items,
            dispatched_to,
        }),
    ))
}

async fn get_generation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<GenerationJob>> {
    let owner = owner_id(&headers)?;
    match state.generation.get_progress(&id).await? {
        Some(job) if job.owner_id == owner => Ok(Json(job)),
        _ => Err(ApiError::not_found(format!(
            "GenerationJob with id '{id}' not found"
        ))),
    }
}

async fn list_generations(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<JobListResponse>> {
    let owner = owner_id(&headers)?;
    let items = state
        .generation
        .list_jobs(&owner, params.limit, params.offset)
        .await?;
    Ok(Json(JobListResponse {
        items,
        limit: params.limit.clamp(1, crate::generation::service::MAX_PAGE_SIZE),
        offset: params.offset,
    }))
}
