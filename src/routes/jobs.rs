use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::job::{ErrorKind, JobStatus, JobView};
use crate::routes::ApiError;
use crate::services::dispatcher::CancelResult;

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    #[serde(alias = "operation")]
    pub operation_type: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<JobStatus>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

/// POST /api/v1/jobs: validate and queue a raster operation.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<SubmitJobRequest>,
) -> Result<(StatusCode, Json<SubmitJobResponse>), ApiError> {
    let job_id = state
        .jobs
        .submit(&request.operation_type, request.parameters)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitJobResponse {
            job_id,
            status: JobStatus::Pending,
            message: "Job queued for processing".to_string(),
        }),
    ))
}

/// GET /api/v1/jobs/{job_id}: current status. Unknown ids get a 404 carrying
/// a well-formed view with `found = false`.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> (StatusCode, Json<JobView>) {
    let view = state.jobs.get_job(job_id).await;
    let code = if view.found {
        StatusCode::OK
    } else if view.error_kind == Some(ErrorKind::NotFound) {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(view))
}

/// GET /api/v1/jobs: newest first, optionally filtered by status.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Vec<JobView>>, ApiError> {
    Ok(Json(state.jobs.list_jobs(query.status, query.limit).await?))
}

/// POST /api/v1/jobs/{job_id}/cancel
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<CancelResult>, ApiError> {
    Ok(Json(state.jobs.cancel(job_id).await?))
}
