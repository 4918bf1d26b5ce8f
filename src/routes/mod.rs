pub mod health;
pub mod jobs;
pub mod metrics;
pub mod preview;
pub mod workers;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::app_state::AppState;
use crate::services::dispatcher::DispatchError;
use crate::services::operations::OperationError;

/// Job, worker, preview and health routes. `/metrics` is mounted by the binary
/// because it needs the Prometheus handle.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/jobs", post(jobs::submit_job).get(jobs::list_jobs))
        .route("/api/v1/jobs/{job_id}", get(jobs::get_job_status))
        .route("/api/v1/jobs/{job_id}/cancel", post(jobs::cancel_job))
        .route("/api/v1/workers", get(workers::worker_status))
        .route("/api/v1/preview/{operation}", post(preview::preview_operation))
        .with_state(state)
}

/// JSON error body: `{"error": {"kind": ..., "message": ...}}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "error": { "kind": self.kind, "message": self.message } });
        (self.status, Json(body)).into_response()
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::Validation(v) => Self::new(StatusCode::UNPROCESSABLE_ENTITY, "validation", v.to_string()),
            DispatchError::Store(_) | DispatchError::Queue(_) => {
                tracing::error!(error = %e, "Job system unavailable");
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "internal", e.to_string())
            }
        }
    }
}

impl From<OperationError> for ApiError {
    fn from(e: OperationError) -> Self {
        let (status, kind) = match &e {
            OperationError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
            OperationError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            OperationError::InvalidFormat(_) => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_format"),
            OperationError::Processing(_) => (StatusCode::BAD_GATEWAY, "processing"),
            OperationError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            OperationError::Cancelled => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        Self::new(status, kind, e.to_string())
    }
}
