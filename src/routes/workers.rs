use axum::extract::State;
use axum::Json;

use crate::app_state::AppState;
use crate::models::worker::WorkerStatus;

/// GET /api/v1/workers: executors of this process and the operations they accept.
pub async fn worker_status(State(state): State<AppState>) -> Json<WorkerStatus> {
    Json(state.jobs.get_worker_status().await)
}
