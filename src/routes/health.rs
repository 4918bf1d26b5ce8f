use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;
use crate::models::worker::{HealthState, SystemHealth};

#[derive(Serialize)]
pub struct HealthResponse {
    pub version: String,
    #[serde(flatten)]
    pub system: SystemHealth,
}

/// GET /health: store, broker and executor health.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let system = state.jobs.health().await;

    let status_code = match system.status {
        HealthState::Healthy | HealthState::Degraded => StatusCode::OK,
        HealthState::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    let response = HealthResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        system,
    };

    (status_code, Json(response))
}
