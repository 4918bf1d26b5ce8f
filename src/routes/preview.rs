use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use std::str::FromStr;

use crate::app_state::AppState;
use crate::models::operation::{
    ClipParams, MosaicParams, OperationKind, ReprojectParams, ResampleParams,
};
use crate::routes::ApiError;

/// POST /api/v1/preview/{operation}: inspect inputs without creating a job.
/// The body carries the same parameters as a job submission.
pub async fn preview_operation(
    State(state): State<AppState>,
    Path(operation): Path<String>,
    Json(parameters): Json<serde_json::Value>,
) -> Result<Response, ApiError> {
    let kind = OperationKind::from_str(&operation)
        .map_err(|_| ApiError::bad_request(format!("Unsupported operation type: {operation}")))?;
    let previews = state.jobs.previews();

    let response = match kind {
        OperationKind::Clip => Json(previews.clip(&params::<ClipParams>(parameters)?).await?).into_response(),
        OperationKind::Reproject => {
            Json(previews.reproject(&params::<ReprojectParams>(parameters)?).await?).into_response()
        }
        OperationKind::Resample => {
            Json(previews.resample(&params::<ResampleParams>(parameters)?).await?).into_response()
        }
        OperationKind::Mosaic => {
            Json(previews.mosaic(&params::<MosaicParams>(parameters)?).await?).into_response()
        }
    };
    Ok(response)
}

fn params<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, ApiError> {
    serde_json::from_value(value).map_err(|e| ApiError::bad_request(format!("Invalid parameters: {e}")))
}
