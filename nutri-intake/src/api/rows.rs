//! Row endpoints
//!
//! GET /rows/:id, POST /rows/:id/process, POST /rows/:id/retry,
//! POST /rows/:id/ignore

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use super::track;
use crate::db::staging::get_row;
use crate::error::{ApiError, ApiResult};
use crate::models::StagingRow;
use crate::services::RowOutcome;
use crate::AppState;

/// POST /rows/:id/ignore request. Both fields are required; missing and
/// blank values get the same 400.
#[derive(Debug, Default, Deserialize)]
pub struct IgnoreRequest {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub ignored_by: Option<String>,
}

/// GET /rows/:id
pub async fn get_row_by_id(State(state): State<AppState>, Path(row_id): Path<i64>) -> ApiResult<Json<StagingRow>> {
    let result = get_row(&state.db, row_id).await.map_err(ApiError::from);
    track(&state, result)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Staging row {row_id}")))
}

/// POST /rows/:id/process
///
/// Reconcile one row. A row failure is a 200 with `outcome: "failed"`.
pub async fn process_row(State(state): State<AppState>, Path(row_id): Path<i64>) -> ApiResult<Json<RowOutcome>> {
    let result = state
        .reconciler
        .reconcile_row(row_id)
        .await
        .map_err(ApiError::from);
    Ok(Json(track(&state, result).await?))
}

/// POST /rows/:id/retry
pub async fn retry_row(State(state): State<AppState>, Path(row_id): Path<i64>) -> ApiResult<Json<StagingRow>> {
    let result = state.reconciler.retry_row(row_id).await.map_err(ApiError::from);
    Ok(Json(track(&state, result).await?))
}

/// POST /rows/:id/ignore
pub async fn ignore_row(
    State(state): State<AppState>,
    Path(row_id): Path<i64>,
    Json(request): Json<IgnoreRequest>,
) -> ApiResult<Json<StagingRow>> {
    let result = state
        .reconciler
        .ignore_row(
            row_id,
            request.reason.as_deref().unwrap_or_default(),
            request.ignored_by.as_deref().unwrap_or_default(),
        )
        .await
        .map_err(ApiError::from);
    Ok(Json(track(&state, result).await?))
}

/// Build row routes
pub fn row_routes() -> Router<AppState> {
    Router::new()
        .route("/rows/:id", get(get_row_by_id))
        .route("/rows/:id/process", post(process_row))
        .route("/rows/:id/retry", post(retry_row))
        .route("/rows/:id/ignore", post(ignore_row))
}
