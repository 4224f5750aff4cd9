//! Batch endpoints
//!
//! POST /batches, GET /batches, GET /batches/years, GET /batches/:id,
//! GET /batches/:id/rows, POST /batches/:id/process-pending,
//! POST /batches/:id/retry-errors

use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::{clamp_page, track};
use crate::db::batches::{get_batch, list_batches, list_years};
use crate::db::staging::list_rows;
use crate::error::{ApiError, ApiResult};
use crate::models::{Batch, RowState, StagingRow, YearSummary};
use crate::services::{IntakeReport, RetryReport, SweepReport, Upload};
use crate::AppState;

/// Room for the multipart envelope around the file
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
pub struct ListBatchesQuery {
    pub year: Option<i32>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ListRowsQuery {
    pub state: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<u32>,
}

/// One page of a listing
#[derive(Debug, Serialize)]
pub struct PageResponse<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
}

fn parse_field<T: std::str::FromStr>(name: &str, value: &str) -> ApiResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid {name}: {value}")))
}

/// Body-limit overruns surface while reading the form and keep their 413.
fn multipart_error(context: &str, err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(format!("{context}: {}", err.body_text()))
    } else {
        ApiError::BadRequest(format!("{context}: {}", err.body_text()))
    }
}

/// Collect the multipart form into an upload.
async fn read_upload(mut multipart: Multipart) -> ApiResult<Upload> {
    let mut upload = Upload::default();
    let mut year = None;
    let mut has_file = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error("Malformed multipart body", e))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            upload.file_name = field.file_name().unwrap_or("upload.xlsx").to_string();
            upload.mime_type = field.content_type().map(str::to_string);
            upload.bytes = field
                .bytes()
                .await
                .map_err(|e| multipart_error("Could not read uploaded file", e))?
                .to_vec();
            has_file = true;
            continue;
        }

        let text = field
            .text()
            .await
            .map_err(|e| multipart_error(&format!("Could not read field {name}"), e))?;
        let blank = text.trim().is_empty();
        match name.as_str() {
            "name" => upload.name = text,
            "year" => year = Some(parse_field::<i32>("year", &text)?),
            "month" => {
                if !blank {
                    upload.month = Some(parse_field::<u32>("month", &text)?);
                }
            }
            "description" => upload.description = Some(text),
            "origin" => upload.origin = Some(text),
            "uploaded_by" => upload.uploaded_by = Some(text),
            _ => tracing::debug!(field = %name, "Ignoring unknown upload field"),
        }
    }

    if !has_file {
        return Err(ApiError::BadRequest("Missing file field".to_string()));
    }
    upload.year = year.ok_or_else(|| ApiError::BadRequest("Missing year field".to_string()))?;
    Ok(upload)
}

/// POST /batches
///
/// Stage an uploaded workbook. 201 with the new batch, 422 when the sheet
/// is rejected.
pub async fn create_batch(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<IntakeReport>)> {
    let upload = read_upload(multipart).await?;
    let result = state.intake.create_batch(upload).await.map_err(ApiError::from);
    let report = track(&state, result).await?;
    Ok((StatusCode::CREATED, Json(report)))
}

/// GET /batches?year=&page=&limit=
pub async fn get_batches(
    State(state): State<AppState>,
    Query(query): Query<ListBatchesQuery>,
) -> ApiResult<Json<PageResponse<Batch>>> {
    let page = clamp_page(query.page, query.limit, state.max_page_size);
    let result = list_batches(&state.db, query.year, page).await.map_err(ApiError::from);
    let (items, total) = track(&state, result).await?;
    Ok(Json(PageResponse {
        items,
        total,
        page: page.page,
        limit: page.limit,
    }))
}

/// GET /batches/years
pub async fn get_years(State(state): State<AppState>) -> ApiResult<Json<Vec<YearSummary>>> {
    let result = list_years(&state.db).await.map_err(ApiError::from);
    Ok(Json(track(&state, result).await?))
}

/// GET /batches/:id
pub async fn get_batch_by_id(State(state): State<AppState>, Path(batch_id): Path<i64>) -> ApiResult<Json<Batch>> {
    let result = get_batch(&state.db, batch_id).await.map_err(ApiError::from);
    track(&state, result)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Batch {batch_id}")))
}

/// GET /batches/:id/rows?state=&page=&limit=
pub async fn get_batch_rows(
    State(state): State<AppState>,
    Path(batch_id): Path<i64>,
    Query(query): Query<ListRowsQuery>,
) -> ApiResult<Json<PageResponse<StagingRow>>> {
    let row_state = match query.state.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => Some(s.parse::<RowState>().map_err(ApiError::BadRequest)?),
        None => None,
    };
    let batch = get_batch(&state.db, batch_id).await.map_err(ApiError::from);
    if track(&state, batch).await?.is_none() {
        return Err(ApiError::NotFound(format!("Batch {batch_id}")));
    }

    let page = clamp_page(query.page, query.limit, state.max_page_size);
    let result = list_rows(&state.db, batch_id, row_state, page)
        .await
        .map_err(ApiError::from);
    let (items, total) = track(&state, result).await?;
    Ok(Json(PageResponse {
        items,
        total,
        page: page.page,
        limit: page.limit,
    }))
}

/// POST /batches/:id/process-pending?limit=
///
/// Bounded sweep. Row failures are reported in the counts, never as an
/// HTTP error.
pub async fn process_pending(
    State(state): State<AppState>,
    Path(batch_id): Path<i64>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<SweepReport>> {
    let result = state
        .reconciler
        .sweep_pending(batch_id, query.limit)
        .await
        .map_err(ApiError::from);
    Ok(Json(track(&state, result).await?))
}

/// POST /batches/:id/retry-errors?limit=
pub async fn retry_errors(
    State(state): State<AppState>,
    Path(batch_id): Path<i64>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<RetryReport>> {
    let result = state
        .reconciler
        .retry_errors(batch_id, query.limit)
        .await
        .map_err(ApiError::from);
    Ok(Json(track(&state, result).await?))
}

/// Build batch routes. Uploads may be up to `max_upload_bytes`.
pub fn batch_routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route(
            "/batches",
            get(get_batches).post(create_batch).layer(DefaultBodyLimit::max(
                max_upload_bytes.saturating_add(MULTIPART_OVERHEAD_BYTES),
            )),
        )
        .route("/batches/years", get(get_years))
        .route("/batches/:id", get(get_batch_by_id))
        .route("/batches/:id/rows", get(get_batch_rows))
        .route("/batches/:id/process-pending", post(process_pending))
        .route("/batches/:id/retry-errors", post(retry_errors))
}
