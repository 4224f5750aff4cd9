//! HTTP API handlers for nutri-intake
//!
//! Batch and row query surface for operators, plus `/health`.

pub mod batches;
pub mod health;
pub mod rows;

pub use batches::batch_routes;
pub use health::health_routes;
pub use rows::row_routes;

use crate::db::Page;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Page size when the request names none
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Build a 1-based page, clamping the size to the configured maximum.
pub fn clamp_page(page: Option<u32>, limit: Option<u32>, max_page_size: u32) -> Page {
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, max_page_size.max(1));
    Page::new(page.unwrap_or(1), limit)
}

/// Remember server-side failures for `/health` before handing them back.
pub async fn track<T>(state: &AppState, result: ApiResult<T>) -> ApiResult<T> {
    if let Err(err) = &result {
        if matches!(err, ApiError::Common(_)) {
            *state.last_error.write().await = Some(err.to_string());
        }
    }
    result
}
