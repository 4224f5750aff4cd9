//! nutri-intake library interface
//!
//! Nomination intake: sheet staging, duplicate guard, eligibility gateway
//! and row reconciliation. Exposed as a library for integration testing.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod sheet;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::services::{IntakeService, Reconciler};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    pub reconciler: Arc<Reconciler>,
    pub intake: Arc<IntakeService>,
    /// Largest page a listing returns
    pub max_page_size: u32,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last server-side error for diagnostics
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(db: SqlitePool, reconciler: Arc<Reconciler>, intake: Arc<IntakeService>, max_page_size: u32) -> Self {
        Self {
            db,
            reconciler,
            intake,
            max_page_size,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let max_upload_bytes = state.intake.max_upload_bytes();

    Router::new()
        .merge(api::batch_routes(max_upload_bytes))
        .merge(api::row_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
