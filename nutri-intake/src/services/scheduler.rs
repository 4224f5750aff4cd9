//! Sweep Scheduler
//!
//! Optional background task: every interval, sweep each batch that still has
//! pending rows with the configured per-call bound.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::reconciler::Reconciler;
use crate::db::batches::batch_ids_with_pending;

/// Spawn the scheduler. Returns `None` when `interval` is zero (disabled).
pub fn spawn_sweep_scheduler(
    pool: sqlx::SqlitePool,
    reconciler: Arc<Reconciler>,
    interval: Duration,
    limit: u32,
    cancel: CancellationToken,
) -> Option<JoinHandle<()>> {
    if interval.is_zero() {
        debug!("Sweep scheduler disabled");
        return None;
    }

    info!(interval_secs = interval.as_secs(), limit, "Sweep scheduler started");
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            run_once(&pool, &reconciler, limit, &cancel).await;
        }
        info!("Sweep scheduler stopped");
    }))
}

/// One pass over every batch with pending rows.
pub async fn run_once(pool: &sqlx::SqlitePool, reconciler: &Reconciler, limit: u32, cancel: &CancellationToken) {
    let batch_ids = match batch_ids_with_pending(pool).await {
        Ok(ids) => ids,
        Err(e) => {
            warn!(error = %e, "Scheduled sweep could not list batches");
            return;
        }
    };

    for batch_id in batch_ids {
        if cancel.is_cancelled() {
            return;
        }
        match reconciler.sweep_pending(batch_id, Some(limit)).await {
            Ok(report) => debug!(
                batch_id,
                processed = report.processed,
                errors = report.errors,
                skipped = report.skipped,
                "Scheduled sweep"
            ),
            Err(e) => warn!(batch_id, error = %e, "Scheduled sweep failed"),
        }
    }
}
