//! Batch Aggregator
//!
//! Counters and status are always rederived from the staging rows, never
//! incremented, so a recompute is idempotent and safe after any mutation.

use chrono::Utc;
use nutri_common::Result;
use sqlx::SqliteConnection;

use crate::db::batches::{count_rows, store_counts};
use crate::models::{BatchStatus, RowCounts};

/// Recompute one batch's counters and status. Runs on the caller's
/// connection so it lands in the same transaction as the row mutation.
pub async fn recompute_batch(conn: &mut SqliteConnection, batch_id: i64) -> Result<RowCounts> {
    let counts = count_rows(&mut *conn, batch_id).await?;
    let status = BatchStatus::from_counts(&counts);
    store_counts(&mut *conn, batch_id, &counts, status, Utc::now()).await?;
    tracing::trace!(batch_id, ?counts, status = status.as_str(), "Batch counters recomputed");
    Ok(counts)
}
