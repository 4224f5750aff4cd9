//! Batch persistence

use chrono::{DateTime, Utc};
use nutri_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqliteExecutor, SqlitePool};

use super::Page;
use crate::models::{Batch, BatchStatus, NewBatch, RowCounts, YearSummary};

const BATCH_COLUMNS: &str = "id, name, description, origin, year, month, uploaded_by, file_name,
    mime_type, size_bytes, checksum_sha256, storage_provider, storage_key, status,
    total_rows, pending_rows, processed_rows, error_rows, ignored_rows, created_at, updated_at";

fn batch_from_row(row: &SqliteRow) -> Result<Batch> {
    let status: String = row.try_get("status")?;
    let status = status.parse::<BatchStatus>().map_err(Error::Internal)?;
    let month: Option<i64> = row.try_get("month")?;

    Ok(Batch {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        origin: row.try_get("origin")?,
        year: row.try_get("year")?,
        month: month.and_then(|m| u32::try_from(m).ok()),
        uploaded_by: row.try_get("uploaded_by")?,
        file_name: row.try_get("file_name")?,
        mime_type: row.try_get("mime_type")?,
        size_bytes: row.try_get("size_bytes")?,
        checksum_sha256: row.try_get("checksum_sha256")?,
        storage_provider: row.try_get("storage_provider")?,
        storage_key: row.try_get("storage_key")?,
        status,
        counts: RowCounts {
            total: row.try_get("total_rows")?,
            pending: row.try_get("pending_rows")?,
            processed: row.try_get("processed_rows")?,
            error: row.try_get("error_rows")?,
            ignored: row.try_get("ignored_rows")?,
        },
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Insert a new, empty batch. Counters start at zero with status LOADED.
pub async fn insert_batch(conn: &mut SqliteConnection, batch: &NewBatch, now: DateTime<Utc>) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO batches (
            name, description, origin, year, month, uploaded_by, file_name, mime_type,
            size_bytes, checksum_sha256, storage_provider, storage_key, status,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&batch.name)
    .bind(&batch.description)
    .bind(&batch.origin)
    .bind(batch.year)
    .bind(batch.month.map(i64::from))
    .bind(&batch.uploaded_by)
    .bind(&batch.file_name)
    .bind(&batch.mime_type)
    .bind(batch.size_bytes)
    .bind(&batch.checksum_sha256)
    .bind(&batch.storage_provider)
    .bind(&batch.storage_key)
    .bind(BatchStatus::Loaded.as_str())
    .bind(now)
    .bind(now)
    .execute(conn)
    .await?;

    Ok(result.last_insert_rowid())
}

pub async fn get_batch<'e, E>(executor: E, batch_id: i64) -> Result<Option<Batch>>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!("SELECT {BATCH_COLUMNS} FROM batches WHERE id = ?");
    let row = sqlx::query(&sql).bind(batch_id).fetch_optional(executor).await?;
    row.as_ref().map(batch_from_row).transpose()
}

/// Batches newest first, optionally restricted to one year. Returns the page
/// and the total number of matching batches.
pub async fn list_batches(pool: &SqlitePool, year: Option<i32>, page: Page) -> Result<(Vec<Batch>, i64)> {
    let sql = format!(
        "SELECT {BATCH_COLUMNS} FROM batches
         WHERE (?1 IS NULL OR year = ?1)
         ORDER BY created_at DESC, id DESC
         LIMIT ?2 OFFSET ?3"
    );
    let rows = sqlx::query(&sql)
        .bind(year)
        .bind(i64::from(page.limit))
        .bind(page.offset())
        .fetch_all(pool)
        .await?;
    let batches = rows.iter().map(batch_from_row).collect::<Result<Vec<_>>>()?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM batches WHERE (?1 IS NULL OR year = ?1)")
        .bind(year)
        .fetch_one(pool)
        .await?;

    Ok((batches, total))
}

/// Distinct years with their batch counts, newest year first.
pub async fn list_years(pool: &SqlitePool) -> Result<Vec<YearSummary>> {
    let rows = sqlx::query("SELECT year, COUNT(*) AS batches FROM batches GROUP BY year ORDER BY year DESC")
        .fetch_all(pool)
        .await?;

    rows.iter()
        .map(|row| {
            Ok(YearSummary {
                year: row.try_get("year")?,
                batches: row.try_get("batches")?,
            })
        })
        .collect()
}

/// Count staging rows per state for one batch.
pub async fn count_rows(conn: &mut SqliteConnection, batch_id: i64) -> Result<RowCounts> {
    let row = sqlx::query(
        r#"
        SELECT
            COUNT(*) AS total,
            COALESCE(SUM(CASE WHEN state = 'PENDING' THEN 1 ELSE 0 END), 0) AS pending,
            COALESCE(SUM(CASE WHEN state = 'PROCESSED' THEN 1 ELSE 0 END), 0) AS processed,
            COALESCE(SUM(CASE WHEN state = 'ERROR' THEN 1 ELSE 0 END), 0) AS error,
            COALESCE(SUM(CASE WHEN state = 'IGNORED' THEN 1 ELSE 0 END), 0) AS ignored
        FROM staging_rows
        WHERE batch_id = ?
        "#,
    )
    .bind(batch_id)
    .fetch_one(conn)
    .await?;

    Ok(RowCounts {
        total: row.try_get("total")?,
        pending: row.try_get("pending")?,
        processed: row.try_get("processed")?,
        error: row.try_get("error")?,
        ignored: row.try_get("ignored")?,
    })
}

pub async fn store_counts(
    conn: &mut SqliteConnection,
    batch_id: i64,
    counts: &RowCounts,
    status: BatchStatus,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE batches
        SET total_rows = ?, pending_rows = ?, processed_rows = ?, error_rows = ?,
            ignored_rows = ?, status = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(counts.total)
    .bind(counts.pending)
    .bind(counts.processed)
    .bind(counts.error)
    .bind(counts.ignored)
    .bind(status.as_str())
    .bind(now)
    .bind(batch_id)
    .execute(conn)
    .await?;
    Ok(())
}

/// Batches that still have pending rows, oldest first.
pub async fn batch_ids_with_pending(pool: &SqlitePool) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar(
        "SELECT DISTINCT batch_id FROM staging_rows WHERE state = 'PENDING' ORDER BY batch_id",
    )
    .fetch_all(pool)
    .await?;
    Ok(ids)
}
