//! Staging row persistence
//!
//! Row-level exclusivity uses a claim lease instead of `SELECT ... FOR
//! UPDATE`: a conditional UPDATE stamps a token on a PENDING row that has no
//! live claim, and every later write for that pass filters on the token.

use chrono::{DateTime, Utc};
use nutri_common::{Error, Result};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqliteExecutor, SqlitePool};

use super::Page;
use crate::models::{ErrorCode, RowState, StagingFields, StagingRow};

const ROW_COLUMNS: &str = "id, batch_id, row_number, registration_code, sheet_year, sheet_month,
    health_area, health_district, health_service, residence_department, residence_municipality,
    residence_community, residence_address, child_cui, sex, age_years, child_name, birth_date,
    first_contact_date, registration_date, cie10_code, diagnosis, mother_name, mother_cui,
    father_name, father_cui, guardian_phones, validation_label, raw_data, state, error_code,
    error_message, attempts, last_attempt_at, bpm_request_json, bpm_response_json, bpm_status,
    bpm_instance_id, case_record_id, ignore_reason, ignored_by, ignored_at, claim_token,
    claimed_at_ms, created_at, updated_at";

fn json_column(row: &SqliteRow, column: &str) -> Result<Option<Value>> {
    let text: Option<String> = row.try_get(column)?;
    text.map(|t| {
        serde_json::from_str(&t)
            .map_err(|e| Error::Internal(format!("Invalid JSON in staging_rows.{column}: {e}")))
    })
    .transpose()
}

fn row_from_sql(row: &SqliteRow) -> Result<StagingRow> {
    let state: String = row.try_get("state")?;
    let state = state.parse::<RowState>().map_err(Error::Internal)?;

    Ok(StagingRow {
        id: row.try_get("id")?,
        batch_id: row.try_get("batch_id")?,
        row_number: row.try_get("row_number")?,
        fields: StagingFields {
            registration_code: row.try_get("registration_code")?,
            sheet_year: row.try_get("sheet_year")?,
            sheet_month: row.try_get("sheet_month")?,
            health_area: row.try_get("health_area")?,
            health_district: row.try_get("health_district")?,
            health_service: row.try_get("health_service")?,
            residence_department: row.try_get("residence_department")?,
            residence_municipality: row.try_get("residence_municipality")?,
            residence_community: row.try_get("residence_community")?,
            residence_address: row.try_get("residence_address")?,
            child_cui: row.try_get("child_cui")?,
            sex: row.try_get("sex")?,
            age_years: row.try_get("age_years")?,
            child_name: row.try_get("child_name")?,
            birth_date: row.try_get("birth_date")?,
            first_contact_date: row.try_get("first_contact_date")?,
            registration_date: row.try_get("registration_date")?,
            cie10_code: row.try_get("cie10_code")?,
            diagnosis: row.try_get("diagnosis")?,
            mother_name: row.try_get("mother_name")?,
            mother_cui: row.try_get("mother_cui")?,
            father_name: row.try_get("father_name")?,
            father_cui: row.try_get("father_cui")?,
            guardian_phones: row.try_get("guardian_phones")?,
            validation_label: row.try_get("validation_label")?,
        },
        raw_data: json_column(row, "raw_data")?.unwrap_or(Value::Null),
        state,
        error_code: row.try_get("error_code")?,
        error_message: row.try_get("error_message")?,
        attempts: row.try_get("attempts")?,
        last_attempt_at: row.try_get("last_attempt_at")?,
        bpm_request: json_column(row, "bpm_request_json")?,
        bpm_response: json_column(row, "bpm_response_json")?,
        bpm_status: row.try_get("bpm_status")?,
        bpm_instance_id: row.try_get("bpm_instance_id")?,
        case_record_id: row.try_get("case_record_id")?,
        ignore_reason: row.try_get("ignore_reason")?,
        ignored_by: row.try_get("ignored_by")?,
        ignored_at: row.try_get("ignored_at")?,
        claim_token: row.try_get("claim_token")?,
        claimed_at_ms: row.try_get("claimed_at_ms")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Insert one PENDING row.
pub async fn insert_row(
    conn: &mut SqliteConnection,
    batch_id: i64,
    row_number: i64,
    fields: &StagingFields,
    raw: &Value,
    now: DateTime<Utc>,
) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO staging_rows (
            batch_id, row_number, registration_code, sheet_year, sheet_month,
            health_area, health_district, health_service, residence_department,
            residence_municipality, residence_community, residence_address, child_cui,
            sex, age_years, child_name, birth_date, first_contact_date, registration_date,
            cie10_code, diagnosis, mother_name, mother_cui, father_name, father_cui,
            guardian_phones, validation_label, raw_data, state, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'PENDING', ?, ?)
        "#,
    )
    .bind(batch_id)
    .bind(row_number)
    .bind(&fields.registration_code)
    .bind(fields.sheet_year)
    .bind(fields.sheet_month)
    .bind(&fields.health_area)
    .bind(&fields.health_district)
    .bind(&fields.health_service)
    .bind(&fields.residence_department)
    .bind(&fields.residence_municipality)
    .bind(&fields.residence_community)
    .bind(&fields.residence_address)
    .bind(&fields.child_cui)
    .bind(&fields.sex)
    .bind(fields.age_years)
    .bind(&fields.child_name)
    .bind(fields.birth_date)
    .bind(fields.first_contact_date)
    .bind(fields.registration_date)
    .bind(&fields.cie10_code)
    .bind(&fields.diagnosis)
    .bind(&fields.mother_name)
    .bind(&fields.mother_cui)
    .bind(&fields.father_name)
    .bind(&fields.father_cui)
    .bind(&fields.guardian_phones)
    .bind(&fields.validation_label)
    .bind(raw.to_string())
    .bind(now)
    .bind(now)
    .execute(conn)
    .await?;

    Ok(result.last_insert_rowid())
}

pub async fn get_row<'e, E>(executor: E, row_id: i64) -> Result<Option<StagingRow>>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!("SELECT {ROW_COLUMNS} FROM staging_rows WHERE id = ?");
    let row = sqlx::query(&sql).bind(row_id).fetch_optional(executor).await?;
    row.as_ref().map(row_from_sql).transpose()
}

/// Rows of a batch in sheet order, optionally filtered by state.
pub async fn list_rows(
    pool: &SqlitePool,
    batch_id: i64,
    state: Option<RowState>,
    page: Page,
) -> Result<(Vec<StagingRow>, i64)> {
    let state = state.map(RowState::as_str);
    let sql = format!(
        "SELECT {ROW_COLUMNS} FROM staging_rows
         WHERE batch_id = ?1 AND (?2 IS NULL OR state = ?2)
         ORDER BY row_number, id
         LIMIT ?3 OFFSET ?4"
    );
    let rows = sqlx::query(&sql)
        .bind(batch_id)
        .bind(state)
        .bind(i64::from(page.limit))
        .bind(page.offset())
        .fetch_all(pool)
        .await?;
    let rows = rows.iter().map(row_from_sql).collect::<Result<Vec<_>>>()?;

    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM staging_rows WHERE batch_id = ?1 AND (?2 IS NULL OR state = ?2)",
    )
    .bind(batch_id)
    .bind(state)
    .fetch_one(pool)
    .await?;

    Ok((rows, total))
}

/// Ids of unclaimed PENDING rows in sheet order.
pub async fn pending_row_ids(
    pool: &SqlitePool,
    batch_id: i64,
    limit: u32,
    now_ms: i64,
    claim_ttl_ms: i64,
) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar(
        r#"
        SELECT id FROM staging_rows
        WHERE batch_id = ? AND state = 'PENDING'
          AND (claim_token IS NULL OR claimed_at_ms < ?)
        ORDER BY row_number, id
        LIMIT ?
        "#,
    )
    .bind(batch_id)
    .bind(now_ms - claim_ttl_ms)
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

/// Claim a PENDING row for one reconciliation pass. Returns false when the
/// row is not PENDING or another pass holds a live claim.
pub async fn claim_row(
    pool: &SqlitePool,
    row_id: i64,
    token: &str,
    now_ms: i64,
    claim_ttl_ms: i64,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE staging_rows
        SET claim_token = ?, claimed_at_ms = ?
        WHERE id = ? AND state = 'PENDING'
          AND (claim_token IS NULL OR claimed_at_ms < ?)
        "#,
    )
    .bind(token)
    .bind(now_ms)
    .bind(row_id)
    .bind(now_ms - claim_ttl_ms)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Drop a claim without changing state.
pub async fn release_claim(pool: &SqlitePool, row_id: i64, token: &str) -> Result<()> {
    sqlx::query(
        "UPDATE staging_rows SET claim_token = NULL, claimed_at_ms = NULL WHERE id = ? AND claim_token = ?",
    )
    .bind(row_id)
    .bind(token)
    .execute(pool)
    .await?;
    Ok(())
}

/// First statement of a terminal transaction: confirms the claim is still
/// ours and takes the SQLite write lock.
pub async fn confirm_claim(
    conn: &mut SqliteConnection,
    row_id: i64,
    token: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE staging_rows SET updated_at = ? WHERE id = ? AND state = 'PENDING' AND claim_token = ?",
    )
    .bind(now)
    .bind(row_id)
    .bind(token)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Request/response audit of one engine call
#[derive(Debug, Clone, Default)]
pub struct BpmSnapshot {
    pub request: Option<Value>,
    pub response: Option<Value>,
    pub status: Option<String>,
    pub instance_id: Option<String>,
}

/// Persist the engine exchange onto the claimed row.
pub async fn record_bpm_exchange(pool: &SqlitePool, row_id: i64, token: &str, snapshot: &BpmSnapshot) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE staging_rows
        SET bpm_request_json = COALESCE(?, bpm_request_json),
            bpm_response_json = COALESCE(?, bpm_response_json),
            bpm_status = COALESCE(?, bpm_status),
            bpm_instance_id = COALESCE(?, bpm_instance_id)
        WHERE id = ? AND claim_token = ?
        "#,
    )
    .bind(snapshot.request.as_ref().map(Value::to_string))
    .bind(snapshot.response.as_ref().map(Value::to_string))
    .bind(&snapshot.status)
    .bind(&snapshot.instance_id)
    .bind(row_id)
    .bind(token)
    .execute(pool)
    .await?;
    Ok(())
}

/// PENDING → PROCESSED with the new case record. Releases the claim.
pub async fn mark_processed(
    conn: &mut SqliteConnection,
    row_id: i64,
    token: &str,
    case_record_id: i64,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE staging_rows
        SET state = 'PROCESSED', case_record_id = ?, error_code = NULL, error_message = NULL,
            attempts = attempts + 1, last_attempt_at = ?, claim_token = NULL,
            claimed_at_ms = NULL, updated_at = ?
        WHERE id = ? AND state = 'PENDING' AND claim_token = ?
        "#,
    )
    .bind(case_record_id)
    .bind(now)
    .bind(now)
    .bind(row_id)
    .bind(token)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// PENDING → ERROR with code and message. Releases the claim.
pub async fn mark_error(
    conn: &mut SqliteConnection,
    row_id: i64,
    token: &str,
    code: ErrorCode,
    message: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE staging_rows
        SET state = 'ERROR', error_code = ?, error_message = ?,
            attempts = attempts + 1, last_attempt_at = ?, claim_token = NULL,
            claimed_at_ms = NULL, updated_at = ?
        WHERE id = ? AND state = 'PENDING' AND claim_token = ?
        "#,
    )
    .bind(code.as_str())
    .bind(message)
    .bind(now)
    .bind(now)
    .bind(row_id)
    .bind(token)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// ERROR → PENDING for one row.
pub async fn reset_row(conn: &mut SqliteConnection, row_id: i64, now: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE staging_rows
        SET state = 'PENDING', error_code = NULL, error_message = NULL, updated_at = ?
        WHERE id = ? AND state = 'ERROR'
        "#,
    )
    .bind(now)
    .bind(row_id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// ERROR → PENDING for at most `limit` rows of a batch, in sheet order.
pub async fn reset_errors(conn: &mut SqliteConnection, batch_id: i64, limit: u32, now: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE staging_rows
        SET state = 'PENDING', error_code = NULL, error_message = NULL, updated_at = ?
        WHERE id IN (
            SELECT id FROM staging_rows
            WHERE batch_id = ? AND state = 'ERROR'
            ORDER BY row_number, id
            LIMIT ?
        )
        "#,
    )
    .bind(now)
    .bind(batch_id)
    .bind(i64::from(limit))
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

/// PENDING/ERROR → IGNORED, refused while a live claim exists.
pub async fn ignore_row(
    conn: &mut SqliteConnection,
    row_id: i64,
    reason: &str,
    ignored_by: &str,
    now: DateTime<Utc>,
    now_ms: i64,
    claim_ttl_ms: i64,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE staging_rows
        SET state = 'IGNORED', ignore_reason = ?, ignored_by = ?, ignored_at = ?,
            claim_token = NULL, claimed_at_ms = NULL, updated_at = ?
        WHERE id = ? AND state IN ('PENDING', 'ERROR')
          AND (claim_token IS NULL OR claimed_at_ms < ?)
        "#,
    )
    .bind(reason)
    .bind(ignored_by)
    .bind(now)
    .bind(now)
    .bind(row_id)
    .bind(now_ms - claim_ttl_ms)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}
