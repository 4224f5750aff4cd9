//! Database initialization
//!
//! Opens (creating if needed) the SQLite database and applies the schema.
//! Every table is created with `IF NOT EXISTS`, so startup is idempotent.

use crate::config::DatabaseConfig;
use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Pool sizing and lock behaviour
#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub busy_timeout: Duration,
}

impl From<&DatabaseConfig> for PoolSettings {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            max_connections: config.max_connections.max(1),
            busy_timeout: Duration::from_millis(config.busy_timeout_ms),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::from(&DatabaseConfig::default())
    }
}

/// Open the database at `db_path` and create tables if needed.
///
/// WAL mode, foreign keys and the busy timeout are connection options, so
/// each pooled connection gets them (a `PRAGMA` issued through the pool would
/// only reach whichever connection ran it).
pub async fn init_database(db_path: &Path, settings: PoolSettings) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(settings.busy_timeout);

    let pool = SqlitePoolOptions::new()
        .max_connections(settings.max_connections)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create every table and index used by the intake pipeline.
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_catalog_tables(pool).await?;
    create_batches_table(pool).await?;
    create_case_records_table(pool).await?;
    create_case_general_info_table(pool).await?;
    create_staging_rows_table(pool).await?;
    Ok(())
}

/// Territory and health catalogs, owned by other services and read here.
pub async fn create_catalog_tables(pool: &SqlitePool) -> Result<()> {
    for table in [
        "cat_departments",
        "cat_health_areas",
        "cat_health_districts",
        "cat_health_services",
        "cat_sex",
        "cat_validation",
    ] {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY,
                code TEXT,
                name TEXT NOT NULL
            )"
        );
        sqlx::query(&sql).execute(pool).await?;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cat_municipalities (
            id INTEGER PRIMARY KEY,
            department_id INTEGER REFERENCES cat_departments(id),
            code TEXT,
            name TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_batches_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS batches (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            description TEXT,
            origin TEXT,
            year INTEGER NOT NULL,
            month INTEGER CHECK (month IS NULL OR month BETWEEN 1 AND 12),
            uploaded_by TEXT,
            file_name TEXT NOT NULL,
            mime_type TEXT,
            size_bytes INTEGER NOT NULL,
            checksum_sha256 TEXT NOT NULL,
            storage_provider TEXT NOT NULL,
            storage_key TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'LOADED'
                CHECK (status IN ('LOADED', 'UNDER_REVIEW', 'FINALIZED')),
            total_rows INTEGER NOT NULL DEFAULT 0,
            pending_rows INTEGER NOT NULL DEFAULT 0,
            processed_rows INTEGER NOT NULL DEFAULT 0,
            error_rows INTEGER NOT NULL DEFAULT 0,
            ignored_rows INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_batches_year ON batches(year, created_at)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Case records ("expedientes") and their year-scoped identifier uniqueness.
pub async fn create_case_records_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS case_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            beneficiary_name TEXT NOT NULL,
            beneficiary_cui TEXT,
            registration_code TEXT,
            department_id INTEGER,
            municipality_id INTEGER,
            load_year INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'ABIERTO',
            bpm_instance_id TEXT,
            bpm_status TEXT,
            source_row_id INTEGER UNIQUE,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS ux_case_records_year_cui
         ON case_records(load_year, beneficiary_cui)
         WHERE beneficiary_cui IS NOT NULL",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS ux_case_records_year_registration
         ON case_records(load_year, registration_code)
         WHERE registration_code IS NOT NULL",
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_case_general_info_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS case_general_info (
            case_record_id INTEGER PRIMARY KEY
                REFERENCES case_records(id) ON DELETE CASCADE,
            year TEXT,
            month TEXT,
            health_area_id INTEGER,
            health_district_id INTEGER,
            health_service_id INTEGER,
            residence_department_id INTEGER,
            residence_municipality_id INTEGER,
            community TEXT,
            address TEXT,
            child_cui TEXT,
            sex_id INTEGER,
            age_years INTEGER,
            child_name TEXT,
            birth_date TEXT,
            first_contact_date TEXT,
            registration_date TEXT,
            cie10_code TEXT,
            diagnosis TEXT,
            mother_name TEXT,
            mother_cui TEXT,
            father_name TEXT,
            father_cui TEXT,
            guardian_phones TEXT,
            validation_id INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// One row per nomination. The CHECK constraints pin the terminal-state
/// invariants so no code path can store a PROCESSED row without its case
/// record or an IGNORED row without reason and actor.
pub async fn create_staging_rows_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS staging_rows (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            batch_id INTEGER NOT NULL REFERENCES batches(id),
            row_number INTEGER NOT NULL,
            registration_code TEXT,
            sheet_year INTEGER,
            sheet_month INTEGER,
            health_area TEXT,
            health_district TEXT,
            health_service TEXT,
            residence_department TEXT,
            residence_municipality TEXT,
            residence_community TEXT,
            residence_address TEXT,
            child_cui TEXT,
            sex TEXT,
            age_years INTEGER,
            child_name TEXT,
            birth_date TEXT,
            first_contact_date TEXT,
            registration_date TEXT,
            cie10_code TEXT,
            diagnosis TEXT,
            mother_name TEXT,
            mother_cui TEXT,
            father_name TEXT,
            father_cui TEXT,
            guardian_phones TEXT,
            validation_label TEXT,
            raw_data TEXT NOT NULL DEFAULT '{}',
            state TEXT NOT NULL DEFAULT 'PENDING'
                CHECK (state IN ('PENDING', 'ERROR', 'PROCESSED', 'IGNORED')),
            error_code TEXT,
            error_message TEXT,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_attempt_at TEXT,
            bpm_request_json TEXT,
            bpm_response_json TEXT,
            bpm_status TEXT,
            bpm_instance_id TEXT,
            case_record_id INTEGER REFERENCES case_records(id),
            ignore_reason TEXT,
            ignored_by TEXT,
            ignored_at TEXT,
            claim_token TEXT,
            claimed_at_ms INTEGER,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            CHECK (state <> 'PROCESSED' OR case_record_id IS NOT NULL),
            CHECK (state <> 'IGNORED' OR (ignore_reason IS NOT NULL AND ignored_by IS NOT NULL))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_staging_batch_state
         ON staging_rows(batch_id, state, row_number)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_staging_processed_cui
         ON staging_rows(child_cui) WHERE state = 'PROCESSED'",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_staging_processed_registration
         ON staging_rows(registration_code) WHERE state = 'PROCESSED'",
    )
    .execute(pool)
    .await?;

    Ok(())
}
