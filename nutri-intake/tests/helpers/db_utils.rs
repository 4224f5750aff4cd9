//! Database setup for integration tests

use nutri_common::db::{init_database, PoolSettings};
use nutri_intake::services::{IntakeReport, IntakeService, IntakeSettings, Reconciler, Upload};
use nutri_intake::AppState;
use sqlx::SqlitePool;
use std::sync::Arc;
use tempfile::TempDir;

/// Fresh file-backed database. Keep the `TempDir` alive for the test.
pub async fn create_test_db() -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let pool = init_database(&temp_dir.path().join("test_nutri.db"), PoolSettings::default())
        .await
        .expect("Failed to initialize test database");
    (temp_dir, pool)
}

/// A small slice of the geographic and label catalogs
pub async fn seed_catalogs(pool: &SqlitePool) {
    let statements = [
        "INSERT INTO cat_departments (id, code, name) VALUES (1, '01', 'Guatemala'), (16, '16', 'Alta Verapaz')",
        "INSERT INTO cat_municipalities (id, department_id, code, name) VALUES
            (101, 1, '0101', 'Guatemala'),
            (1601, 16, '1601', 'Cobán'),
            (1609, 16, '1609', 'San Pedro Carchá')",
        "INSERT INTO cat_health_areas (id, code, name) VALUES (7, NULL, 'Alta Verapaz')",
        "INSERT INTO cat_health_districts (id, code, name) VALUES (70, NULL, 'Cobán')",
        "INSERT INTO cat_health_services (id, code, name) VALUES (700, NULL, 'Centro de Salud Cobán')",
        "INSERT INTO cat_sex (id, code, name) VALUES (1, 'M', 'MASCULINO'), (2, 'F', 'FEMENINO')",
        "INSERT INTO cat_validation (id, code, name) VALUES (1, NULL, 'VALIDO'), (2, NULL, 'INVALIDO')",
    ];
    for sql in statements {
        sqlx::query(sql)
            .execute(pool)
            .await
            .expect("Failed to seed catalog");
    }
}

/// Stage a workbook as a new batch for `year`.
pub async fn stage_workbook(pool: &SqlitePool, year: i32, bytes: Vec<u8>) -> IntakeReport {
    let service = IntakeService::new(pool.clone(), IntakeSettings::default());
    service
        .create_batch(Upload {
            name: format!("Nominaciones {year}"),
            year,
            uploaded_by: Some("tester".to_string()),
            file_name: "nominaciones.xlsx".to_string(),
            bytes,
            ..Upload::default()
        })
        .await
        .expect("Failed to stage workbook")
}

/// Application state over `pool` with the given reconciler
pub fn create_test_app_state(pool: &SqlitePool, reconciler: Reconciler) -> AppState {
    create_test_app_state_with(pool, reconciler, IntakeSettings::default())
}

/// Application state with custom intake settings
pub fn create_test_app_state_with(pool: &SqlitePool, reconciler: Reconciler, intake: IntakeSettings) -> AppState {
    let intake = IntakeService::new(pool.clone(), intake);
    AppState::new(pool.clone(), Arc::new(reconciler), Arc::new(intake), 100)
}
