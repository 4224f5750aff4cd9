//! Case record writer

use chrono::{DateTime, Utc};
use nutri_common::Result;
use sqlx::SqliteConnection;

use crate::models::case_record::CASE_STATUS_OPEN;
use crate::models::NewCaseRecord;

/// Insert a case record and its general information. Runs inside the
/// reconciler's terminal transaction.
pub async fn insert_case_record(
    conn: &mut SqliteConnection,
    record: &NewCaseRecord,
    now: DateTime<Utc>,
) -> Result<i64> {
    let case_id = sqlx::query(
        r#"
        INSERT INTO case_records (
            beneficiary_name, beneficiary_cui, registration_code, department_id,
            municipality_id, load_year, status, bpm_instance_id, bpm_status,
            source_row_id, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&record.beneficiary_name)
    .bind(&record.beneficiary_cui)
    .bind(&record.registration_code)
    .bind(record.department_id)
    .bind(record.municipality_id)
    .bind(record.load_year)
    .bind(CASE_STATUS_OPEN)
    .bind(&record.bpm_instance_id)
    .bind(&record.bpm_status)
    .bind(record.source_row_id)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    let info = &record.general_info;
    sqlx::query(
        r#"
        INSERT INTO case_general_info (
            case_record_id, year, month, health_area_id, health_district_id,
            health_service_id, residence_department_id, residence_municipality_id,
            community, address, child_cui, sex_id, age_years, child_name, birth_date,
            first_contact_date, registration_date, cie10_code, diagnosis, mother_name,
            mother_cui, father_name, father_cui, guardian_phones, validation_id
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(case_id)
    .bind(&info.year)
    .bind(&info.month)
    .bind(info.health_area_id)
    .bind(info.health_district_id)
    .bind(info.health_service_id)
    .bind(info.residence_department_id)
    .bind(info.residence_municipality_id)
    .bind(&info.community)
    .bind(&info.address)
    .bind(&info.child_cui)
    .bind(info.sex_id)
    .bind(info.age_years)
    .bind(&info.child_name)
    .bind(info.birth_date)
    .bind(info.first_contact_date)
    .bind(info.registration_date)
    .bind(&info.cie10_code)
    .bind(&info.diagnosis)
    .bind(&info.mother_name)
    .bind(&info.mother_cui)
    .bind(&info.father_name)
    .bind(&info.father_cui)
    .bind(&info.guardian_phones)
    .bind(info.validation_id)
    .execute(&mut *conn)
    .await?;

    Ok(case_id)
}

/// Number of case records for a year
pub async fn count_for_year(pool: &sqlx::SqlitePool, year: i32) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM case_records WHERE load_year = ?")
        .bind(year)
        .fetch_one(pool)
        .await?;
    Ok(count)
}
