//! Case record payload from a staging row
//!
//! Catalog references are resolved by name. A value that matches nothing
//! is stored as null; only a lookup failure (database error) aborts.

use nutri_common::text::normalize_lookup;
use nutri_common::Result;

use super::catalog::CatalogLookup;
use crate::db::catalogs::CatalogKind;
use crate::models::{Batch, CaseGeneralInfo, Decision, NewCaseRecord, StagingRow};

/// Canonical sex label for the common spellings found in sheets
fn sex_label(raw: &str) -> Option<&'static str> {
    match normalize_lookup(raw).as_str() {
        "M" | "MASCULINO" | "HOMBRE" | "NINO" | "1" => Some("MASCULINO"),
        "F" | "FEMENINO" | "MUJER" | "NINA" | "2" => Some("FEMENINO"),
        _ => None,
    }
}

/// Canonical validation label
fn validation_label(raw: &str) -> Option<&'static str> {
    match normalize_lookup(raw).as_str() {
        "VALIDO" | "VALIDADO" | "SI" | "1" => Some("VALIDO"),
        "INVALIDO" | "NO VALIDO" | "NO" | "0" => Some("INVALIDO"),
        _ => None,
    }
}

async fn lookup(catalogs: &dyn CatalogLookup, kind: CatalogKind, value: Option<&str>) -> Result<Option<i64>> {
    match value {
        Some(v) => catalogs.resolve(kind, v).await,
        None => Ok(None),
    }
}

/// Build the case record for a row the eligibility engine approved.
pub async fn build_case_record(
    catalogs: &dyn CatalogLookup,
    row: &StagingRow,
    batch: &Batch,
    decision: &Decision,
    beneficiary_name: &str,
) -> Result<NewCaseRecord> {
    let f = &row.fields;

    let department_id = lookup(catalogs, CatalogKind::Department, f.residence_department.as_deref()).await?;
    let municipality_id = match f.residence_municipality.as_deref() {
        Some(m) => catalogs.resolve_municipality(department_id, m).await?,
        None => None,
    };

    let sex_id = match f.sex.as_deref() {
        Some(raw) => {
            let label = sex_label(raw).unwrap_or(raw);
            catalogs.resolve(CatalogKind::Sex, label).await?
        }
        None => None,
    };
    let validation_id = match f.validation_label.as_deref() {
        Some(raw) => {
            let label = validation_label(raw).unwrap_or(raw);
            catalogs.resolve(CatalogKind::Validation, label).await?
        }
        None => None,
    };

    let general_info = CaseGeneralInfo {
        year: Some(f.sheet_year.unwrap_or(i64::from(batch.year)).to_string()),
        month: f.sheet_month.or(batch.month.map(i64::from)).map(|m| m.to_string()),
        health_area_id: lookup(catalogs, CatalogKind::HealthArea, f.health_area.as_deref()).await?,
        health_district_id: lookup(catalogs, CatalogKind::HealthDistrict, f.health_district.as_deref()).await?,
        health_service_id: lookup(catalogs, CatalogKind::HealthService, f.health_service.as_deref()).await?,
        residence_department_id: department_id,
        residence_municipality_id: municipality_id,
        community: f.residence_community.clone(),
        address: f.residence_address.clone(),
        child_cui: f.child_cui.clone(),
        sex_id,
        age_years: f.age_years,
        child_name: Some(beneficiary_name.to_string()),
        birth_date: f.birth_date,
        first_contact_date: f.first_contact_date,
        registration_date: f.registration_date,
        cie10_code: f.cie10_code.clone(),
        diagnosis: f.diagnosis.clone(),
        mother_name: f.mother_name.clone(),
        mother_cui: f.mother_cui.clone(),
        father_name: f.father_name.clone(),
        father_cui: f.father_cui.clone(),
        guardian_phones: f.guardian_phones.clone(),
        validation_id,
    };

    Ok(NewCaseRecord {
        beneficiary_name: beneficiary_name.to_string(),
        beneficiary_cui: f.child_cui.clone(),
        registration_code: f.registration_code.clone(),
        department_id,
        municipality_id,
        load_year: batch.year,
        bpm_instance_id: decision.instance_id.clone(),
        bpm_status: Some(decision.status_label()),
        source_row_id: row.id,
        general_info,
    })
}
