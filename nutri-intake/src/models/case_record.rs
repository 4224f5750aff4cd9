//! Case record ("expediente") creation payload

use chrono::NaiveDate;
use serde::Serialize;

/// Status of a freshly created case record
pub const CASE_STATUS_OPEN: &str = "ABIERTO";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NewCaseRecord {
    pub beneficiary_name: String,
    pub beneficiary_cui: Option<String>,
    pub registration_code: Option<String>,
    pub department_id: Option<i64>,
    pub municipality_id: Option<i64>,
    pub load_year: i32,
    pub bpm_instance_id: Option<String>,
    pub bpm_status: Option<String>,
    pub source_row_id: i64,
    pub general_info: CaseGeneralInfo,
}

/// General information attached 1:1 to a case record
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct CaseGeneralInfo {
    pub year: Option<String>,
    pub month: Option<String>,
    pub health_area_id: Option<i64>,
    pub health_district_id: Option<i64>,
    pub health_service_id: Option<i64>,
    pub residence_department_id: Option<i64>,
    pub residence_municipality_id: Option<i64>,
    pub community: Option<String>,
    pub address: Option<String>,
    pub child_cui: Option<String>,
    pub sex_id: Option<i64>,
    pub age_years: Option<i64>,
    pub child_name: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub first_contact_date: Option<NaiveDate>,
    pub registration_date: Option<NaiveDate>,
    pub cie10_code: Option<String>,
    pub diagnosis: Option<String>,
    pub mother_name: Option<String>,
    pub mother_cui: Option<String>,
    pub father_name: Option<String>,
    pub father_cui: Option<String>,
    pub guardian_phones: Option<String>,
    pub validation_id: Option<i64>,
}
