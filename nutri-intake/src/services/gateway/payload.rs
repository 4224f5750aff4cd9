//! Engine request payload
//!
//! A flat object keyed by the engine's field labels. Identifiers and periods
//! are sent as integers, dates as ISO calendar dates, blanks as null.

use chrono::NaiveDate;
use serde_json::{Map, Value};

use crate::models::StagingFields;
use crate::sheet::Field;

fn text(value: &Option<String>) -> Value {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| Value::String(s.to_string()))
        .unwrap_or(Value::Null)
}

/// Digits-only identifiers become integers; anything else is null.
fn integral(value: &Option<String>) -> Value {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))
        .and_then(|s| s.parse::<i64>().ok())
        .map(Value::from)
        .unwrap_or(Value::Null)
}

fn number(value: Option<i64>) -> Value {
    value.map(Value::from).unwrap_or(Value::Null)
}

fn iso_date(value: Option<NaiveDate>) -> Value {
    value
        .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
        .unwrap_or(Value::Null)
}

/// Build the request body for one row. Year and month fall back to the
/// batch's declared period when the sheet left them blank.
pub fn build_payload(fields: &StagingFields, batch_year: i32, batch_month: Option<u32>) -> Value {
    let mut body = Map::new();
    for field in Field::ALL {
        let value = match field {
            Field::RegistrationCode => integral(&fields.registration_code),
            Field::Year => number(fields.sheet_year.or(Some(i64::from(batch_year)))),
            Field::Month => number(fields.sheet_month.or(batch_month.map(i64::from))),
            Field::HealthArea => text(&fields.health_area),
            Field::HealthDistrict => text(&fields.health_district),
            Field::HealthService => text(&fields.health_service),
            Field::ResidenceDepartment => text(&fields.residence_department),
            Field::ResidenceMunicipality => text(&fields.residence_municipality),
            Field::ResidenceCommunity => text(&fields.residence_community),
            Field::ResidenceAddress => text(&fields.residence_address),
            Field::ChildCui => integral(&fields.child_cui),
            Field::Sex => text(&fields.sex),
            Field::AgeYears => number(fields.age_years),
            Field::ChildName => text(&fields.child_name),
            Field::BirthDate => iso_date(fields.birth_date),
            Field::FirstContactDate => iso_date(fields.first_contact_date),
            Field::RegistrationDate => iso_date(fields.registration_date),
            Field::Cie10 => text(&fields.cie10_code),
            Field::Diagnosis => text(&fields.diagnosis),
            Field::MotherName => text(&fields.mother_name),
            Field::MotherCui => integral(&fields.mother_cui),
            Field::FatherName => text(&fields.father_name),
            Field::FatherCui => integral(&fields.father_cui),
            Field::GuardianPhones => text(&fields.guardian_phones),
            Field::Validation => text(&fields.validation_label),
        };
        body.insert(field.wire_label().to_string(), value);
    }
    Value::Object(body)
}
