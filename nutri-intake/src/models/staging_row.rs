//! Staging row model and its lifecycle

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::sheet::{values, Field, SheetRow};

/// Row lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RowState {
    Pending,
    Error,
    Processed,
    Ignored,
}

impl RowState {
    pub const ALL: [RowState; 4] = [
        RowState::Pending,
        RowState::Error,
        RowState::Processed,
        RowState::Ignored,
    ];

    /// Allowed transitions. PROCESSED and IGNORED have no way out.
    pub const fn can_transition_to(self, next: RowState) -> bool {
        matches!(
            (self, next),
            (RowState::Pending, RowState::Error)
                | (RowState::Pending, RowState::Processed)
                | (RowState::Pending, RowState::Ignored)
                | (RowState::Error, RowState::Pending)
                | (RowState::Error, RowState::Ignored)
        )
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, RowState::Processed | RowState::Ignored)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            RowState::Pending => "PENDING",
            RowState::Error => "ERROR",
            RowState::Processed => "PROCESSED",
            RowState::Ignored => "IGNORED",
        }
    }
}

const _: () = {
    assert!(RowState::Pending.can_transition_to(RowState::Processed));
    assert!(RowState::Error.can_transition_to(RowState::Pending));
    assert!(!RowState::Error.can_transition_to(RowState::Processed));
    assert!(!RowState::Processed.can_transition_to(RowState::Pending));
    assert!(!RowState::Processed.can_transition_to(RowState::Ignored));
    assert!(!RowState::Ignored.can_transition_to(RowState::Pending));
    assert!(RowState::Processed.is_terminal() && RowState::Ignored.is_terminal());
};

impl fmt::Display for RowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RowState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RowState::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown row state: {s}"))
    }
}

/// Error codes written onto a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    MissingCui,
    MissingName,
    DupCuiYear,
    DupRubYear,
    /// Transport or protocol failure talking to the engine; retryable
    BpmError,
    /// The engine reported a fault
    ErrorEnBpm,
    /// The engine rejected the nomination
    DpiNoEncontrado,
    /// The engine neither approved nor rejected
    BpmPendiente,
    UnexpectedError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::MissingCui => "MISSING_CUI",
            ErrorCode::MissingName => "MISSING_NAME",
            ErrorCode::DupCuiYear => "DUP_CUI_YEAR",
            ErrorCode::DupRubYear => "DUP_RUB_YEAR",
            ErrorCode::BpmError => "BPM_ERROR",
            ErrorCode::ErrorEnBpm => "ERROR_EN_BPM",
            ErrorCode::DpiNoEncontrado => "DPI_NO_ENCONTRADO",
            ErrorCode::BpmPendiente => "BPM_PENDIENTE",
            ErrorCode::UnexpectedError => "UNEXPECTED_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical nomination fields, coerced to storage types
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StagingFields {
    pub registration_code: Option<String>,
    pub sheet_year: Option<i64>,
    pub sheet_month: Option<i64>,
    pub health_area: Option<String>,
    pub health_district: Option<String>,
    pub health_service: Option<String>,
    pub residence_department: Option<String>,
    pub residence_municipality: Option<String>,
    pub residence_community: Option<String>,
    pub residence_address: Option<String>,
    pub child_cui: Option<String>,
    pub sex: Option<String>,
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
    pub validation_label: Option<String>,
}

impl StagingFields {
    pub fn from_sheet_row(row: &SheetRow) -> Self {
        let text = |f: Field| values::text(row.get(f));
        let ident = |f: Field| values::identifier(row.get(f));
        let int = |f: Field| values::integer(row.get(f));
        let date = |f: Field| values::date(row.get(f));

        Self {
            registration_code: ident(Field::RegistrationCode),
            sheet_year: int(Field::Year),
            sheet_month: int(Field::Month),
            health_area: text(Field::HealthArea),
            health_district: text(Field::HealthDistrict),
            health_service: text(Field::HealthService),
            residence_department: text(Field::ResidenceDepartment),
            residence_municipality: text(Field::ResidenceMunicipality),
            residence_community: text(Field::ResidenceCommunity),
            residence_address: text(Field::ResidenceAddress),
            child_cui: ident(Field::ChildCui),
            sex: text(Field::Sex),
            age_years: int(Field::AgeYears),
            child_name: text(Field::ChildName),
            birth_date: date(Field::BirthDate),
            first_contact_date: date(Field::FirstContactDate),
            registration_date: date(Field::RegistrationDate),
            cie10_code: text(Field::Cie10),
            diagnosis: text(Field::Diagnosis),
            mother_name: text(Field::MotherName),
            mother_cui: ident(Field::MotherCui),
            father_name: text(Field::FatherName),
            father_cui: ident(Field::FatherCui),
            guardian_phones: text(Field::GuardianPhones),
            validation_label: text(Field::Validation),
        }
    }
}

/// A staged nomination with its audit trail
#[derive(Debug, Clone, Serialize)]
pub struct StagingRow {
    pub id: i64,
    pub batch_id: i64,
    pub row_number: i64,
    #[serde(flatten)]
    pub fields: StagingFields,
    pub raw_data: serde_json::Value,
    pub state: RowState,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub attempts: i64,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub bpm_request: Option<serde_json::Value>,
    pub bpm_response: Option<serde_json::Value>,
    pub bpm_status: Option<String>,
    pub bpm_instance_id: Option<String>,
    pub case_record_id: Option<i64>,
    pub ignore_reason: Option<String>,
    pub ignored_by: Option<String>,
    pub ignored_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub claim_token: Option<String>,
    #[serde(skip)]
    pub claimed_at_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StagingRow {
    /// True when another reconciliation pass holds a live claim on the row.
    pub fn is_claimed(&self, now_ms: i64, ttl_ms: i64) -> bool {
        match (&self.claim_token, self.claimed_at_ms) {
            (Some(_), Some(at)) => now_ms - at < ttl_ms,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet::CellValue;
    use std::collections::HashMap;

    #[test]
    fn state_parses_case_insensitively() {
        assert_eq!("pending".parse::<RowState>().unwrap(), RowState::Pending);
        assert_eq!(" IGNORED ".parse::<RowState>().unwrap(), RowState::Ignored);
        assert!("DONE".parse::<RowState>().is_err());
    }

    #[test]
    fn only_listed_transitions_are_allowed() {
        let allowed: Vec<(RowState, RowState)> = RowState::ALL
            .iter()
            .flat_map(|from| RowState::ALL.iter().map(move |to| (*from, *to)))
            .filter(|(from, to)| from.can_transition_to(*to))
            .collect();
        assert_eq!(allowed.len(), 5);
        assert!(allowed.iter().all(|(from, _)| !from.is_terminal()));
    }

    #[test]
    fn sheet_row_fields_are_coerced() {
        let mut values = HashMap::new();
        values.insert(Field::ChildCui, CellValue::Number(3012456780101.0));
        values.insert(Field::RegistrationCode, CellValue::Text("88.0".into()));
        values.insert(Field::ChildName, CellValue::Text("  María López ".into()));
        values.insert(Field::Year, CellValue::Text("2025".into()));
        values.insert(Field::BirthDate, CellValue::Text("15/06/2023".into()));
        values.insert(Field::Diagnosis, CellValue::Text("   ".into()));
        let row = SheetRow {
            row_number: 7,
            values,
            raw: serde_json::Map::new(),
        };

        let fields = StagingFields::from_sheet_row(&row);
        assert_eq!(fields.child_cui.as_deref(), Some("3012456780101"));
        assert_eq!(fields.registration_code.as_deref(), Some("88"));
        assert_eq!(fields.child_name.as_deref(), Some("María López"));
        assert_eq!(fields.sheet_year, Some(2025));
        assert_eq!(fields.birth_date, NaiveDate::from_ymd_opt(2023, 6, 15));
        assert_eq!(fields.diagnosis, None);
        assert_eq!(fields.sheet_month, None);
    }
}
