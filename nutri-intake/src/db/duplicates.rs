//! Duplicate Guard
//!
//! Year-scoped uniqueness for the child's national ID (CUI) and the
//! registration code (RUB). Both are checked against PROCESSED staging rows
//! of any batch for the same year and against existing case records.

use nutri_common::Result;
use sqlx::SqliteConnection;

use crate::models::ErrorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identifier {
    Cui,
    RegistrationCode,
}

impl Identifier {
    pub fn error_code(self) -> ErrorCode {
        match self {
            Identifier::Cui => ErrorCode::DupCuiYear,
            Identifier::RegistrationCode => ErrorCode::DupRubYear,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Identifier::Cui => "CUI",
            Identifier::RegistrationCode => "RUB",
        }
    }
}

/// Where the colliding identifier was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateSource {
    StagingRow(i64),
    CaseRecord(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateHit {
    pub identifier: Identifier,
    pub value: String,
    pub source: DuplicateSource,
}

impl DuplicateHit {
    pub fn error_code(&self) -> ErrorCode {
        self.identifier.error_code()
    }

    pub fn message(&self, year: i32) -> String {
        let what = self.identifier.label();
        let found_in = match self.source {
            DuplicateSource::StagingRow(id) => format!("processed staging row {id}"),
            DuplicateSource::CaseRecord(id) => format!("case record {id}"),
        };
        format!("{what} {} already registered for {year} ({found_in})", self.value)
    }
}

/// Look for either identifier among year `year`'s processed rows (excluding
/// `exclude_row_id`) and case records. CUI is checked first. Blank or absent
/// identifiers never collide.
pub async fn find_duplicate(
    conn: &mut SqliteConnection,
    year: i32,
    cui: Option<&str>,
    registration_code: Option<&str>,
    exclude_row_id: i64,
) -> Result<Option<DuplicateHit>> {
    let checks = [
        (Identifier::Cui, cui, "child_cui", "beneficiary_cui"),
        (Identifier::RegistrationCode, registration_code, "registration_code", "registration_code"),
    ];

    for (identifier, value, staging_column, case_column) in checks {
        let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
            continue;
        };

        let staging_sql = format!(
            "SELECT s.id FROM staging_rows s
             JOIN batches b ON b.id = s.batch_id
             WHERE b.year = ? AND s.state = 'PROCESSED' AND s.{staging_column} = ? AND s.id <> ?
             LIMIT 1"
        );
        let staging_hit: Option<i64> = sqlx::query_scalar(&staging_sql)
            .bind(year)
            .bind(value)
            .bind(exclude_row_id)
            .fetch_optional(&mut *conn)
            .await?;
        if let Some(id) = staging_hit {
            return Ok(Some(DuplicateHit {
                identifier,
                value: value.to_string(),
                source: DuplicateSource::StagingRow(id),
            }));
        }

        let case_sql = format!("SELECT id FROM case_records WHERE load_year = ? AND {case_column} = ? LIMIT 1");
        let case_hit: Option<i64> = sqlx::query_scalar(&case_sql)
            .bind(year)
            .bind(value)
            .fetch_optional(&mut *conn)
            .await?;
        if let Some(id) = case_hit {
            return Ok(Some(DuplicateHit {
                identifier,
                value: value.to_string(),
                source: DuplicateSource::CaseRecord(id),
            }));
        }
    }

    Ok(None)
}

/// Map a unique-index violation on case_records to the identifier it guards.
pub fn identifier_from_unique_violation(err: &nutri_common::Error) -> Option<Identifier> {
    let nutri_common::Error::Database(sqlx::Error::Database(db_err)) = err else {
        return None;
    };
    if !db_err.is_unique_violation() {
        return None;
    }
    let message = db_err.message();
    if message.contains("case_records.beneficiary_cui") {
        Some(Identifier::Cui)
    } else if message.contains("case_records.registration_code") {
        Some(Identifier::RegistrationCode)
    } else {
        None
    }
}
