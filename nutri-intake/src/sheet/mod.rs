//! Sheet Reader
//!
//! Turns an uploaded nomination workbook into canonical rows. The header row
//! may sit anywhere in the first rows of the sheet and its labels vary in
//! case, accents and wording; `header` folds those variants onto a fixed
//! field dictionary, `assembler` groups streamed cells into rows, and `xlsx`
//! drives the assembler from the workbook's cell stream.

pub mod assembler;
pub mod header;
pub mod values;
pub mod xlsx;

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;

pub use assembler::{RowAssembler, ScanLimits};
pub use header::{Field, HeaderLayout};
pub use xlsx::read_workbook;

/// Whole-sheet failures. A sheet that fails is never staged.
#[derive(Debug, Error)]
pub enum SheetError {
    #[error("Could not detect the header row (no row in the first {scanned_rows} matched the required columns)")]
    HeaderNotFound { scanned_rows: u32 },

    #[error("Sheet structure does not match, missing required columns: {}", missing.join(", "))]
    StructureMismatch { missing: Vec<String> },

    #[error("Workbook has no worksheets")]
    NoWorksheet,

    #[error("Unreadable workbook: {0}")]
    Workbook(String),

    /// The consumer of parsed rows went away (upload aborted)
    #[error("Row consumer closed")]
    ConsumerClosed,
}

/// A single cell as read from the workbook
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Text(String),
    Int(i64),
    Number(f64),
    Bool(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl CellValue {
    /// Blank cells and whitespace-only text
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Display form used for header matching and text fields.
    pub fn display(&self) -> Option<String> {
        match self {
            CellValue::Empty => None,
            CellValue::Text(s) => Some(s.clone()),
            CellValue::Int(i) => Some(i.to_string()),
            CellValue::Number(f) => Some(format_number(*f)),
            CellValue::Bool(b) => Some(b.to_string()),
            CellValue::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
            CellValue::DateTime(dt) => Some(dt.format("%Y-%m-%dT%H:%M:%S").to_string()),
        }
    }

    /// JSON form stored in the row's raw column map
    pub fn to_json(&self) -> Value {
        match self {
            CellValue::Empty => Value::Null,
            CellValue::Int(i) => Value::from(*i),
            CellValue::Number(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            CellValue::Bool(b) => Value::Bool(*b),
            other => other.display().map(Value::String).unwrap_or(Value::Null),
        }
    }
}

/// Integral floats print without a fractional part (`12.0` -> `12`).
pub(crate) fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// One data row of the sheet
#[derive(Debug, Clone)]
pub struct SheetRow {
    /// 1-based spreadsheet row number
    pub row_number: u32,
    /// Values of recognised columns
    pub values: HashMap<Field, CellValue>,
    /// Every column of the row keyed by normalized header (or `COL_<n>`)
    pub raw: Map<String, Value>,
}

impl SheetRow {
    pub fn get(&self, field: Field) -> Option<&CellValue> {
        self.values.get(&field)
    }
}
