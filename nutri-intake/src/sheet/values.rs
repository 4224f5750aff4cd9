//! Cell value coercions applied when a sheet row is staged

use chrono::NaiveDate;

use super::{format_number, CellValue};

/// Trimmed text; blank becomes `None`.
pub fn text(value: Option<&CellValue>) -> Option<String> {
    let s = value?.display()?;
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// National ID or registration code in integral form.
///
/// Numeric cells lose their fractional `.0`; text cells keep their content
/// with a trailing `.0` removed (`"1234.0"` -> `"1234"`).
pub fn identifier(value: Option<&CellValue>) -> Option<String> {
    match value? {
        CellValue::Number(f) => Some(format_number(*f)),
        other => {
            let s = text(Some(other))?;
            Some(s.strip_suffix(".0").map(str::to_string).unwrap_or(s))
        }
    }
}

/// Whole number; floats and numeric text are truncated.
pub fn integer(value: Option<&CellValue>) -> Option<i64> {
    match value? {
        CellValue::Int(i) => Some(*i),
        CellValue::Number(f) if f.is_finite() => Some(f.trunc() as i64),
        CellValue::Text(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
        }
        _ => None,
    }
}

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%Y/%m/%d"];

/// Calendar date from a date cell or from `YYYY-MM-DD` / `DD/MM/YYYY` text.
pub fn date(value: Option<&CellValue>) -> Option<NaiveDate> {
    match value? {
        CellValue::Date(d) => Some(*d),
        CellValue::DateTime(dt) => Some(dt.date()),
        CellValue::Text(s) => parse_date_text(s.trim()),
        _ => None,
    }
}

fn parse_date_text(s: &str) -> Option<NaiveDate> {
    if s.is_empty() {
        return None;
    }
    // Drop a time component (`2024-01-05 00:00:00`, `2024-01-05T00:00:00`).
    let day_part = s.split(['T', ' ']).next().unwrap_or(s);
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(day_part, fmt).ok())
}
