//! xlsx driver for the row assembler

use calamine::{DataRef, Reader, Xlsx};
use chrono::NaiveDateTime;
use std::io::Cursor;
use tracing::debug;

use super::{CellValue, RowAssembler, ScanLimits, SheetError, SheetRow};

impl From<&DataRef<'_>> for CellValue {
    fn from(value: &DataRef<'_>) -> Self {
        match value {
            DataRef::Int(i) => CellValue::Int(*i),
            DataRef::Float(f) => CellValue::Number(*f),
            DataRef::String(s) => CellValue::Text(s.clone()),
            DataRef::SharedString(s) => CellValue::Text((*s).to_string()),
            DataRef::Bool(b) => CellValue::Bool(*b),
            DataRef::DateTime(dt) => dt
                .as_datetime()
                .map(CellValue::DateTime)
                .unwrap_or_else(|| CellValue::Number(dt.as_f64())),
            DataRef::DateTimeIso(s) => NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
                .map(CellValue::DateTime)
                .unwrap_or_else(|_| CellValue::Text(s.clone())),
            DataRef::DurationIso(s) => CellValue::Text(s.clone()),
            DataRef::Error(_) | DataRef::Empty => CellValue::Empty,
        }
    }
}

/// Pick the worksheet to read: `preferred` (case-insensitive) or the first one.
pub fn choose_sheet(names: &[String], preferred: &str) -> Option<String> {
    names
        .iter()
        .find(|n| n.trim().eq_ignore_ascii_case(preferred.trim()))
        .or_else(|| names.first())
        .cloned()
}

/// Stream the rows of an xlsx workbook into `sink`.
///
/// Cells are pulled one at a time from the worksheet XML; only the header
/// scan window and the row being assembled are held in memory. Returns the
/// number of rows delivered.
pub fn read_workbook<F>(bytes: &[u8], preferred_sheet: &str, mut sink: F) -> Result<usize, SheetError>
where
    F: FnMut(SheetRow) -> Result<(), SheetError>,
{
    let mut workbook: Xlsx<_> =
        Xlsx::new(Cursor::new(bytes)).map_err(|e| SheetError::Workbook(e.to_string()))?;

    let sheet = choose_sheet(&workbook.sheet_names(), preferred_sheet).ok_or(SheetError::NoWorksheet)?;
    debug!(sheet = %sheet, "Reading worksheet");

    let mut assembler = RowAssembler::new(ScanLimits::default());
    let mut delivered = 0usize;

    {
        let mut cells = workbook
            .worksheet_cells_reader(&sheet)
            .map_err(|e| SheetError::Workbook(e.to_string()))?;

        while let Some(cell) = cells
            .next_cell()
            .map_err(|e| SheetError::Workbook(e.to_string()))?
        {
            let (row, col) = cell.get_position();
            let value = CellValue::from(cell.get_value());
            for sheet_row in assembler.push(row, col, value)? {
                sink(sheet_row)?;
                delivered += 1;
            }
        }
    }

    for sheet_row in assembler.finish()? {
        sink(sheet_row)?;
        delivered += 1;
    }

    Ok(delivered)
}
