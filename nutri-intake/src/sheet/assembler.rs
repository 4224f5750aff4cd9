//! Row assembly from a row-major cell stream
//!
//! Cells arrive one at a time in row-major order, as a streaming xlsx reader
//! produces them. Until the header row is known only the first
//! `scan_rows` rows are buffered; after that each row is emitted as soon as
//! the next one starts, so memory stays bounded by one row.

use serde_json::{Map, Value};
use std::collections::HashMap;

use super::header::{score_row, HeaderLayout, MIN_HEADER_SCORE, PERFECT_HEADER_SCORE};
use super::{CellValue, SheetError, SheetRow};

#[derive(Debug, Clone, Copy)]
pub struct ScanLimits {
    /// Rows inspected while looking for the header
    pub scan_rows: u32,
    /// Columns inspected while scoring a header candidate
    pub scan_columns: u32,
    /// Columns read from data rows
    pub max_columns: u32,
}

impl Default for ScanLimits {
    fn default() -> Self {
        Self {
            scan_rows: 40,
            scan_columns: 80,
            max_columns: 120,
        }
    }
}

#[derive(Debug)]
struct BufferedRow {
    index: u32,
    cells: Vec<(u32, CellValue)>,
}

impl BufferedRow {
    fn new(index: u32) -> Self {
        Self {
            index,
            cells: Vec::new(),
        }
    }

    fn score(&self, scan_columns: u32) -> usize {
        score_row(
            self.cells
                .iter()
                .filter(|(col, _)| *col < scan_columns)
                .map(|(_, v)| v),
        )
    }
}

#[derive(Debug)]
enum Phase {
    Scanning(Vec<BufferedRow>),
    Streaming {
        layout: HeaderLayout,
        current: Option<BufferedRow>,
    },
}

/// Groups cells into [`SheetRow`]s once the header row has been located.
#[derive(Debug)]
pub struct RowAssembler {
    limits: ScanLimits,
    phase: Phase,
}

impl RowAssembler {
    pub fn new(limits: ScanLimits) -> Self {
        Self {
            limits,
            phase: Phase::Scanning(Vec::new()),
        }
    }

    /// Header layout, once detected
    pub fn layout(&self) -> Option<&HeaderLayout> {
        match &self.phase {
            Phase::Streaming { layout, .. } => Some(layout),
            Phase::Scanning(_) => None,
        }
    }

    /// Feed one cell (0-based row and column). Returns the rows completed by it.
    pub fn push(&mut self, row: u32, col: u32, value: CellValue) -> Result<Vec<SheetRow>, SheetError> {
        if value.is_blank() {
            return Ok(Vec::new());
        }

        let mut completed = Vec::new();

        if let Phase::Scanning(rows) = &mut self.phase {
            let starts_new_row = rows.last().map_or(true, |r| r.index != row);
            let last_is_perfect = starts_new_row
                && rows
                    .last()
                    .is_some_and(|r| r.score(self.limits.scan_columns) == PERFECT_HEADER_SCORE);

            if row >= self.limits.scan_rows || last_is_perfect {
                completed.extend(self.resolve_header()?);
            } else {
                if starts_new_row {
                    rows.push(BufferedRow::new(row));
                }
                if let Some(last) = rows.last_mut() {
                    last.cells.push((col, value));
                }
                return Ok(completed);
            }
        }

        if let Phase::Streaming { layout, current } = &mut self.phase {
            if col >= self.limits.max_columns {
                return Ok(completed);
            }
            match current {
                Some(open) if open.index == row => open.cells.push((col, value)),
                _ => {
                    let mut next = BufferedRow::new(row);
                    next.cells.push((col, value));
                    if let Some(done) = current.replace(next) {
                        completed.extend(build_row(layout, done, self.limits.max_columns));
                    }
                }
            }
        }

        Ok(completed)
    }

    /// Signal end of input. Returns any rows still buffered.
    pub fn finish(mut self) -> Result<Vec<SheetRow>, SheetError> {
        let mut completed = Vec::new();
        if matches!(self.phase, Phase::Scanning(_)) {
            completed.extend(self.resolve_header()?);
        }
        if let Phase::Streaming { layout, current } = &mut self.phase {
            if let Some(done) = current.take() {
                completed.extend(build_row(layout, done, self.limits.max_columns));
            }
        }
        Ok(completed)
    }

    /// Pick the header among the buffered rows and emit the rows after it.
    fn resolve_header(&mut self) -> Result<Vec<SheetRow>, SheetError> {
        let rows = match &mut self.phase {
            Phase::Scanning(rows) => std::mem::take(rows),
            Phase::Streaming { .. } => return Ok(Vec::new()),
        };

        let mut best: Option<(usize, usize)> = None;
        for (pos, row) in rows.iter().enumerate() {
            let score = row.score(self.limits.scan_columns);
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((pos, score));
            }
            if score == PERFECT_HEADER_SCORE {
                break;
            }
        }

        let header_pos = match best {
            Some((pos, score)) if score >= MIN_HEADER_SCORE => pos,
            _ => {
                return Err(SheetError::HeaderNotFound {
                    scanned_rows: self.limits.scan_rows,
                })
            }
        };

        let mut rows = rows.into_iter().skip(header_pos);
        let header = rows.next().ok_or(SheetError::HeaderNotFound {
            scanned_rows: self.limits.scan_rows,
        })?;
        let layout = HeaderLayout::from_cells(header.index, &header.cells, self.limits.max_columns)?;
        tracing::debug!(header_row = header.index + 1, "Detected header row");

        let completed = rows
            .filter_map(|r| build_row(&layout, r, self.limits.max_columns))
            .collect();

        self.phase = Phase::Streaming {
            layout,
            current: None,
        };
        Ok(completed)
    }
}

/// Map a buffered row through the layout. Rows with no non-blank cell are
/// dropped.
fn build_row(layout: &HeaderLayout, row: BufferedRow, max_columns: u32) -> Option<SheetRow> {
    let cells: Vec<(u32, CellValue)> = row
        .cells
        .into_iter()
        .filter(|(col, v)| *col < max_columns && !v.is_blank())
        .collect();
    if cells.is_empty() {
        return None;
    }

    let mut raw = Map::new();
    for (_, column) in layout.columns() {
        raw.insert(column.name.clone(), Value::Null);
    }

    let mut values = HashMap::new();
    for (col, value) in cells {
        match layout.column(col) {
            Some(column) => {
                raw.insert(column.name.clone(), value.to_json());
                if let Some(field) = column.field {
                    values.insert(field, value);
                }
            }
            None => {
                raw.insert(format!("COL_{}", col + 1), value.to_json());
            }
        }
    }

    Some(SheetRow {
        row_number: row.index + 1,
        values,
        raw,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet::Field;

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    fn feed(assembler: &mut RowAssembler, row: u32, values: &[CellValue]) -> Vec<SheetRow> {
        let mut out = Vec::new();
        for (col, v) in values.iter().enumerate() {
            out.extend(assembler.push(row, col as u32, v.clone()).unwrap());
        }
        out
    }

    fn header() -> Vec<CellValue> {
        ["#", "CUI DEL NIÑO", "NOMBRE DEL NIÑO", "AÑO", "MES"]
            .iter()
            .map(|s| text(s))
            .collect()
    }

    #[test]
    fn rows_stream_after_perfect_header() {
        let mut asm = RowAssembler::new(ScanLimits::default());
        assert!(feed(&mut asm, 0, &[text("NOMINA SEVEROS")]).is_empty());
        assert!(feed(&mut asm, 2, &header()).is_empty());

        let first = vec![
            CellValue::Int(7),
            text("1234567890101"),
            text("Ana"),
            CellValue::Int(2025),
            CellValue::Int(3),
        ];
        // Row 3 opens; the header resolves but row 3 is still open.
        assert!(feed(&mut asm, 3, &first).is_empty());
        assert!(asm.layout().is_some());

        // Starting row 4 completes row 3.
        let emitted = asm.push(4, 1, text("999")).unwrap();
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].row_number, 4);
        assert_eq!(emitted[0].get(Field::ChildName), Some(&text("Ana")));
        assert_eq!(emitted[0].get(Field::RegistrationCode), Some(&CellValue::Int(7)));

        let rest = asm.finish().unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].row_number, 5);
        assert!(rest[0].get(Field::ChildName).is_none());
    }

    #[test]
    fn three_of_four_groups_is_enough() {
        let mut asm = RowAssembler::new(ScanLimits::default());
        feed(&mut asm, 0, &[text("CUI"), text("NOMBRE DEL NIÑO"), text("AÑO")]);
        // Detected, but the sheet lacks MES and CUI DEL NIÑO.
        match asm.finish() {
            Err(SheetError::StructureMismatch { missing }) => {
                assert_eq!(missing, vec!["CUI DEL NINO".to_string(), "MES".to_string()]);
            }
            other => panic!("expected StructureMismatch, got {other:?}"),
        }
    }

    #[test]
    fn header_not_found_when_scores_stay_low() {
        let mut asm = RowAssembler::new(ScanLimits::default());
        feed(&mut asm, 0, &[text("NOMBRE"), text("MES")]);
        feed(&mut asm, 1, &[text("x"), text("y")]);
        assert!(matches!(asm.finish(), Err(SheetError::HeaderNotFound { .. })));
    }

    #[test]
    fn header_beyond_scan_window_is_not_found() {
        let mut asm = RowAssembler::new(ScanLimits::default());
        feed(&mut asm, 0, &[text("titulo")]);
        let err = asm.push(45, 0, text("CUI DEL NIÑO")).unwrap_err();
        assert!(matches!(err, SheetError::HeaderNotFound { scanned_rows: 40 }));
    }

    #[test]
    fn unnamed_columns_use_positional_keys() {
        let mut asm = RowAssembler::new(ScanLimits::default());
        feed(&mut asm, 0, &header());
        feed(&mut asm, 1, &[CellValue::Empty, text("1"), text("Luis")]);
        asm.push(1, 9, text("nota")).unwrap();
        let rows = asm.finish().unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].raw.get("COL_10"), Some(&Value::String("nota".into())));
        assert_eq!(rows[0].raw.get("MES"), Some(&Value::Null));
    }

    #[test]
    fn columns_beyond_limit_are_dropped() {
        let limits = ScanLimits {
            max_columns: 5,
            ..ScanLimits::default()
        };
        let mut asm = RowAssembler::new(limits);
        feed(&mut asm, 0, &header());
        feed(&mut asm, 1, &[CellValue::Empty, text("1"), text("Luis")]);
        asm.push(1, 7, text("far")).unwrap();
        let rows = asm.finish().unwrap();
        assert!(rows[0].raw.get("COL_8").is_none());
    }
}
