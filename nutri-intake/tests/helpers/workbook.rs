//! In-memory xlsx fixtures

use rust_xlsxwriter::Workbook;

/// Header row as the health areas send it
pub const STANDARD_HEADERS: [&str; 10] = [
    "#",
    "AÑO",
    "MES",
    "ÁREA DE SALUD",
    "DEPARTAMENTO DE RESIDENCIA",
    "MUNICIPIO DE RESIDENCIA",
    "CUI DEL NIÑO",
    "SEXO",
    "NOMBRE DEL NIÑO",
    "FECHA DE NACIMIENTO",
];

/// One nomination line, in `STANDARD_HEADERS` order
#[derive(Debug, Clone)]
pub struct Nomination {
    pub registration_code: String,
    pub year: String,
    pub month: String,
    pub health_area: String,
    pub department: String,
    pub municipality: String,
    pub cui: String,
    pub sex: String,
    pub name: String,
    pub birth_date: String,
}

impl Nomination {
    pub fn new(cui: &str, name: &str) -> Self {
        Self {
            registration_code: String::new(),
            year: "2025".to_string(),
            month: "3".to_string(),
            health_area: "Alta Verapaz".to_string(),
            department: "ALTA VERAPAZ".to_string(),
            municipality: "Coban".to_string(),
            cui: cui.to_string(),
            sex: "M".to_string(),
            name: name.to_string(),
            birth_date: "2023-06-15".to_string(),
        }
    }

    pub fn with_registration_code(mut self, code: &str) -> Self {
        self.registration_code = code.to_string();
        self
    }

    pub fn cells(&self) -> Vec<String> {
        vec![
            self.registration_code.clone(),
            self.year.clone(),
            self.month.clone(),
            self.health_area.clone(),
            self.department.clone(),
            self.municipality.clone(),
            self.cui.clone(),
            self.sex.clone(),
            self.name.clone(),
            self.birth_date.clone(),
        ]
    }
}

/// One worksheet: optional title lines, then the header, then data rows
#[derive(Debug, Clone)]
pub struct SheetSpec {
    pub name: String,
    pub preamble: Vec<String>,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl SheetSpec {
    pub fn new(name: &str, headers: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            preamble: Vec::new(),
            headers: headers.iter().map(|h| (*h).to_string()).collect(),
            rows: Vec::new(),
        }
    }

    /// Put `lines` title rows above the header (header lands on row `lines + 1`)
    pub fn with_preamble(mut self, lines: usize) -> Self {
        self.preamble = (0..lines)
            .map(|i| format!("MINISTERIO DE SALUD - REPORTE {}", i + 1))
            .collect();
        self
    }

    pub fn with_row(mut self, cells: &[&str]) -> Self {
        self.rows.push(cells.iter().map(|c| (*c).to_string()).collect());
        self
    }

    /// A line holding only whitespace cells
    pub fn with_blank_row(mut self) -> Self {
        self.rows.push(vec!["   ".to_string(); self.headers.len()]);
        self
    }
}

/// Standard sheet holding `nominations`
pub fn nomination_sheet(name: &str, preamble: usize, nominations: &[Nomination]) -> SheetSpec {
    let mut sheet = SheetSpec::new(name, &STANDARD_HEADERS).with_preamble(preamble);
    sheet.rows = nominations.iter().map(Nomination::cells).collect();
    sheet
}

/// Digits-only cells are written as numbers, the way spreadsheets store
/// national IDs typed by hand.
fn is_numeric_cell(value: &str) -> bool {
    !value.is_empty() && value.len() <= 15 && value.chars().all(|c| c.is_ascii_digit())
}

pub fn nomination_workbook(sheets: &[SheetSpec]) -> Vec<u8> {
    let mut workbook = Workbook::new();
    for sheet_spec in sheets {
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(&sheet_spec.name).unwrap();

        let mut row: u32 = 0;
        for line in &sheet_spec.preamble {
            worksheet.write_string(row, 0, line).unwrap();
            row += 1;
        }
        for (col, header) in sheet_spec.headers.iter().enumerate() {
            worksheet.write_string(row, col as u16, header).unwrap();
        }
        row += 1;

        for cells in &sheet_spec.rows {
            for (col, value) in cells.iter().enumerate() {
                if value.is_empty() {
                    continue;
                }
                if is_numeric_cell(value) {
                    worksheet
                        .write_number(row, col as u16, value.parse::<f64>().unwrap())
                        .unwrap();
                } else {
                    worksheet.write_string(row, col as u16, value).unwrap();
                }
            }
            row += 1;
        }
    }
    workbook.save_to_buffer().unwrap()
}
