//! Header detection and column mapping

use nutri_common::text::normalize_header;
use std::collections::{BTreeMap, BTreeSet};

use super::{CellValue, SheetError};

/// Canonical nomination fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    RegistrationCode,
    Year,
    Month,
    HealthArea,
    HealthDistrict,
    HealthService,
    ResidenceDepartment,
    ResidenceMunicipality,
    ResidenceCommunity,
    ResidenceAddress,
    ChildCui,
    Sex,
    AgeYears,
    ChildName,
    BirthDate,
    FirstContactDate,
    RegistrationDate,
    Cie10,
    Diagnosis,
    MotherName,
    MotherCui,
    FatherName,
    FatherCui,
    GuardianPhones,
    Validation,
}

impl Field {
    pub const ALL: [Field; 25] = [
        Field::RegistrationCode,
        Field::Year,
        Field::Month,
        Field::HealthArea,
        Field::HealthDistrict,
        Field::HealthService,
        Field::ResidenceDepartment,
        Field::ResidenceMunicipality,
        Field::ResidenceCommunity,
        Field::ResidenceAddress,
        Field::ChildCui,
        Field::Sex,
        Field::AgeYears,
        Field::ChildName,
        Field::BirthDate,
        Field::FirstContactDate,
        Field::RegistrationDate,
        Field::Cie10,
        Field::Diagnosis,
        Field::MotherName,
        Field::MotherCui,
        Field::FatherName,
        Field::FatherCui,
        Field::GuardianPhones,
        Field::Validation,
    ];

    /// Canonical header after normalization and aliasing
    pub fn canonical_header(self) -> &'static str {
        match self {
            Field::RegistrationCode => "RUB",
            Field::Year => "ANO",
            Field::Month => "MES",
            Field::HealthArea => "AREA DE SALUD",
            Field::HealthDistrict => "DISTRITO DE SALUD",
            Field::HealthService => "SERVICIO DE SALUD",
            Field::ResidenceDepartment => "DEPARTAMENTO DE RESIDENCIA",
            Field::ResidenceMunicipality => "MUNICIPIO DE RESIDENCIA",
            Field::ResidenceCommunity => "COMUNIDAD RESIDENCIA",
            Field::ResidenceAddress => "DIRECCION RESIDENCIA",
            Field::ChildCui => "CUI DEL NINO",
            Field::Sex => "SEXO",
            Field::AgeYears => "EDAD EN ANOS",
            Field::ChildName => "NOMBRE DEL NINO",
            Field::BirthDate => "FECHA NACIMIENTO",
            Field::FirstContactDate => "FECHA DEL PRIMER CONTACTO",
            Field::RegistrationDate => "FECHA DE REGISTRO",
            Field::Cie10 => "CIE 10",
            Field::Diagnosis => "DIAGNOSTICO",
            Field::MotherName => "NOMBRE DE LA MADRE",
            Field::MotherCui => "CUI DE LA MADRE",
            Field::FatherName => "NOMBRE DEL PADRE",
            Field::FatherCui => "CUI DEL PADRE",
            Field::GuardianPhones => "TELEFONOS ENCARGADOS",
            Field::Validation => "VALIDACION",
        }
    }

    /// Field label in the eligibility engine's message vocabulary
    pub fn wire_label(self) -> &'static str {
        match self {
            Field::RegistrationCode => "#",
            Field::ResidenceCommunity => "COMUNIDAD DE RESIDENCIA",
            Field::ResidenceAddress => "DIRECCION DE RESIDENCIA",
            Field::ChildCui => "CUI DEL NIÑO",
            Field::AgeYears => "EDAD EN AÑOS",
            Field::ChildName => "NOMBRE DEL NIÑO",
            Field::Cie10 => "CIE-10",
            Field::GuardianPhones => "TELEFONOS DEL ENCARGADO",
            other => other.canonical_header(),
        }
    }

    pub fn from_canonical_header(header: &str) -> Option<Field> {
        Field::ALL
            .iter()
            .copied()
            .find(|f| f.canonical_header() == header)
    }
}

/// Headers that must be present for a sheet to be accepted
pub const REQUIRED_HEADERS: [&str; 4] = ["CUI DEL NINO", "NOMBRE DEL NINO", "ANO", "MES"];

/// Scoring groups for header detection, one point per group present
const TRIGGER_GROUPS: [&[&str]; 4] = [
    &["CUI DEL NINO", "CUI NINO", "CUI"],
    &["NOMBRE DEL NINO", "NOMBRE NINO"],
    &["ANO", "ANIO"],
    &["MES"],
];

/// Minimum score for a row to be accepted as the header
pub const MIN_HEADER_SCORE: usize = 3;

pub const PERFECT_HEADER_SCORE: usize = TRIGGER_GROUPS.len();

/// Spelling variants folded onto canonical headers (keys are normalized)
const ALIASES: &[(&str, &str)] = &[
    ("COMUNIDAD DE RESIDENCIA", "COMUNIDAD RESIDENCIA"),
    ("DIRECCION DE RESIDENCIA", "DIRECCION RESIDENCIA"),
    ("TELEFONOS DEL ENCARGADO", "TELEFONOS ENCARGADOS"),
    ("TELEFONO ENCARGADOS", "TELEFONOS ENCARGADOS"),
    ("TELEFONO DEL ENCARGADO", "TELEFONOS ENCARGADOS"),
    ("TELEFONOS DE LOS ENCARGADOS", "TELEFONOS ENCARGADOS"),
    ("EDAD EN ANIOS", "EDAD EN ANOS"),
    ("EDAD ANOS", "EDAD EN ANOS"),
    ("CUI NINO", "CUI DEL NINO"),
    ("NOMBRE NINO", "NOMBRE DEL NINO"),
    ("ANIO", "ANO"),
    ("CIE10", "CIE 10"),
    ("FECHA DE NACIMIENTO", "FECHA NACIMIENTO"),
    ("REGISTRO UNICO DE BENEFICIARIO", "RUB"),
    ("REGISTRO UNICO BENEFICIARIO", "RUB"),
];

/// Normalize a header cell. A literal `#` header is the registration code.
pub fn header_key(raw: &str) -> String {
    if raw.trim() == "#" {
        return "RUB".to_string();
    }
    normalize_header(raw)
}

pub fn apply_alias(normalized: String) -> String {
    ALIASES
        .iter()
        .find(|(from, _)| *from == normalized)
        .map(|(_, to)| (*to).to_string())
        .unwrap_or(normalized)
}

/// Count the trigger groups present among a row's (normalized) header cells.
pub fn score_row<'a>(cells: impl IntoIterator<Item = &'a CellValue>) -> usize {
    let present: BTreeSet<String> = cells
        .into_iter()
        .filter_map(|c| c.display())
        .map(|s| header_key(&s))
        .filter(|s| !s.is_empty())
        .collect();

    TRIGGER_GROUPS
        .iter()
        .filter(|group| group.iter().any(|g| present.contains(*g)))
        .count()
}

/// One header column
#[derive(Debug, Clone)]
pub struct ColumnSpec {
    /// Normalized, aliased header (empty when the header cell is blank)
    pub name: String,
    pub field: Option<Field>,
}

/// The detected header row and its column mapping
#[derive(Debug, Clone)]
pub struct HeaderLayout {
    /// 0-based row index of the header
    pub header_row: u32,
    columns: BTreeMap<u32, ColumnSpec>,
}

impl HeaderLayout {
    /// Build a layout from the header row's cells, rejecting sheets that lack
    /// a required column.
    pub fn from_cells(
        header_row: u32,
        cells: &[(u32, CellValue)],
        max_columns: u32,
    ) -> Result<Self, SheetError> {
        let mut columns = BTreeMap::new();
        for (col, value) in cells {
            if *col >= max_columns {
                continue;
            }
            let name = value
                .display()
                .map(|s| apply_alias(header_key(&s)))
                .unwrap_or_default();
            if name.is_empty() {
                continue;
            }
            let field = Field::from_canonical_header(&name);
            columns.insert(*col, ColumnSpec { name, field });
        }

        let present: BTreeSet<&str> = columns.values().map(|c| c.name.as_str()).collect();
        let missing: Vec<String> = REQUIRED_HEADERS
            .iter()
            .filter(|h| !present.contains(*h))
            .map(|h| (*h).to_string())
            .collect();
        if !missing.is_empty() {
            return Err(SheetError::StructureMismatch { missing });
        }

        Ok(Self {
            header_row,
            columns,
        })
    }

    pub fn column(&self, col: u32) -> Option<&ColumnSpec> {
        self.columns.get(&col)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&u32, &ColumnSpec)> {
        self.columns.iter()
    }

    pub fn field_column(&self, field: Field) -> Option<u32> {
        self.columns
            .iter()
            .find(|(_, col)| col.field == Some(field))
            .map(|(col, _)| *col)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_cells(labels: &[&str]) -> Vec<(u32, CellValue)> {
        labels
            .iter()
            .enumerate()
            .map(|(i, l)| (i as u32, CellValue::Text((*l).to_string())))
            .collect()
    }

    #[test]
    fn hash_header_means_registration_code() {
        assert_eq!(header_key("#"), "RUB");
        assert_eq!(header_key(" # "), "RUB");
    }

    #[test]
    fn accented_and_hyphenated_headers_map_to_fields() {
        let cells = text_cells(&[
            "CUI del Niño",
            "Nombre del niño",
            "Año",
            "mes",
            "CIE-10",
            "Teléfonos del encargado",
            "Edad en años",
        ]);
        let layout = HeaderLayout::from_cells(0, &cells, 120).unwrap();

        assert_eq!(layout.field_column(Field::ChildCui), Some(0));
        assert_eq!(layout.field_column(Field::ChildName), Some(1));
        assert_eq!(layout.field_column(Field::Year), Some(2));
        assert_eq!(layout.field_column(Field::Month), Some(3));
        assert_eq!(layout.field_column(Field::Cie10), Some(4));
        assert_eq!(layout.field_column(Field::GuardianPhones), Some(5));
        assert_eq!(layout.field_column(Field::AgeYears), Some(6));
    }

    #[test]
    fn missing_required_header_is_structure_mismatch() {
        let cells = text_cells(&["CUI DEL NIÑO", "AÑO", "MES", "SEXO"]);
        match HeaderLayout::from_cells(0, &cells, 120) {
            Err(SheetError::StructureMismatch { missing }) => {
                assert_eq!(missing, vec!["NOMBRE DEL NINO".to_string()]);
            }
            other => panic!("expected StructureMismatch, got {other:?}"),
        }
    }

    #[test]
    fn unknown_columns_are_kept_without_field() {
        let cells = text_cells(&["CUI DEL NIÑO", "NOMBRE DEL NIÑO", "AÑO", "MES", "OBSERVACIONES"]);
        let layout = HeaderLayout::from_cells(0, &cells, 120).unwrap();
        let col = layout.column(4).unwrap();
        assert_eq!(col.name, "OBSERVACIONES");
        assert!(col.field.is_none());
    }

    #[test]
    fn score_counts_groups_not_cells() {
        let cells: Vec<CellValue> = ["CUI", "CUI DEL NINO", "AÑO"]
            .iter()
            .map(|s| CellValue::Text((*s).to_string()))
            .collect();
        assert_eq!(score_row(&cells), 2);
    }

    #[test]
    fn every_field_has_a_distinct_wire_label() {
        let labels: BTreeSet<&str> = Field::ALL.iter().map(|f| f.wire_label()).collect();
        assert_eq!(labels.len(), Field::ALL.len());
    }
}
