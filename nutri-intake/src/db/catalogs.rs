//! Catalog reads

use nutri_common::Result;
use sqlx::{Row, SqlitePool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CatalogKind {
    Department,
    Municipality,
    HealthArea,
    HealthDistrict,
    HealthService,
    Sex,
    Validation,
}

impl CatalogKind {
    pub fn table(&self) -> &'static str {
        match self {
            CatalogKind::Department => "cat_departments",
            CatalogKind::Municipality => "cat_municipalities",
            CatalogKind::HealthArea => "cat_health_areas",
            CatalogKind::HealthDistrict => "cat_health_districts",
            CatalogKind::HealthService => "cat_health_services",
            CatalogKind::Sex => "cat_sex",
            CatalogKind::Validation => "cat_validation",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub id: i64,
    pub code: Option<String>,
    pub name: String,
    /// Parent department, for municipalities
    pub parent_id: Option<i64>,
}

pub async fn load_catalog(pool: &SqlitePool, kind: CatalogKind) -> Result<Vec<CatalogEntry>> {
    let sql = match kind {
        CatalogKind::Municipality => {
            "SELECT id, code, name, department_id AS parent_id FROM cat_municipalities".to_string()
        }
        other => format!("SELECT id, code, name, NULL AS parent_id FROM {}", other.table()),
    };

    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    rows.iter()
        .map(|row| {
            Ok(CatalogEntry {
                id: row.try_get("id")?,
                code: row.try_get("code")?,
                name: row.try_get("name")?,
                parent_id: row.try_get("parent_id")?,
            })
        })
        .collect()
}
