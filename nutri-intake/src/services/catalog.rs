//! Catalog Lookup
//!
//! Resolves territory and health-catalog names from the sheet to catalog
//! ids. Matching ignores case, accents and repeated whitespace, and accepts
//! either the catalog name or its code. An unknown value resolves to `None`.

use async_trait::async_trait;
use nutri_common::text::normalize_lookup;
use nutri_common::Result;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::db::catalogs::{load_catalog, CatalogEntry, CatalogKind};

#[async_trait]
pub trait CatalogLookup: Send + Sync {
    /// Id of the entry of `kind` whose name or code matches `value`.
    async fn resolve(&self, kind: CatalogKind, value: &str) -> Result<Option<i64>>;

    /// Municipality id, preferring entries of `department_id` when names
    /// repeat across departments.
    async fn resolve_municipality(&self, department_id: Option<i64>, value: &str) -> Result<Option<i64>>;
}

/// Catalog lookup over the local catalog tables, cached per catalog on
/// first use.
pub struct SqliteCatalogLookup {
    pool: SqlitePool,
    cache: RwLock<HashMap<CatalogKind, Arc<Vec<IndexedEntry>>>>,
}

#[derive(Debug, Clone)]
struct IndexedEntry {
    id: i64,
    name_key: String,
    code_key: Option<String>,
    parent_id: Option<i64>,
}

impl IndexedEntry {
    fn new(entry: CatalogEntry) -> Self {
        Self {
            id: entry.id,
            name_key: normalize_lookup(&entry.name),
            code_key: entry
                .code
                .as_deref()
                .map(normalize_lookup)
                .filter(|c| !c.is_empty()),
            parent_id: entry.parent_id,
        }
    }

    fn matches(&self, key: &str) -> bool {
        self.name_key == key || self.code_key.as_deref() == Some(key)
    }
}

impl SqliteCatalogLookup {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Forget cached catalogs, e.g. after an external catalog reload.
    pub async fn invalidate(&self) {
        self.cache.write().await.clear();
    }

    async fn entries(&self, kind: CatalogKind) -> Result<Arc<Vec<IndexedEntry>>> {
        if let Some(entries) = self.cache.read().await.get(&kind) {
            return Ok(Arc::clone(entries));
        }

        let loaded: Vec<IndexedEntry> = load_catalog(&self.pool, kind)
            .await?
            .into_iter()
            .map(IndexedEntry::new)
            .collect();
        tracing::debug!(catalog = kind.table(), entries = loaded.len(), "Catalog cached");

        let loaded = Arc::new(loaded);
        self.cache.write().await.insert(kind, Arc::clone(&loaded));
        Ok(loaded)
    }
}

#[async_trait]
impl CatalogLookup for SqliteCatalogLookup {
    async fn resolve(&self, kind: CatalogKind, value: &str) -> Result<Option<i64>> {
        let key = normalize_lookup(value);
        if key.is_empty() {
            return Ok(None);
        }
        let entries = self.entries(kind).await?;
        Ok(entries.iter().find(|e| e.matches(&key)).map(|e| e.id))
    }

    async fn resolve_municipality(&self, department_id: Option<i64>, value: &str) -> Result<Option<i64>> {
        let key = normalize_lookup(value);
        if key.is_empty() {
            return Ok(None);
        }
        let entries = self.entries(CatalogKind::Municipality).await?;
        let mut candidates = entries.iter().filter(|e| e.matches(&key));

        let Some(department_id) = department_id else {
            return Ok(candidates.next().map(|e| e.id));
        };
        let candidates: Vec<&IndexedEntry> = candidates.collect();
        Ok(candidates
            .iter()
            .find(|e| e.parent_id == Some(department_id))
            .or_else(|| candidates.first())
            .map(|e| e.id))
    }
}
