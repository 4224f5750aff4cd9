//! Database access for the intake pipeline
//!
//! Free functions over `SqlitePool` for reads and over `SqliteConnection`
//! for anything that must run inside a caller's transaction.

pub mod batches;
pub mod case_records;
pub mod catalogs;
pub mod duplicates;
pub mod staging;

/// 1-based page and a page size, turned into LIMIT/OFFSET
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u32,
    pub limit: u32,
}

impl Page {
    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            page: page.max(1),
            limit: limit.max(1),
        }
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.limit)
    }
}
