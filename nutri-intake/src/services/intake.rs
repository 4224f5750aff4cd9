//! Batch Intake
//!
//! Creates a batch from an uploaded workbook. The batch row and every
//! staging row are written in one transaction; any sheet failure rolls the
//! whole batch back so a rejected upload leaves nothing behind.

use chrono::{DateTime, Utc};
use nutri_common::config::IntakeConfig;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::aggregator::recompute_batch;
use crate::db::batches::{get_batch, insert_batch};
use crate::db::staging::insert_row;
use crate::models::{Batch, NewBatch, StagingFields};
use crate::sheet::{read_workbook, SheetError, SheetRow};
use crate::utils::begin_monitored;

/// Rows in flight between the parser thread and the inserter
const ROW_CHANNEL_CAPACITY: usize = 256;

pub const STORAGE_PENDING: &str = "PENDING";
pub const STORAGE_LOCAL: &str = "LOCAL";

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Upload of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },

    #[error(transparent)]
    Sheet(#[from] SheetError),

    #[error("Sheet has a header row but no data rows")]
    NoRows,

    #[error(transparent)]
    Internal(#[from] nutri_common::Error),
}

/// Uploaded file plus batch metadata
#[derive(Debug, Clone, Default)]
pub struct Upload {
    pub name: String,
    pub description: Option<String>,
    pub origin: Option<String>,
    pub year: i32,
    pub month: Option<u32>,
    pub uploaded_by: Option<String>,
    pub file_name: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntakeReport {
    pub batch_id: i64,
    pub rows: usize,
    pub storage_key: String,
    pub checksum_sha256: String,
    pub batch: Batch,
}

#[derive(Debug, Clone)]
pub struct IntakeSettings {
    pub preferred_sheet: String,
    pub max_upload_bytes: usize,
    /// Where accepted uploads are copied, when archiving is on
    pub archive_dir: Option<PathBuf>,
}

impl IntakeSettings {
    pub fn from_config(config: &IntakeConfig, data_folder: &Path) -> Self {
        Self {
            preferred_sheet: config.preferred_sheet.clone(),
            max_upload_bytes: config.max_upload_bytes,
            archive_dir: config.archive_uploads.then(|| data_folder.join("uploads")),
        }
    }
}

impl Default for IntakeSettings {
    fn default() -> Self {
        let config = IntakeConfig::default();
        Self {
            preferred_sheet: config.preferred_sheet,
            max_upload_bytes: config.max_upload_bytes,
            archive_dir: None,
        }
    }
}

pub struct IntakeService {
    pool: SqlitePool,
    settings: IntakeSettings,
}

/// Lowercase hex SHA-256 of the upload
pub fn checksum_sha256(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// `nominations/<year>/<timestamp>_<sanitized file name>`
pub fn storage_key(year: i32, file_name: &str, now: DateTime<Utc>) -> String {
    let base = Path::new(file_name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload.xlsx");
    let safe: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("nominations/{year}/{}_{safe}", now.format("%Y%m%d%H%M%S%3f"))
}

fn optional(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl IntakeService {
    pub fn new(pool: SqlitePool, settings: IntakeSettings) -> Self {
        Self { pool, settings }
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.settings.max_upload_bytes
    }

    fn validate(&self, upload: &Upload) -> Result<(), IntakeError> {
        if upload.name.trim().is_empty() {
            return Err(IntakeError::InvalidInput("Batch name is required".into()));
        }
        if !(1900..=2100).contains(&upload.year) {
            return Err(IntakeError::InvalidInput(format!("Invalid year: {}", upload.year)));
        }
        if let Some(month) = upload.month {
            if !(1..=12).contains(&month) {
                return Err(IntakeError::InvalidInput(format!("Invalid month: {month}")));
            }
        }
        if upload.bytes.is_empty() {
            return Err(IntakeError::InvalidInput("Uploaded file is empty".into()));
        }
        if upload.bytes.len() > self.settings.max_upload_bytes {
            return Err(IntakeError::TooLarge {
                size: upload.bytes.len(),
                limit: self.settings.max_upload_bytes,
            });
        }
        Ok(())
    }

    /// Stage an uploaded workbook as a new batch.
    pub async fn create_batch(&self, upload: Upload) -> Result<IntakeReport, IntakeError> {
        self.validate(&upload)?;

        let now = Utc::now();
        let checksum = checksum_sha256(&upload.bytes);
        let key = storage_key(upload.year, &upload.file_name, now);
        let provider = if self.settings.archive_dir.is_some() {
            STORAGE_LOCAL
        } else {
            STORAGE_PENDING
        };

        let new_batch = NewBatch {
            name: upload.name.trim().to_string(),
            description: optional(upload.description),
            origin: optional(upload.origin),
            year: upload.year,
            month: upload.month,
            uploaded_by: optional(upload.uploaded_by),
            file_name: upload.file_name.clone(),
            mime_type: optional(upload.mime_type),
            size_bytes: upload.bytes.len() as i64,
            checksum_sha256: checksum.clone(),
            storage_provider: provider.to_string(),
            storage_key: key.clone(),
        };
        let bytes: Arc<[u8]> = upload.bytes.into();

        let mut tx = begin_monitored(&self.pool, "create_batch").await?;
        let batch_id = insert_batch(tx.conn()?, &new_batch, now).await?;
        debug!(batch_id, file = %new_batch.file_name, "Batch row inserted, parsing sheet");

        let (sender, mut receiver) = mpsc::channel::<SheetRow>(ROW_CHANNEL_CAPACITY);
        let preferred = self.settings.preferred_sheet.clone();
        let reader_bytes = Arc::clone(&bytes);
        let reader = tokio::task::spawn_blocking(move || {
            read_workbook(&reader_bytes, &preferred, |row| {
                sender.blocking_send(row).map_err(|_| SheetError::ConsumerClosed)
            })
        });

        let mut inserted = 0usize;
        let mut insert_error = None;
        while let Some(row) = receiver.recv().await {
            let fields = StagingFields::from_sheet_row(&row);
            let raw = Value::Object(row.raw);
            let conn = match tx.conn() {
                Ok(conn) => conn,
                Err(e) => {
                    insert_error = Some(e);
                    break;
                }
            };
            match insert_row(conn, batch_id, i64::from(row.row_number), &fields, &raw, now).await {
                Ok(_) => inserted += 1,
                Err(e) => {
                    insert_error = Some(e);
                    break;
                }
            }
        }
        // Unblocks the parser if we stopped early
        drop(receiver);

        let read_result = reader
            .await
            .map_err(|e| nutri_common::Error::Internal(format!("Sheet reader task failed: {e}")))?;
        if let Some(err) = insert_error {
            return Err(err.into());
        }
        if let Err(err) = read_result {
            warn!(batch_id, error = %err, "Sheet rejected, batch rolled back");
            return Err(err.into());
        }
        if inserted == 0 {
            return Err(IntakeError::NoRows);
        }

        let counts = recompute_batch(tx.conn()?, batch_id).await?;

        if let Some(dir) = &self.settings.archive_dir {
            let target = dir.join(&key);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(nutri_common::Error::Io)?;
            }
            tokio::fs::write(&target, &bytes[..]).await.map_err(nutri_common::Error::Io)?;
            debug!(path = %target.display(), "Upload archived");
        }

        tx.commit().await?;

        let batch = get_batch(&self.pool, batch_id)
            .await?
            .ok_or_else(|| nutri_common::Error::Internal(format!("Batch {batch_id} vanished after commit")))?;
        info!(
            batch_id,
            rows = inserted,
            total = counts.total,
            year = batch.year,
            storage_key = %key,
            "Batch staged"
        );

        Ok(IntakeReport {
            batch_id,
            rows: inserted,
            storage_key: key,
            checksum_sha256: checksum,
            batch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn checksum_is_lowercase_hex() {
        assert_eq!(
            checksum_sha256(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn storage_key_sanitizes_file_name() {
        let now = Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(
            storage_key(2025, "../Nóminas marzo (v2).xlsx", now),
            "nominations/2025/20250304050607000_N_minas_marzo__v2_.xlsx"
        );
    }

    #[tokio::test]
    async fn validation_rejects_bad_metadata() {
        let pool = SqlitePool::connect_lazy("sqlite::memory:").unwrap();
        let service = IntakeService::new(
            pool,
            IntakeSettings {
                max_upload_bytes: 4,
                ..IntakeSettings::default()
            },
        );
        let upload = Upload {
            name: "Marzo".into(),
            year: 2025,
            month: Some(3),
            bytes: vec![1, 2, 3],
            ..Upload::default()
        };
        assert!(service.validate(&upload).is_ok());

        let cases = [
            Upload { name: "  ".into(), ..upload.clone() },
            Upload { year: 1850, ..upload.clone() },
            Upload { month: Some(13), ..upload.clone() },
            Upload { bytes: Vec::new(), ..upload.clone() },
        ];
        for bad in &cases {
            assert!(matches!(service.validate(bad), Err(IntakeError::InvalidInput(_))));
        }
        let big = Upload { bytes: vec![0; 5], ..upload };
        assert!(matches!(service.validate(&big), Err(IntakeError::TooLarge { size: 5, limit: 4 })));
    }
}
