//! Batch model
//!
//! A batch is one uploaded sheet. Its counters are denormalized from the
//! staging rows and its status is derived from the counters alone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    /// No rows
    Loaded,
    /// Some rows still pending
    UnderReview,
    /// Rows exist and none are pending
    Finalized,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Loaded => "LOADED",
            BatchStatus::UnderReview => "UNDER_REVIEW",
            BatchStatus::Finalized => "FINALIZED",
        }
    }

    pub fn from_counts(counts: &RowCounts) -> Self {
        if counts.total == 0 {
            BatchStatus::Loaded
        } else if counts.pending == 0 {
            BatchStatus::Finalized
        } else {
            BatchStatus::UnderReview
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOADED" => Ok(BatchStatus::Loaded),
            "UNDER_REVIEW" => Ok(BatchStatus::UnderReview),
            "FINALIZED" => Ok(BatchStatus::Finalized),
            other => Err(format!("unknown batch status: {other}")),
        }
    }
}

/// Row counts per state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowCounts {
    pub total: i64,
    pub pending: i64,
    pub processed: i64,
    pub error: i64,
    pub ignored: i64,
}

impl RowCounts {
    /// Every row is in exactly one state
    pub fn is_consistent(&self) -> bool {
        self.pending + self.processed + self.error + self.ignored == self.total
    }
}

/// Metadata supplied with an upload
#[derive(Debug, Clone)]
pub struct NewBatch {
    pub name: String,
    pub description: Option<String>,
    pub origin: Option<String>,
    pub year: i32,
    pub month: Option<u32>,
    pub uploaded_by: Option<String>,
    pub file_name: String,
    pub mime_type: Option<String>,
    pub size_bytes: i64,
    pub checksum_sha256: String,
    pub storage_provider: String,
    pub storage_key: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Batch {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub origin: Option<String>,
    pub year: i32,
    pub month: Option<u32>,
    pub uploaded_by: Option<String>,
    pub file_name: String,
    pub mime_type: Option<String>,
    pub size_bytes: i64,
    pub checksum_sha256: String,
    pub storage_provider: String,
    pub storage_key: String,
    pub status: BatchStatus,
    pub counts: RowCounts,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Batches uploaded for one year
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct YearSummary {
    pub year: i32,
    pub batches: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(total: i64, pending: i64) -> RowCounts {
        RowCounts {
            total,
            pending,
            processed: total - pending,
            ..RowCounts::default()
        }
    }

    #[test]
    fn status_follows_counts() {
        assert_eq!(BatchStatus::from_counts(&counts(0, 0)), BatchStatus::Loaded);
        assert_eq!(BatchStatus::from_counts(&counts(5, 2)), BatchStatus::UnderReview);
        assert_eq!(BatchStatus::from_counts(&counts(5, 0)), BatchStatus::Finalized);
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [BatchStatus::Loaded, BatchStatus::UnderReview, BatchStatus::Finalized] {
            assert_eq!(status.as_str().parse::<BatchStatus>().unwrap(), status);
        }
        assert!("CARGADO".parse::<BatchStatus>().is_err());
    }
}
