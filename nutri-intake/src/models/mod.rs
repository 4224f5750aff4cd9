//! Domain models

pub mod batch;
pub mod case_record;
pub mod decision;
pub mod staging_row;

pub use batch::{Batch, BatchStatus, NewBatch, RowCounts, YearSummary};
pub use case_record::{CaseGeneralInfo, NewCaseRecord};
pub use decision::{Decision, DecisionReason};
pub use staging_row::{ErrorCode, RowState, StagingFields, StagingRow};
