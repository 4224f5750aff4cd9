//! Row Reconciler
//!
//! Drives one staging row from PENDING to PROCESSED or ERROR:
//!
//! 1. Claim the row (PROCESSED short-circuits, IGNORED and ERROR refuse)
//! 2. Validate the mandatory identifiers
//! 3. Duplicate pre-check
//! 4. Eligibility engine call, outside any transaction
//! 5. Terminal transaction: confirm claim, authoritative duplicate check,
//!    case record insert, row update, batch recompute
//!
//! Every failure after the claim lands on the row as an error code; only
//! losing the claim to another pass leaves the row untouched.

use chrono::Utc;
use nutri_common::config::{DatabaseConfig, IntakeConfig};
use serde::Serialize;
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::aggregator::recompute_batch;
use super::case_builder::build_case_record;
use super::catalog::CatalogLookup;
use super::gateway::{redact, EligibilityGateway};
use crate::db::batches::get_batch;
use crate::db::case_records::insert_case_record;
use crate::db::duplicates::{find_duplicate, identifier_from_unique_violation};
use crate::db::staging::{
    self, claim_row, confirm_claim, get_row, mark_error, mark_processed, pending_row_ids,
    record_bpm_exchange, release_claim, BpmSnapshot,
};
use crate::models::{Batch, ErrorCode, NewCaseRecord, RowCounts, RowState, StagingRow};
use crate::utils::{begin_monitored, now_ms, retry_on_lock, MonitoredTransaction};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Staging row {0} not found")]
    NotFound(i64),

    #[error("Batch {0} not found")]
    BatchNotFound(i64),

    #[error("Staging row {0} is ignored")]
    AlreadyIgnored(i64),

    #[error("Staging row {row_id} is {state}; retry it before reconciling")]
    NotPending { row_id: i64, state: RowState },

    #[error("Staging row {row_id} cannot move from {from} to {to}")]
    InvalidTransition { row_id: i64, from: RowState, to: RowState },

    #[error("Staging row {0} is being reconciled by another pass")]
    Busy(i64),

    #[error("{0}")]
    InvalidInput(String),

    #[error(transparent)]
    Database(#[from] nutri_common::Error),
}

/// Result of reconciling one row
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RowOutcome {
    Processed {
        case_record_id: i64,
        /// True when the row was already PROCESSED and nothing was written
        already_processed: bool,
    },
    Failed { code: ErrorCode, message: String },
}

/// Counts reported by a bounded sweep
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub batch_id: i64,
    pub limit: u32,
    pub attempted: u32,
    pub processed: u32,
    pub errors: u32,
    pub skipped: u32,
    pub counts: RowCounts,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryReport {
    pub batch_id: i64,
    pub limit: u32,
    pub reset: u64,
    pub counts: RowCounts,
}

#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    /// Claims older than this are considered abandoned
    pub claim_ttl: Duration,
    pub max_lock_wait_ms: u64,
    pub default_sweep_limit: u32,
    pub max_sweep_limit: u32,
    pub default_retry_limit: u32,
    pub max_retry_limit: u32,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self::from_config(&IntakeConfig::default(), &DatabaseConfig::default())
    }
}

impl ReconcilerSettings {
    pub fn from_config(intake: &IntakeConfig, database: &DatabaseConfig) -> Self {
        Self {
            claim_ttl: Duration::from_secs(intake.claim_ttl_secs.max(1)),
            max_lock_wait_ms: database.max_lock_wait_ms,
            default_sweep_limit: intake.default_sweep_limit.max(1),
            max_sweep_limit: intake.max_sweep_limit.max(1),
            default_retry_limit: intake.default_retry_limit.max(1),
            max_retry_limit: intake.max_retry_limit.max(1),
        }
    }

    fn claim_ttl_ms(&self) -> i64 {
        i64::try_from(self.claim_ttl.as_millis()).unwrap_or(i64::MAX)
    }

    /// Requested sweep bound, defaulted and clamped to `1..=max`
    pub fn sweep_limit(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_sweep_limit)
            .clamp(1, self.max_sweep_limit)
    }

    pub fn retry_limit(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_retry_limit)
            .clamp(1, self.max_retry_limit)
    }
}

pub struct Reconciler {
    pool: SqlitePool,
    gateway: EligibilityGateway,
    catalogs: Arc<dyn CatalogLookup>,
    settings: ReconcilerSettings,
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

impl Reconciler {
    pub fn new(
        pool: SqlitePool,
        gateway: EligibilityGateway,
        catalogs: Arc<dyn CatalogLookup>,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            pool,
            gateway,
            catalogs,
            settings,
        }
    }

    pub fn settings(&self) -> &ReconcilerSettings {
        &self.settings
    }

    /// Reconcile one row.
    pub async fn reconcile_row(&self, row_id: i64) -> Result<RowOutcome, ReconcileError> {
        let row = get_row(&self.pool, row_id)
            .await?
            .ok_or(ReconcileError::NotFound(row_id))?;
        if let Some(outcome) = settled_outcome(&row)? {
            return Ok(outcome);
        }

        let batch = get_batch(&self.pool, row.batch_id)
            .await?
            .ok_or(ReconcileError::BatchNotFound(row.batch_id))?;

        let token = Uuid::new_v4().to_string();
        let pool = &self.pool;
        let ttl_ms = self.settings.claim_ttl_ms();
        let claimed = retry_on_lock("claim_row", self.settings.max_lock_wait_ms, || {
            claim_row(pool, row_id, &token, now_ms(), ttl_ms)
        })
        .await?;

        if !claimed {
            // Lost the race: report what the winner left behind
            let current = get_row(&self.pool, row_id)
                .await?
                .ok_or(ReconcileError::NotFound(row_id))?;
            return match settled_outcome(&current)? {
                Some(outcome) => Ok(outcome),
                None => Err(ReconcileError::Busy(row_id)),
            };
        }
        debug!(row_id, batch_id = batch.id, "Row claimed");

        match self.run_claimed(&row, &batch, &token).await {
            Ok(outcome) => Ok(outcome),
            Err(ReconcileError::Database(err)) => {
                error!(row_id, batch_id = batch.id, error = %err, "Unexpected failure reconciling row");
                self.fail(&row, &token, ErrorCode::UnexpectedError, &err.to_string())
                    .await
            }
            Err(other) => {
                if let Err(e) = release_claim(&self.pool, row_id, &token).await {
                    warn!(row_id, error = %e, "Failed to release claim");
                }
                Err(other)
            }
        }
    }

    async fn run_claimed(&self, row: &StagingRow, batch: &Batch, token: &str) -> Result<RowOutcome, ReconcileError> {
        let fields = &row.fields;

        let Some(cui) = non_blank(fields.child_cui.as_deref()) else {
            return self
                .fail(row, token, ErrorCode::MissingCui, "Child CUI is blank")
                .await;
        };
        let Some(child_name) = non_blank(fields.child_name.as_deref()) else {
            return self
                .fail(row, token, ErrorCode::MissingName, "Child name is blank")
                .await;
        };
        let registration_code = non_blank(fields.registration_code.as_deref());

        let early_hit = {
            let mut conn = self.pool.acquire().await.map_err(nutri_common::Error::from)?;
            find_duplicate(&mut conn, batch.year, Some(cui), registration_code, row.id).await?
        };
        if let Some(hit) = early_hit {
            return self
                .fail(row, token, hit.error_code(), &hit.message(batch.year))
                .await;
        }

        let request = self.gateway.build_request(fields, batch.year, batch.month);
        let audit_request = redact(&request);
        debug!(row_id = row.id, payload = %audit_request, "Submitting nomination to eligibility engine");

        let decision = match self.gateway.evaluate(&request).await {
            Ok(decision) => decision,
            Err(err) => {
                warn!(row_id = row.id, batch_id = batch.id, error = %err, "Eligibility engine call failed");
                let snapshot = BpmSnapshot {
                    request: Some(audit_request),
                    response: Some(json!({ "error": err.to_string() })),
                    ..BpmSnapshot::default()
                };
                self.record_exchange(row.id, token, &snapshot).await?;
                return self
                    .fail(row, token, ErrorCode::BpmError, &err.to_string())
                    .await;
            }
        };

        let snapshot = BpmSnapshot {
            request: Some(audit_request),
            response: Some(redact(&decision.raw_response)),
            status: Some(decision.status_label()),
            instance_id: decision.instance_id.clone(),
        };
        self.record_exchange(row.id, token, &snapshot).await?;

        if !decision.permit {
            let code = decision
                .reason
                .row_error_code()
                .unwrap_or(ErrorCode::BpmPendiente);
            return self
                .fail(row, token, code, &decision.rejection_message())
                .await;
        }

        let record = build_case_record(self.catalogs.as_ref(), row, batch, &decision, child_name).await?;
        self.commit_processed(row, batch, token, &record).await
    }

    async fn record_exchange(&self, row_id: i64, token: &str, snapshot: &BpmSnapshot) -> Result<(), ReconcileError> {
        let pool = &self.pool;
        retry_on_lock("record_bpm_exchange", self.settings.max_lock_wait_ms, || {
            record_bpm_exchange(pool, row_id, token, snapshot)
        })
        .await?;
        Ok(())
    }

    /// The terminal transaction for an approved row.
    async fn commit_processed(
        &self,
        row: &StagingRow,
        batch: &Batch,
        token: &str,
        record: &NewCaseRecord,
    ) -> Result<RowOutcome, ReconcileError> {
        let now = Utc::now();
        let mut tx = begin_monitored(&self.pool, "reconcile_row").await?;

        if !confirm_claim(tx.conn()?, row.id, token, now).await? {
            tx.rollback().await?;
            return Err(ReconcileError::Busy(row.id));
        }

        let hit = find_duplicate(
            tx.conn()?,
            batch.year,
            record.beneficiary_cui.as_deref(),
            record.registration_code.as_deref(),
            row.id,
        )
        .await?;
        if let Some(hit) = hit {
            let message = hit.message(batch.year);
            return self
                .fail_in(tx, row, token, hit.error_code(), &message)
                .await;
        }

        let case_record_id = match insert_case_record(tx.conn()?, record, now).await {
            Ok(id) => id,
            Err(err) => match identifier_from_unique_violation(&err) {
                Some(identifier) => {
                    let message = format!(
                        "{} already registered for {} (concurrent case record)",
                        identifier.label(),
                        batch.year
                    );
                    return self
                        .fail_in(tx, row, token, identifier.error_code(), &message)
                        .await;
                }
                None => return Err(err.into()),
            },
        };

        if !mark_processed(tx.conn()?, row.id, token, case_record_id, now).await? {
            tx.rollback().await?;
            return Err(ReconcileError::Busy(row.id));
        }
        let counts = recompute_batch(tx.conn()?, batch.id).await?;
        tx.commit().await?;

        info!(
            row_id = row.id,
            batch_id = batch.id,
            case_record_id,
            pending = counts.pending,
            "Row processed"
        );
        Ok(RowOutcome::Processed {
            case_record_id,
            already_processed: false,
        })
    }

    /// Write an error onto the claimed row inside an open transaction.
    async fn fail_in(
        &self,
        mut tx: MonitoredTransaction<'_>,
        row: &StagingRow,
        token: &str,
        code: ErrorCode,
        message: &str,
    ) -> Result<RowOutcome, ReconcileError> {
        if !mark_error(tx.conn()?, row.id, token, code, message, Utc::now()).await? {
            tx.rollback().await?;
            return Err(ReconcileError::Busy(row.id));
        }
        recompute_batch(tx.conn()?, row.batch_id).await?;
        tx.commit().await?;

        warn!(row_id = row.id, batch_id = row.batch_id, code = code.as_str(), error_message = message, "Row failed");
        Ok(RowOutcome::Failed {
            code,
            message: message.to_string(),
        })
    }

    /// Write an error onto the claimed row in a short transaction of its own.
    async fn fail(&self, row: &StagingRow, token: &str, code: ErrorCode, message: &str) -> Result<RowOutcome, ReconcileError> {
        let pool = &self.pool;
        let (row_id, batch_id) = (row.id, row.batch_id);
        let written = retry_on_lock("mark_error", self.settings.max_lock_wait_ms, move || async move {
            let mut tx = begin_monitored(pool, "mark_error").await?;
            let written = mark_error(tx.conn()?, row_id, token, code, message, Utc::now()).await?;
            if written {
                recompute_batch(tx.conn()?, batch_id).await?;
            }
            tx.commit().await?;
            Ok(written)
        })
        .await?;

        if !written {
            return Err(ReconcileError::Busy(row.id));
        }
        warn!(row_id, batch_id, code = code.as_str(), error_message = message, "Row failed");
        Ok(RowOutcome::Failed {
            code,
            message: message.to_string(),
        })
    }

    /// Reconcile up to `limit` pending rows of a batch, one after another.
    /// Row failures are counted, never raised.
    pub async fn sweep_pending(&self, batch_id: i64, limit: Option<u32>) -> Result<SweepReport, ReconcileError> {
        let limit = self.settings.sweep_limit(limit);
        get_batch(&self.pool, batch_id)
            .await?
            .ok_or(ReconcileError::BatchNotFound(batch_id))?;

        let ids = pending_row_ids(&self.pool, batch_id, limit, now_ms(), self.settings.claim_ttl_ms()).await?;
        let mut report = SweepReport {
            batch_id,
            limit,
            ..SweepReport::default()
        };

        for row_id in ids {
            report.attempted += 1;
            match self.reconcile_row(row_id).await {
                Ok(RowOutcome::Processed {
                    already_processed: false,
                    ..
                }) => report.processed += 1,
                Ok(RowOutcome::Processed { .. }) => report.skipped += 1,
                Ok(RowOutcome::Failed { .. }) => report.errors += 1,
                Err(
                    ReconcileError::Busy(_)
                    | ReconcileError::NotPending { .. }
                    | ReconcileError::AlreadyIgnored(_)
                    | ReconcileError::NotFound(_),
                ) => report.skipped += 1,
                Err(err) => {
                    error!(batch_id, row_id, error = %err, "Row could not be reconciled");
                    report.errors += 1;
                }
            }
        }

        report.counts = self.current_counts(batch_id).await?;
        info!(
            batch_id,
            attempted = report.attempted,
            processed = report.processed,
            errors = report.errors,
            skipped = report.skipped,
            "Sweep finished"
        );
        Ok(report)
    }

    /// ERROR → PENDING for one row. A PENDING row is returned unchanged.
    pub async fn retry_row(&self, row_id: i64) -> Result<StagingRow, ReconcileError> {
        let row = get_row(&self.pool, row_id)
            .await?
            .ok_or(ReconcileError::NotFound(row_id))?;
        match row.state {
            RowState::Pending => return Ok(row),
            RowState::Error => {}
            from => {
                return Err(ReconcileError::InvalidTransition {
                    row_id,
                    from,
                    to: RowState::Pending,
                })
            }
        }

        let pool = &self.pool;
        let batch_id = row.batch_id;
        retry_on_lock("retry_row", self.settings.max_lock_wait_ms, move || async move {
            let mut tx = begin_monitored(pool, "retry_row").await?;
            if staging::reset_row(tx.conn()?, row_id, Utc::now()).await? {
                recompute_batch(tx.conn()?, batch_id).await?;
            }
            tx.commit().await
        })
        .await?;

        info!(row_id, batch_id, "Row reset for retry");
        get_row(&self.pool, row_id)
            .await?
            .ok_or(ReconcileError::NotFound(row_id))
    }

    /// ERROR → PENDING for at most `limit` rows of a batch.
    pub async fn retry_errors(&self, batch_id: i64, limit: Option<u32>) -> Result<RetryReport, ReconcileError> {
        let limit = self.settings.retry_limit(limit);
        get_batch(&self.pool, batch_id)
            .await?
            .ok_or(ReconcileError::BatchNotFound(batch_id))?;

        let pool = &self.pool;
        let (reset, counts) = retry_on_lock("retry_errors", self.settings.max_lock_wait_ms, move || async move {
            let mut tx = begin_monitored(pool, "retry_errors").await?;
            let reset = staging::reset_errors(tx.conn()?, batch_id, limit, Utc::now()).await?;
            let counts = recompute_batch(tx.conn()?, batch_id).await?;
            tx.commit().await?;
            Ok((reset, counts))
        })
        .await?;

        info!(batch_id, limit, reset, "Error rows reset for retry");
        Ok(RetryReport {
            batch_id,
            limit,
            reset,
            counts,
        })
    }

    /// PENDING/ERROR → IGNORED with a mandatory reason and actor.
    pub async fn ignore_row(&self, row_id: i64, reason: &str, ignored_by: &str) -> Result<StagingRow, ReconcileError> {
        let reason = reason.trim();
        let ignored_by = ignored_by.trim();
        if reason.is_empty() {
            return Err(ReconcileError::InvalidInput("An ignore reason is required".to_string()));
        }
        if ignored_by.is_empty() {
            return Err(ReconcileError::InvalidInput("ignored_by is required".to_string()));
        }

        let row = get_row(&self.pool, row_id)
            .await?
            .ok_or(ReconcileError::NotFound(row_id))?;
        if !row.state.can_transition_to(RowState::Ignored) {
            return Err(ReconcileError::InvalidTransition {
                row_id,
                from: row.state,
                to: RowState::Ignored,
            });
        }
        let ttl_ms = self.settings.claim_ttl_ms();
        if row.is_claimed(now_ms(), ttl_ms) {
            return Err(ReconcileError::Busy(row_id));
        }

        let pool = &self.pool;
        let batch_id = row.batch_id;
        let ignored = retry_on_lock("ignore_row", self.settings.max_lock_wait_ms, move || async move {
            let mut tx = begin_monitored(pool, "ignore_row").await?;
            let ignored =
                staging::ignore_row(tx.conn()?, row_id, reason, ignored_by, Utc::now(), now_ms(), ttl_ms).await?;
            if ignored {
                recompute_batch(tx.conn()?, batch_id).await?;
            }
            tx.commit().await?;
            Ok(ignored)
        })
        .await?;

        if !ignored {
            // State or claim changed since the read
            return Err(ReconcileError::Busy(row_id));
        }
        info!(row_id, batch_id, ignored_by, "Row ignored");
        get_row(&self.pool, row_id)
            .await?
            .ok_or(ReconcileError::NotFound(row_id))
    }

    async fn current_counts(&self, batch_id: i64) -> Result<RowCounts, ReconcileError> {
        let batch = get_batch(&self.pool, batch_id)
            .await?
            .ok_or(ReconcileError::BatchNotFound(batch_id))?;
        Ok(batch.counts)
    }
}

/// Outcome for a row that needs no reconciliation, or `None` for PENDING.
fn settled_outcome(row: &StagingRow) -> Result<Option<RowOutcome>, ReconcileError> {
    match row.state {
        RowState::Pending => Ok(None),
        RowState::Processed => {
            let case_record_id = row.case_record_id.ok_or_else(|| {
                nutri_common::Error::Internal(format!("Processed row {} has no case record", row.id))
            })?;
            Ok(Some(RowOutcome::Processed {
                case_record_id,
                already_processed: true,
            }))
        }
        RowState::Ignored => Err(ReconcileError::AlreadyIgnored(row.id)),
        RowState::Error => Err(ReconcileError::NotPending {
            row_id: row.id,
            state: row.state,
        }),
    }
}
