//! Concurrent reconciliation tests
//!
//! Overlapping passes over the same rows must never create two case records
//! for one nomination or leave the batch counters out of step.

mod helpers;

use helpers::{
    build_reconciler, create_test_db, nomination_sheet, nomination_workbook, stage_workbook, Nomination,
    ScriptedEngine,
};
use nutri_intake::db::batches::{count_rows, get_batch};
use nutri_intake::db::staging::{get_row, list_rows};
use nutri_intake::db::Page;
use nutri_intake::models::{ErrorCode, RowState};
use nutri_intake::services::{ReconcileError, RowOutcome};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

const ENGINE_DELAY: Duration = Duration::from_millis(200);

async fn stage(pool: &SqlitePool, year: i32, nominations: &[Nomination]) -> i64 {
    let bytes = nomination_workbook(&[nomination_sheet("SEVEROS", 0, nominations)]);
    stage_workbook(pool, year, bytes).await.batch_id
}

async fn row_ids(pool: &SqlitePool, batch_id: i64) -> Vec<i64> {
    let (rows, _) = list_rows(pool, batch_id, None, Page::new(1, 500)).await.unwrap();
    rows.iter().map(|r| r.id).collect()
}

async fn case_record_count(pool: &SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM case_records")
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_passes_on_one_row_create_one_case_record() {
    let (_dir, pool) = create_test_db().await;
    let batch_id = stage(&pool, 2025, &[Nomination::new("3012456780101", "José Pérez")]).await;
    let row_id = row_ids(&pool, batch_id).await[0];

    let engine = Arc::new(ScriptedEngine::approving().with_delay(ENGINE_DELAY));
    let reconciler = Arc::new(build_reconciler(&pool, engine.clone()));

    let (a, b) = tokio::join!(reconciler.reconcile_row(row_id), reconciler.reconcile_row(row_id));

    let outcomes = [a, b];
    let winners = outcomes
        .iter()
        .filter(|o| matches!(o, Ok(RowOutcome::Processed { already_processed: false, .. })))
        .count();
    assert_eq!(winners, 1, "outcomes: {outcomes:?}");
    // The loser either saw the live claim or the finished row
    assert!(outcomes.iter().all(|o| matches!(
        o,
        Ok(RowOutcome::Processed { .. }) | Err(ReconcileError::Busy(_))
    )));

    assert_eq!(engine.calls(), 1);
    assert_eq!(case_record_count(&pool).await, 1);
    let row = get_row(&pool, row_id).await.unwrap().unwrap();
    assert_eq!(row.state, RowState::Processed);
    assert!(row.claim_token.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sweeps_with_the_same_cui_process_it_once() {
    let (_dir, pool) = create_test_db().await;
    let first = stage(&pool, 2025, &[Nomination::new("3012456780101", "José Pérez")]).await;
    let second = stage(&pool, 2025, &[Nomination::new("3012456780101", "José Pérez C.")]).await;

    let engine = Arc::new(ScriptedEngine::approving().with_delay(ENGINE_DELAY));
    let reconciler = Arc::new(build_reconciler(&pool, engine.clone()));

    let (a, b) = tokio::join!(
        reconciler.sweep_pending(first, None),
        reconciler.sweep_pending(second, None)
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    // Both passed the pre-check; the terminal transaction lets one through
    assert_eq!(engine.calls(), 2);
    assert_eq!(a.processed + b.processed, 1);
    assert_eq!(a.errors + b.errors, 1);
    assert_eq!(case_record_count(&pool).await, 1);

    let loser_batch = if a.processed == 1 { second } else { first };
    let loser = get_row(&pool, row_ids(&pool, loser_batch).await[0]).await.unwrap().unwrap();
    assert_eq!(loser.state, RowState::Error);
    assert_eq!(loser.error_code.as_deref(), Some(ErrorCode::DupCuiYear.as_str()));
    assert!(loser.case_record_id.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_sweeps_share_out_the_rows() {
    let (_dir, pool) = create_test_db().await;
    let nominations: Vec<Nomination> = (1..=6)
        .map(|i| Nomination::new(&format!("301245678030{i}"), "Niña"))
        .collect();
    let batch_id = stage(&pool, 2025, &nominations).await;

    let engine = Arc::new(ScriptedEngine::approving().with_delay(Duration::from_millis(50)));
    let reconciler = Arc::new(build_reconciler(&pool, engine.clone()));

    let (a, b) = tokio::join!(
        reconciler.sweep_pending(batch_id, None),
        reconciler.sweep_pending(batch_id, None)
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.processed + b.processed, 6);
    assert_eq!(a.errors + b.errors, 0);
    assert_eq!(engine.calls(), 6);
    assert_eq!(case_record_count(&pool).await, 6);

    let batch = get_batch(&pool, batch_id).await.unwrap().unwrap();
    let mut conn = pool.acquire().await.unwrap();
    assert_eq!(batch.counts, count_rows(&mut conn, batch_id).await.unwrap());
    assert_eq!(batch.counts.processed, 6);
}

#[tokio::test]
async fn live_claim_blocks_and_stale_claim_is_taken_over() {
    let (_dir, pool) = create_test_db().await;
    let batch_id = stage(&pool, 2025, &[Nomination::new("3012456780101", "José Pérez")]).await;
    let row_id = row_ids(&pool, batch_id).await[0];
    let reconciler = build_reconciler(&pool, Arc::new(ScriptedEngine::approving()));

    let now_ms = chrono::Utc::now().timestamp_millis();
    sqlx::query("UPDATE staging_rows SET claim_token = 'other-pass', claimed_at_ms = ? WHERE id = ?")
        .bind(now_ms)
        .bind(row_id)
        .execute(&pool)
        .await
        .unwrap();

    let err = reconciler.reconcile_row(row_id).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Busy(id) if id == row_id));
    let err = reconciler.ignore_row(row_id, "duplicado", "analista").await.unwrap_err();
    assert!(matches!(err, ReconcileError::Busy(_)));

    // A pass that died an hour ago no longer holds the row
    sqlx::query("UPDATE staging_rows SET claimed_at_ms = ? WHERE id = ?")
        .bind(now_ms - 3_600_000)
        .bind(row_id)
        .execute(&pool)
        .await
        .unwrap();

    let outcome = reconciler.reconcile_row(row_id).await.unwrap();
    assert!(matches!(outcome, RowOutcome::Processed { already_processed: false, .. }));
}
