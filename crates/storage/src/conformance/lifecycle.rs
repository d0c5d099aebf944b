use std::future::Future;

use time::OffsetDateTime;

use super::{insert_running, make_metrics, make_running, TestResult};
use crate::{ExecutionStatus, ExecutionStore, StorageError};

pub(super) async fn run_lifecycle_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: ExecutionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "lifecycle",
        "terminal_record_is_immutable",
        terminal_record_is_immutable(factory).await,
    ));
    results.push(TestResult::from_result(
        "lifecycle",
        "validated_record_never_persisted",
        validated_record_never_persisted(factory).await,
    ));
    results.push(TestResult::from_result(
        "lifecycle",
        "failure_keeps_rendered_sql_and_message",
        failure_keeps_rendered_sql_and_message(factory).await,
    ));
    results.push(TestResult::from_result(
        "lifecycle",
        "completed_rows_visible_before_expiry",
        completed_rows_visible_before_expiry(factory).await,
    ));
    results.push(TestResult::from_result(
        "lifecycle",
        "expired_rows_withheld",
        expired_rows_withheld(factory).await,
    ));

    results
}

async fn terminal_record_is_immutable<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ExecutionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let running = insert_running(&store, "adhoc_term", "alice").await?;

    let mut timed_out = running.clone();
    timed_out
        .mark_timed_out("deadline exceeded", OffsetDateTime::now_utc())
        .map_err(|e| format!("timeout transition: {e}"))?;
    store
        .save(timed_out)
        .await
        .map_err(|e| format!("save timeout: {e}"))?;

    // A stale copy still in RUNNING tries to finalize a second time.
    let mut late = running;
    late.mark_failed("late", OffsetDateTime::now_utc())
        .map_err(|e| format!("fail transition: {e}"))?;
    match store.save(late).await {
        Err(StorageError::TerminalRecord { status, .. }) if status == ExecutionStatus::Timeout => {}
        Err(e) => return Err(format!("expected TerminalRecord(TIMEOUT), got {e}")),
        Ok(_) => return Err("second terminal write was accepted".to_string()),
    }

    let found = store
        .find_by_query_id("adhoc_term")
        .await
        .map_err(|e| format!("find: {e}"))?
        .ok_or("record missing")?;
    if found.status != ExecutionStatus::Timeout {
        return Err(format!("status changed to {}", found.status));
    }
    Ok(())
}

async fn validated_record_never_persisted<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ExecutionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let mut record = make_running("adhoc_dry", "alice");
    record.status = ExecutionStatus::Validated;
    match store.save(record).await {
        Err(StorageError::Unpersistable { .. }) => {}
        Err(e) => return Err(format!("expected Unpersistable, got {e}")),
        Ok(_) => return Err("VALIDATED record was persisted".to_string()),
    }
    let found = store
        .find_by_query_id("adhoc_dry")
        .await
        .map_err(|e| format!("find: {e}"))?;
    if found.is_some() {
        return Err("VALIDATED record is visible".to_string());
    }
    Ok(())
}

async fn failure_keeps_rendered_sql_and_message<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ExecutionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let mut record = insert_running(&store, "adhoc_fail", "alice").await?;
    let rendered = record.rendered_sql.clone();
    record
        .mark_failed("relation does not exist", OffsetDateTime::now_utc())
        .map_err(|e| format!("fail transition: {e}"))?;
    store
        .save(record)
        .await
        .map_err(|e| format!("save: {e}"))?;

    let found = store
        .find_by_query_id("adhoc_fail")
        .await
        .map_err(|e| format!("find: {e}"))?
        .ok_or("record missing")?;
    if found.rendered_sql != rendered {
        return Err("rendered_sql lost on failure".to_string());
    }
    if found.error_message.as_deref() != Some("relation does not exist") {
        return Err(format!("unexpected error_message {:?}", found.error_message));
    }
    if found.rows.is_some() || found.expires_at.is_some() {
        return Err("failed record carries rows or expiry".to_string());
    }
    Ok(())
}

async fn completed_rows_visible_before_expiry<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ExecutionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let mut record = insert_running(&store, "adhoc_fresh", "alice").await?;
    record
        .mark_completed(
            make_metrics(3),
            OffsetDateTime::now_utc(),
            time::Duration::hours(1),
        )
        .map_err(|e| format!("complete: {e}"))?;
    store
        .save(record)
        .await
        .map_err(|e| format!("save: {e}"))?;

    let found = store
        .find_by_query_id("adhoc_fresh")
        .await
        .map_err(|e| format!("find: {e}"))?
        .ok_or("record missing")?;
    match found.rows {
        Some(rows) if rows.len() == 3 => Ok(()),
        other => Err(format!("expected 3 rows, got {other:?}")),
    }
}

async fn expired_rows_withheld<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ExecutionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let mut record = insert_running(&store, "adhoc_stale", "alice").await?;
    record
        .mark_completed(
            make_metrics(3),
            OffsetDateTime::now_utc() - time::Duration::hours(2),
            time::Duration::hours(1),
        )
        .map_err(|e| format!("complete: {e}"))?;
    store
        .save(record)
        .await
        .map_err(|e| format!("save: {e}"))?;

    let found = store
        .find_by_query_id("adhoc_stale")
        .await
        .map_err(|e| format!("find: {e}"))?
        .ok_or("expired record must stay readable")?;
    if found.rows.is_some() {
        return Err("rows of an expired record were returned".to_string());
    }
    if found.status != ExecutionStatus::Completed {
        return Err(format!("expected COMPLETED, got {}", found.status));
    }
    Ok(())
}
