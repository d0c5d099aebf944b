use std::future::Future;

use time::OffsetDateTime;

use super::{insert_running, make_metrics, make_running, TestResult};
use crate::{ExecutionStatus, ExecutionStore, StorageError};

pub(super) async fn run_save_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: ExecutionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "save",
        "insert_assigns_internal_id",
        insert_assigns_internal_id(factory).await,
    ));
    results.push(TestResult::from_result(
        "save",
        "inserts_get_distinct_ids",
        inserts_get_distinct_ids(factory).await,
    ));
    results.push(TestResult::from_result(
        "save",
        "update_keeps_internal_id",
        update_keeps_internal_id(factory).await,
    ));
    results.push(TestResult::from_result(
        "save",
        "duplicate_query_id_rejected",
        duplicate_query_id_rejected(factory).await,
    ));
    results.push(TestResult::from_result(
        "save",
        "update_of_unknown_id_rejected",
        update_of_unknown_id_rejected(factory).await,
    ));
    results.push(TestResult::from_result(
        "save",
        "query_id_change_rejected",
        query_id_change_rejected(factory).await,
    ));

    results
}

async fn insert_assigns_internal_id<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ExecutionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let saved = insert_running(&store, "adhoc_save_1", "alice").await?;
    if saved.id.is_none() {
        return Err("saved record has no internal id".to_string());
    }
    if saved.status != ExecutionStatus::Running {
        return Err(format!("expected RUNNING, got {}", saved.status));
    }
    Ok(())
}

async fn inserts_get_distinct_ids<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ExecutionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let a = insert_running(&store, "adhoc_save_a", "alice").await?;
    let b = insert_running(&store, "adhoc_save_b", "alice").await?;
    if a.id == b.id {
        return Err(format!("both records got id {:?}", a.id));
    }
    Ok(())
}

async fn update_keeps_internal_id<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ExecutionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let mut record = insert_running(&store, "adhoc_save_upd", "alice").await?;
    let id = record.id;
    record
        .mark_completed(
            make_metrics(2),
            OffsetDateTime::now_utc(),
            time::Duration::hours(24),
        )
        .map_err(|e| format!("complete: {e}"))?;
    let updated = store
        .save(record)
        .await
        .map_err(|e| format!("update: {e}"))?;
    if updated.id != id {
        return Err(format!("id changed from {:?} to {:?}", id, updated.id));
    }

    let found = store
        .find_by_query_id("adhoc_save_upd")
        .await
        .map_err(|e| format!("find: {e}"))?
        .ok_or("record vanished after update")?;
    if found.status != ExecutionStatus::Completed {
        return Err(format!("expected COMPLETED, got {}", found.status));
    }
    if found.rows_returned != Some(2) {
        return Err(format!("expected 2 rows, got {:?}", found.rows_returned));
    }
    Ok(())
}

async fn duplicate_query_id_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ExecutionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    insert_running(&store, "adhoc_dup", "alice").await?;
    match store.save(make_running("adhoc_dup", "bob")).await {
        Err(StorageError::DuplicateQueryId { query_id }) if query_id == "adhoc_dup" => Ok(()),
        Err(e) => Err(format!("expected DuplicateQueryId, got {e}")),
        Ok(_) => Err("duplicate query id was accepted".to_string()),
    }
}

async fn update_of_unknown_id_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ExecutionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let mut record = make_running("adhoc_ghost", "alice");
    record.id = Some(987_654);
    match store.save(record).await {
        Err(StorageError::ExecutionNotFound { .. }) => Ok(()),
        Err(e) => Err(format!("expected ExecutionNotFound, got {e}")),
        Ok(_) => Err("update of unknown id was accepted".to_string()),
    }
}

async fn query_id_change_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ExecutionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let mut record = insert_running(&store, "adhoc_orig", "alice").await?;
    record.query_id = "adhoc_renamed".to_string();
    match store.save(record).await {
        Err(StorageError::QueryIdChanged { .. }) => {}
        Err(e) => return Err(format!("expected QueryIdChanged, got {e}")),
        Ok(_) => return Err("query id change was accepted".to_string()),
    }
    let renamed = store
        .find_by_query_id("adhoc_renamed")
        .await
        .map_err(|e| format!("find: {e}"))?;
    if renamed.is_some() {
        return Err("renamed record became visible".to_string());
    }
    Ok(())
}
