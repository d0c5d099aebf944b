use std::future::Future;

use time::OffsetDateTime;

use super::{insert_running, make_running, TestResult};
use crate::ExecutionStore;

pub(super) async fn run_lookup_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: ExecutionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "lookup",
        "unknown_query_id_is_none",
        unknown_query_id_is_none(factory).await,
    ));
    results.push(TestResult::from_result(
        "lookup",
        "find_returns_all_fields",
        find_returns_all_fields(factory).await,
    ));
    results.push(TestResult::from_result(
        "lookup",
        "list_by_user_newest_first",
        list_by_user_newest_first(factory).await,
    ));
    results.push(TestResult::from_result(
        "lookup",
        "list_by_user_respects_limit",
        list_by_user_respects_limit(factory).await,
    ));
    results.push(TestResult::from_result(
        "lookup",
        "list_by_user_excludes_other_users",
        list_by_user_excludes_other_users(factory).await,
    ));

    results
}

async fn unknown_query_id_is_none<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ExecutionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let found = store
        .find_by_query_id("adhoc_nope")
        .await
        .map_err(|e| format!("find: {e}"))?;
    match found {
        None => Ok(()),
        Some(r) => Err(format!("unexpected record {}", r.query_id)),
    }
}

async fn find_returns_all_fields<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ExecutionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let record =
        make_running("adhoc_fields", "alice").with_download_format(Some("csv".to_string()));
    let saved = store
        .save(record)
        .await
        .map_err(|e| format!("insert: {e}"))?;
    let found = store
        .find_by_query_id("adhoc_fields")
        .await
        .map_err(|e| format!("find: {e}"))?
        .ok_or("inserted record not found")?;
    if found != saved {
        return Err(format!("stored {saved:?} but found {found:?}"));
    }
    if found.download_format.as_deref() != Some("csv") {
        return Err("download_format not preserved".to_string());
    }
    Ok(())
}

async fn list_by_user_newest_first<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ExecutionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let base = OffsetDateTime::now_utc();
    for (i, query_id) in ["adhoc_l1", "adhoc_l2", "adhoc_l3"].iter().enumerate() {
        let mut record = make_running(query_id, "alice");
        record.created_at = base + time::Duration::seconds(i as i64);
        store
            .save(record)
            .await
            .map_err(|e| format!("insert {query_id}: {e}"))?;
    }

    let listed = store
        .list_by_user("alice", 0)
        .await
        .map_err(|e| format!("list: {e}"))?;
    let ids: Vec<&str> = listed.iter().map(|r| r.query_id.as_str()).collect();
    if ids != ["adhoc_l3", "adhoc_l2", "adhoc_l1"] {
        return Err(format!("unexpected order {ids:?}"));
    }
    Ok(())
}

async fn list_by_user_respects_limit<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ExecutionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    for i in 0..5 {
        insert_running(&store, &format!("adhoc_lim_{i}"), "alice").await?;
    }
    let listed = store
        .list_by_user("alice", 2)
        .await
        .map_err(|e| format!("list: {e}"))?;
    if listed.len() != 2 {
        return Err(format!("expected 2 records, got {}", listed.len()));
    }
    Ok(())
}

async fn list_by_user_excludes_other_users<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ExecutionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    insert_running(&store, "adhoc_alice", "alice").await?;
    insert_running(&store, "adhoc_bob", "bob").await?;
    let listed = store
        .list_by_user("bob", 0)
        .await
        .map_err(|e| format!("list: {e}"))?;
    if listed.len() != 1 || listed[0].query_id != "adhoc_bob" {
        return Err(format!("unexpected listing for bob: {listed:?}"));
    }
    Ok(())
}
