use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use time::OffsetDateTime;

use super::{insert_running, make_running, TestResult};
use crate::{ExecutionRecord, ExecutionStore, StorageError};

/// Number of concurrent tasks to spawn in each test.
const N: usize = 10;

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: ExecutionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_inserts_get_distinct_ids",
        concurrent_inserts_get_distinct_ids(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_duplicate_insert_exactly_one_wins",
        concurrent_duplicate_insert_exactly_one_wins(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_finalize_exactly_one_wins",
        concurrent_finalize_exactly_one_wins(factory).await,
    ));

    results
}

// ── Concurrent inserts of different records: all succeed ────────────────────

async fn concurrent_inserts_get_distinct_ids<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ExecutionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = Arc::new(factory().await);

    let mut handles = Vec::new();
    for i in 0..N {
        let s = store.clone();
        handles.push(tokio::spawn(async move {
            s.save(make_running(&format!("adhoc_par_{i}"), "alice"))
                .await
        }));
    }

    let mut ids = HashSet::new();
    for handle in handles {
        let saved = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e| format!("storage error: {e}"))?;
        let id = saved.id.ok_or("saved record has no id")?;
        if !ids.insert(id) {
            return Err(format!("id {id} assigned twice"));
        }
    }
    Ok(())
}

// ── Concurrent inserts of the same query id: exactly one wins ───────────────

async fn concurrent_duplicate_insert_exactly_one_wins<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: ExecutionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = Arc::new(factory().await);

    let mut handles = Vec::new();
    for _ in 0..N {
        let s = store.clone();
        handles.push(tokio::spawn(async move {
            match s.save(make_running("adhoc_same", "alice")).await {
                Ok(_) => Ok(true),
                Err(StorageError::DuplicateQueryId { .. }) => Ok(false),
                Err(e) => Err(e),
            }
        }));
    }

    count_single_winner(handles).await
}

// ── Concurrent finalization of one record: exactly one wins ─────────────────

/// N tasks each hold the same `RUNNING` copy and try to move it to FAILED.
/// The first write makes the record terminal; the rest get TerminalRecord.
async fn concurrent_finalize_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ExecutionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = Arc::new(factory().await);
    let running = insert_running(store.as_ref(), "adhoc_race", "alice").await?;

    let mut handles = Vec::new();
    for i in 0..N {
        handles.push(tokio::spawn(finalize_failed(
            store.clone(),
            running.clone(),
            i,
        )));
    }

    count_single_winner(handles).await
}

/// Move one copy of a `RUNNING` record to FAILED. `Ok(false)` when another
/// writer got there first.
async fn finalize_failed<S: ExecutionStore>(
    store: Arc<S>,
    mut record: ExecutionRecord,
    writer: usize,
) -> Result<bool, StorageError> {
    record.mark_failed(format!("writer {writer}"), OffsetDateTime::now_utc())?;
    match store.save(record).await {
        Ok(_) => Ok(true),
        Err(StorageError::TerminalRecord { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}

async fn count_single_winner(
    handles: Vec<tokio::task::JoinHandle<Result<bool, StorageError>>>,
) -> Result<(), String> {
    let mut winners = 0usize;
    let mut losers = 0usize;
    for handle in handles {
        let won = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e| format!("storage error: {e}"))?;
        if won {
            winners += 1;
        } else {
            losers += 1;
        }
    }

    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }
    if losers != N - 1 {
        return Err(format!("expected {} losers, got {losers}", N - 1));
    }
    Ok(())
}
