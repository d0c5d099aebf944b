//! Conformance test suite for `ExecutionStore` implementations.
//!
//! This module provides a backend-agnostic test suite that any
//! `ExecutionStore` implementation can run to verify correctness. The suite
//! covers:
//!
//! - **Save**: insert assigns keys, updates keep them, duplicates rejected
//! - **Lookup**: by query id, unknown ids, per-user listing order and limits
//! - **Lifecycle**: terminal records are immutable, dry runs never persist
//! - **Concurrency**: racing inserts and racing finalizations
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory function that
//! creates a fresh, empty store for each test:
//!
//! ```ignore
//! use sqlgate_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn postgres_conformance() {
//!     let report = run_conformance_suite(|| async {
//!         create_test_postgres_store().await
//!     }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod concurrent;
mod lifecycle;
mod lookup;
mod save;

use std::fmt;
use std::future::Future;

use rust_decimal::Decimal;
use time::OffsetDateTime;

use crate::record::{CompletionMetrics, ExecutionRecord, Row};
use crate::ExecutionStore;

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "save", "lookup", "lifecycle").
    pub category: String,
    /// Test name (e.g. "insert_assigns_internal_id").
    pub name: String,
    /// Whether the test passed.
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn pass(category: &str, name: &str) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: true,
            message: None,
        }
    }

    fn fail(category: &str, name: &str, msg: String) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: false,
            message: Some(msg),
        }
    }

    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self::pass(category, name),
            Err(msg) => Self::fail(category, name, msg),
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a store backend.
///
/// The `factory` function is called once per test to create a fresh, empty
/// store, ensuring test isolation.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: ExecutionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(save::run_save_tests(&factory).await);
    results.extend(lookup::run_lookup_tests(&factory).await);
    results.extend(lifecycle::run_lifecycle_tests(&factory).await);
    results.extend(concurrent::run_concurrent_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers: record constructors with sensible defaults ──────────────────────

fn make_running(query_id: &str, user_id: &str) -> ExecutionRecord {
    ExecutionRecord::running(
        query_id,
        user_id,
        "SELECT * FROM events WHERE day = {day}",
        "SELECT * FROM events WHERE day = '2025-01-01'",
        "test-engine",
        OffsetDateTime::now_utc(),
    )
}

fn make_metrics(rows: usize) -> CompletionMetrics {
    let rows = (0..rows)
        .map(|i| {
            let mut row = Row::new();
            row.insert("n".to_string(), serde_json::json!(i));
            row
        })
        .collect();
    CompletionMetrics {
        rows,
        bytes_scanned: 1024,
        cost_usd: Decimal::new(5, 3),
        duration_seconds: 0.25,
    }
}

/// Save a fresh `RUNNING` record, mapping the error for suite reporting.
async fn insert_running<S: ExecutionStore>(
    store: &S,
    query_id: &str,
    user_id: &str,
) -> Result<ExecutionRecord, String> {
    store
        .save(make_running(query_id, user_id))
        .await
        .map_err(|e| format!("insert {query_id}: {e}"))
}
