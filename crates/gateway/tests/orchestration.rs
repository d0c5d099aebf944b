//! End-to-end orchestration tests with recording collaborators.
//!
//! Every mock appends to one shared call log so the tests can assert the
//! order in which the gateway talks to its collaborators:
//!
//! 1. Admission happens before any record or engine call
//! 2. Quota is charged once per admitted attempt, whatever the outcome
//! 3. Every failing real run leaves a terminal record with its query id
//! 4. Dry runs touch neither the gate nor the store

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::json;
use sqlgate_gateway::dispatch::{DispatchError, QueryDispatcher, QueryOutput, ValidationOutcome};
use sqlgate_gateway::policy::{PolicyError, PolicyGate, QuotaLimits, QuotaPolicyGate};
use sqlgate_gateway::{
    ExecutionError, ExecutionGateway, ExecutionRequest, GatewayConfig, RenderError,
};
use sqlgate_storage::{
    ExecutionRecord, ExecutionStatus, ExecutionStore, MemoryExecutionStore, Row, StorageError,
};
use time::macros::datetime;

// ──────────────────────────────────────────────
// Recording collaborators
// ──────────────────────────────────────────────

type CallLog = Arc<Mutex<Vec<String>>>;

fn log(calls: &CallLog, entry: impl Into<String>) {
    calls.lock().unwrap().push(entry.into());
}

#[derive(Clone)]
enum EngineBehavior {
    Rows(Vec<Row>),
    Invalid(String),
    Timeout,
    Fail(String),
    /// Ignores the deadline entirely.
    Hang,
}

struct RecordingDispatcher {
    calls: CallLog,
    behavior: EngineBehavior,
    executed_sql: Mutex<Vec<String>>,
}

#[async_trait]
impl QueryDispatcher for RecordingDispatcher {
    async fn validate(&self, sql: &str, _engine: &str) -> Result<ValidationOutcome, DispatchError> {
        log(&self.calls, "validate");
        self.executed_sql.lock().unwrap().push(sql.to_string());
        match &self.behavior {
            EngineBehavior::Invalid(message) => Ok(ValidationOutcome::invalid(message.clone(), 0.01)),
            EngineBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(ValidationOutcome::valid(0.01))
            }
            _ => Ok(ValidationOutcome::valid(0.01)),
        }
    }

    async fn execute(
        &self,
        sql: &str,
        engine: &str,
        timeout_seconds: u64,
        _max_rows: u64,
    ) -> Result<QueryOutput, DispatchError> {
        log(&self.calls, "execute");
        self.executed_sql.lock().unwrap().push(sql.to_string());
        match &self.behavior {
            EngineBehavior::Rows(rows) => Ok(QueryOutput {
                rows: rows.clone(),
                bytes_scanned: 4096,
                cost_usd: Decimal::new(25, 4),
                execution_seconds: 0.5,
            }),
            EngineBehavior::Invalid(message) | EngineBehavior::Fail(message) => {
                Err(DispatchError::Engine {
                    engine: engine.to_string(),
                    message: message.clone(),
                })
            }
            EngineBehavior::Timeout => Err(DispatchError::Timeout { timeout_seconds }),
            EngineBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(DispatchError::Timeout { timeout_seconds })
            }
        }
    }
}

struct RecordingGate {
    calls: CallLog,
    reject: Option<PolicyError>,
}

#[async_trait]
impl PolicyGate for RecordingGate {
    async fn validate_execution(
        &self,
        _user_id: &str,
        _sql: &str,
        _engine: &str,
    ) -> Result<(), PolicyError> {
        log(&self.calls, "validate_execution");
        match &self.reject {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn increment_usage(&self, _user_id: &str) -> Result<(), PolicyError> {
        log(&self.calls, "increment_usage");
        Ok(())
    }
}

struct RecordingStore {
    calls: CallLog,
    inner: MemoryExecutionStore,
    fail_terminal_saves: bool,
}

#[async_trait]
impl ExecutionStore for RecordingStore {
    async fn save(&self, record: ExecutionRecord) -> Result<ExecutionRecord, StorageError> {
        log(&self.calls, format!("save:{}", record.status));
        if self.fail_terminal_saves && record.status.is_terminal() {
            return Err(StorageError::Backend("disk full".to_string()));
        }
        self.inner.save(record).await
    }

    async fn find_by_query_id(
        &self,
        query_id: &str,
    ) -> Result<Option<ExecutionRecord>, StorageError> {
        self.inner.find_by_query_id(query_id).await
    }

    async fn list_by_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>, StorageError> {
        self.inner.list_by_user(user_id, limit).await
    }
}

struct Harness {
    calls: CallLog,
    dispatcher: Arc<RecordingDispatcher>,
    store: Arc<RecordingStore>,
    gateway: ExecutionGateway,
}

struct HarnessBuilder {
    behavior: EngineBehavior,
    reject: Option<PolicyError>,
    fail_terminal_saves: bool,
    config: GatewayConfig,
}

impl HarnessBuilder {
    fn new(behavior: EngineBehavior) -> Self {
        Self {
            behavior,
            reject: None,
            fail_terminal_saves: false,
            config: GatewayConfig::default(),
        }
    }

    fn rejecting(mut self, e: PolicyError) -> Self {
        self.reject = Some(e);
        self
    }

    fn failing_terminal_saves(mut self) -> Self {
        self.fail_terminal_saves = true;
        self
    }

    fn config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    fn build(self) -> Harness {
        let calls: CallLog = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Arc::new(RecordingDispatcher {
            calls: calls.clone(),
            behavior: self.behavior,
            executed_sql: Mutex::new(Vec::new()),
        });
        let store = Arc::new(RecordingStore {
            calls: calls.clone(),
            inner: MemoryExecutionStore::new(),
            fail_terminal_saves: self.fail_terminal_saves,
        });
        let gate = Arc::new(RecordingGate {
            calls: calls.clone(),
            reject: self.reject,
        });
        let gateway = ExecutionGateway::new(self.config, dispatcher.clone(), store.clone(), gate);
        Harness {
            calls,
            dispatcher,
            store,
            gateway,
        }
    }
}

impl Harness {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, entry: &str) -> usize {
        self.calls().iter().filter(|c| *c == entry).count()
    }

    fn engine_saw(&self) -> Vec<String> {
        self.dispatcher.executed_sql.lock().unwrap().clone()
    }
}

fn row(n: i64) -> Row {
    json!({ "n": n }).as_object().cloned().unwrap()
}

fn request(sql: &str) -> ExecutionRequest {
    ExecutionRequest::new("alice", sql, "warehouse")
}

// ──────────────────────────────────────────────
// Dry run
// ──────────────────────────────────────────────

#[tokio::test]
async fn dry_run_returns_validated_without_side_effects() {
    let h = HarnessBuilder::new(EngineBehavior::Rows(vec![row(1)])).build();

    let result = h
        .gateway
        .execute(request("SELECT * FROM t WHERE id = {id}").with_param("id", 42i64).dry_run())
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Validated);
    assert_eq!(result.rendered_sql, "SELECT * FROM t WHERE id = 42");
    assert!(result.rows.is_empty());
    assert_eq!(result.query_id, None);
    assert_eq!(h.calls(), vec!["validate"]);
    assert!(h.store.inner.is_empty());
}

#[tokio::test]
async fn dry_run_rejection_is_invalid_sql() {
    let h = HarnessBuilder::new(EngineBehavior::Invalid("syntax error at or near \"SELEC\"".into()))
        .build();

    let err = h
        .gateway
        .execute(request("SELEC 1").dry_run())
        .await
        .unwrap_err();

    match err {
        ExecutionError::InvalidSql { sql, engine_error } => {
            assert_eq!(sql, "SELEC 1");
            assert_eq!(engine_error, "syntax error at or near \"SELEC\"");
        }
        other => panic!("expected InvalidSql, got {other:?}"),
    }
    assert_eq!(h.count("validate_execution"), 0);
    assert!(h.store.inner.is_empty());
}

#[tokio::test]
async fn dry_run_validation_timeout_persists_nothing() {
    let config = GatewayConfig {
        validation_timeout_seconds: 1,
        ..GatewayConfig::default()
    };
    let h = HarnessBuilder::new(EngineBehavior::Hang)
        .config(config)
        .build();

    let started = Instant::now();
    let err = h
        .gateway
        .execute(request("SELECT 1").dry_run())
        .await
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(matches!(
        err,
        ExecutionError::Timeout {
            query_id: None,
            timeout_seconds: 1
        }
    ));
    assert_eq!(h.calls(), vec!["validate"]);
    assert_eq!(h.count("validate_execution"), 0);
    assert_eq!(h.count("increment_usage"), 0);
    assert!(!h.calls().iter().any(|c| c.starts_with("save:")));
    assert!(h.store.inner.is_empty());
}

// ──────────────────────────────────────────────
// Rendering
// ──────────────────────────────────────────────

#[tokio::test]
async fn engine_receives_quote_doubled_literal() {
    let h = HarnessBuilder::new(EngineBehavior::Rows(vec![row(1)])).build();

    h.gateway
        .execute(request("SELECT * FROM users WHERE name = {name}").with_param("name", "O'Brien"))
        .await
        .unwrap();

    assert_eq!(
        h.engine_saw(),
        vec!["SELECT * FROM users WHERE name = 'O''Brien'"]
    );
}

#[tokio::test]
async fn render_error_never_reaches_collaborators() {
    let h = HarnessBuilder::new(EngineBehavior::Rows(vec![])).build();

    let err = h
        .gateway
        .execute(request("SELECT {x}").with_param("x", f64::NAN))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ExecutionError::Render(RenderError::NonFiniteFloat { .. })
    ));
    assert!(h.calls().is_empty());
}

// ──────────────────────────────────────────────
// Admission
// ──────────────────────────────────────────────

#[tokio::test]
async fn rate_limit_short_circuits_before_any_record() {
    let reset_at = datetime!(2026-03-01 11:00 UTC);
    let h = HarnessBuilder::new(EngineBehavior::Rows(vec![row(1)]))
        .rejecting(PolicyError::RateLimitExceeded {
            limit_type: "hourly_queries".to_string(),
            limit: 100,
            current_usage: 100,
            reset_at,
        })
        .build();

    let err = h.gateway.execute(request("SELECT 1")).await.unwrap_err();

    match err {
        ExecutionError::RateLimitExceeded {
            limit_type,
            limit,
            current_usage,
            reset_at: at,
        } => {
            assert_eq!(limit_type, "hourly_queries");
            assert_eq!(limit, 100);
            assert_eq!(current_usage, 100);
            assert_eq!(at, reset_at);
        }
        other => panic!("expected RateLimitExceeded, got {other:?}"),
    }
    assert_eq!(h.calls(), vec!["validate_execution"]);
    assert!(h.store.inner.is_empty());
}

#[tokio::test]
async fn policy_backend_failure_surfaces_as_policy_error() {
    let h = HarnessBuilder::new(EngineBehavior::Rows(vec![]))
        .rejecting(PolicyError::Backend("quota store unreachable".to_string()))
        .build();

    let err = h.gateway.execute(request("SELECT 1")).await.unwrap_err();
    assert!(matches!(err, ExecutionError::Policy(ref m) if m == "quota store unreachable"));
    assert_eq!(h.count("execute"), 0);
}

#[tokio::test]
async fn quota_charged_once_per_attempt_regardless_of_outcome() {
    for behavior in [
        EngineBehavior::Rows(vec![row(1)]),
        EngineBehavior::Timeout,
        EngineBehavior::Fail("permission denied".into()),
    ] {
        let h = HarnessBuilder::new(behavior).build();
        let _ = h.gateway.execute(request("SELECT 1")).await;
        assert_eq!(h.count("increment_usage"), 1);
        assert_eq!(
            h.calls()[..4],
            ["validate_execution", "increment_usage", "save:RUNNING", "execute"]
        );
    }
}

// ──────────────────────────────────────────────
// Terminal states
// ──────────────────────────────────────────────

#[tokio::test]
async fn completed_run_persists_metrics() {
    let h = HarnessBuilder::new(EngineBehavior::Rows(vec![row(1), row(2)])).build();

    let result = h
        .gateway
        .execute(request("SELECT n FROM t").with_download_format("parquet"))
        .await
        .unwrap();

    assert_eq!(
        h.calls(),
        vec![
            "validate_execution",
            "increment_usage",
            "save:RUNNING",
            "execute",
            "save:COMPLETED"
        ]
    );
    let query_id = result.query_id.clone().unwrap();
    assert!(query_id.starts_with("adhoc_"));
    assert_eq!(result.rows_returned, 2);

    let record = h.gateway.get_execution_or_throw(&query_id).await.unwrap();
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(record.original_sql, "SELECT n FROM t");
    assert_eq!(record.rows_returned, Some(2));
    assert_eq!(record.bytes_scanned, Some(4096));
    assert_eq!(record.cost_usd, Some(Decimal::new(25, 4)));
    assert_eq!(record.duration_seconds, Some(0.5));
    assert_eq!(record.download_format.as_deref(), Some("parquet"));
    assert_eq!(record.expires_at, result.expires_at);
}

#[tokio::test]
async fn timeout_persists_timeout_record_first() {
    let config = GatewayConfig {
        max_query_duration_seconds: 30,
        ..GatewayConfig::default()
    };
    let h = HarnessBuilder::new(EngineBehavior::Timeout)
        .config(config)
        .build();

    let err = h
        .gateway
        .execute(request("SELECT pg_sleep(60)"))
        .await
        .unwrap_err();

    let query_id = match err {
        ExecutionError::Timeout {
            query_id: Some(query_id),
            timeout_seconds: 30,
        } => query_id,
        other => panic!("expected Timeout, got {other:?}"),
    };
    assert_eq!(h.calls().last().map(String::as_str), Some("save:TIMEOUT"));

    let record = h.gateway.get_execution_or_throw(&query_id).await.unwrap();
    assert_eq!(record.status, ExecutionStatus::Timeout);
    assert!(record.completed_at.is_some());
    assert!(record.error_message.unwrap().contains("30"));
    assert_eq!(record.expires_at, None);
}

#[tokio::test]
async fn hard_deadline_bounds_a_hanging_dispatcher() {
    let config = GatewayConfig {
        max_query_duration_seconds: 1,
        ..GatewayConfig::default()
    };
    let h = HarnessBuilder::new(EngineBehavior::Hang)
        .config(config)
        .build();

    let started = Instant::now();
    let err = h.gateway.execute(request("SELECT 1")).await.unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(matches!(
        err,
        ExecutionError::Timeout {
            query_id: Some(_),
            timeout_seconds: 1
        }
    ));
    assert_eq!(h.calls().last().map(String::as_str), Some("save:TIMEOUT"));
}

#[tokio::test]
async fn engine_failure_is_sanitized_and_persisted() {
    let message = format!("relation \"users\"\ndoes not exist{}", "!".repeat(2000));
    let h = HarnessBuilder::new(EngineBehavior::Fail(message)).build();

    let err = h.gateway.execute(request("SELECT * FROM users")).await.unwrap_err();

    let (query_id, reason) = match err {
        ExecutionError::ExecutionFailed { query_id, reason } => (query_id, reason),
        other => panic!("expected ExecutionFailed, got {other:?}"),
    };
    assert!(reason.starts_with("relation \"users\" does not exist"));
    assert_eq!(reason.chars().count(), 1000);
    assert!(reason.ends_with('…'));

    let record = h.gateway.get_execution_or_throw(&query_id).await.unwrap();
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert_eq!(record.error_message, Some(reason));
    assert_eq!(record.rendered_sql, "SELECT * FROM users");
}

#[tokio::test]
async fn oversized_result_discards_rows() {
    let config = GatewayConfig {
        max_result_rows: 3,
        ..GatewayConfig::default()
    };
    let rows: Vec<Row> = (0..10).map(row).collect();
    let h = HarnessBuilder::new(EngineBehavior::Rows(rows))
        .config(config)
        .build();

    let err = h.gateway.execute(request("SELECT n FROM big")).await.unwrap_err();

    let query_id = match err {
        ExecutionError::ResultTooLarge {
            query_id,
            rows: 10,
            max_rows: 3,
            ..
        } => query_id,
        other => panic!("expected ResultTooLarge, got {other:?}"),
    };
    let record = h.gateway.get_execution_or_throw(&query_id).await.unwrap();
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert_eq!(record.rows, None);
    assert_eq!(record.bytes_scanned, Some(4096));
    assert!(record.error_message.is_some());
}

#[tokio::test]
async fn oversized_by_bytes_discards_rows() {
    let config = GatewayConfig {
        max_result_size_mb: 1,
        ..GatewayConfig::default()
    };
    let blob = "x".repeat(64 * 1024);
    let rows: Vec<Row> = (0..20)
        .map(|_| json!({ "blob": blob }).as_object().cloned().unwrap())
        .collect();
    let h = HarnessBuilder::new(EngineBehavior::Rows(rows))
        .config(config)
        .build();

    let err = h.gateway.execute(request("SELECT blob FROM t")).await.unwrap_err();
    match err {
        ExecutionError::ResultTooLarge {
            size_bytes,
            max_bytes,
            ..
        } => {
            assert_eq!(max_bytes, 1024 * 1024);
            assert!(size_bytes > max_bytes);
        }
        other => panic!("expected ResultTooLarge, got {other:?}"),
    }
}

#[tokio::test]
async fn terminal_persist_failure_does_not_mask_timeout() {
    let h = HarnessBuilder::new(EngineBehavior::Timeout)
        .failing_terminal_saves()
        .build();

    let err = h.gateway.execute(request("SELECT 1")).await.unwrap_err();

    assert!(matches!(err, ExecutionError::Timeout { query_id: Some(_), .. }));
    assert_eq!(h.calls().last().map(String::as_str), Some("save:TIMEOUT"));
}

#[tokio::test]
async fn completion_persist_failure_is_a_storage_error() {
    let h = HarnessBuilder::new(EngineBehavior::Rows(vec![row(1)]))
        .failing_terminal_saves()
        .build();

    let err = h.gateway.execute(request("SELECT 1")).await.unwrap_err();
    assert!(matches!(err, ExecutionError::Storage(StorageError::Backend(_))));
}

#[tokio::test]
async fn unrepresentable_retention_fails_the_record() {
    let config = GatewayConfig {
        result_retention_hours: 1_000_000_000,
        ..GatewayConfig::default()
    };
    let h = HarnessBuilder::new(EngineBehavior::Rows(vec![row(1)]))
        .config(config)
        .build();

    let err = h.gateway.execute(request("SELECT 1")).await.unwrap_err();

    assert!(matches!(
        err,
        ExecutionError::Storage(StorageError::ExpiryOutOfRange { .. })
    ));
    assert_eq!(h.calls().last().map(String::as_str), Some("save:FAILED"));
    let records = h.store.inner.list_by_user("alice", 10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, ExecutionStatus::Failed);
    assert_eq!(records[0].rows, None);
    assert_eq!(records[0].expires_at, None);
    assert!(records[0].error_message.as_deref().unwrap().contains("out of range"));
}

#[tokio::test]
async fn huge_query_duration_does_not_overflow_deadline() {
    let config = GatewayConfig {
        max_query_duration_seconds: u64::MAX,
        ..GatewayConfig::default()
    };
    let h = HarnessBuilder::new(EngineBehavior::Rows(vec![row(1)]))
        .config(config)
        .build();

    let result = h.gateway.execute(request("SELECT 1")).await.unwrap();

    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(h.calls().last().map(String::as_str), Some("save:COMPLETED"));
}

// ──────────────────────────────────────────────
// Lookup
// ──────────────────────────────────────────────

#[tokio::test]
async fn unknown_query_id_is_not_found() {
    let h = HarnessBuilder::new(EngineBehavior::Rows(vec![])).build();

    assert!(h.gateway.get_execution("adhoc_missing").await.unwrap().is_none());
    let err = h
        .gateway
        .get_execution_or_throw("adhoc_missing")
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutionError::NotFound { ref query_id } if query_id == "adhoc_missing"));
}

#[tokio::test]
async fn results_unreadable_after_expiry() {
    let h = HarnessBuilder::new(EngineBehavior::Rows(vec![row(1)])).build();
    let result = h.gateway.execute(request("SELECT n FROM t")).await.unwrap();
    let query_id = result.query_id.unwrap();
    let expires_at = result.expires_at.unwrap();

    let rows = h
        .gateway
        .get_results_at(&query_id, "alice", expires_at)
        .await
        .unwrap();
    assert_eq!(rows, vec![row(1)]);

    let err = h
        .gateway
        .get_results_at(&query_id, "alice", expires_at + time::Duration::SECOND)
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutionError::ResultsExpired { expired_at, .. } if expired_at == expires_at));
}

// ──────────────────────────────────────────────
// Concurrency
// ──────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_respect_per_user_quota() {
    let mut registry = sqlgate_gateway::dispatch::EngineRegistry::empty();
    registry.register(Box::new(
        sqlgate_gateway::dispatch::static_engine::StaticEngine::new("warehouse").with_query(
            sqlgate_gateway::dispatch::static_engine::StaticQuery::new("SELECT 1")
                .with_rows(vec![row(1)]),
        ),
    ));
    let store = Arc::new(MemoryExecutionStore::new());
    let gate = Arc::new(QuotaPolicyGate::new(QuotaLimits {
        queries_per_hour: Some(3),
        queries_per_day: None,
    }));
    let gateway = Arc::new(ExecutionGateway::new(
        GatewayConfig::default(),
        Arc::new(registry),
        store.clone(),
        gate.clone(),
    ));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let gw = gateway.clone();
        handles.push(tokio::spawn(async move { gw.execute(request("SELECT 1")).await }));
    }

    let mut completed = 0;
    let mut limited = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => completed += 1,
            Err(ExecutionError::RateLimitExceeded { limit, .. }) => {
                assert_eq!(limit, 3);
                limited += 1;
            }
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(completed, 3);
    assert_eq!(limited, 7);
    assert_eq!(store.len(), 3);
    assert_eq!(gate.usage("alice").await.hourly_queries, 3);
}
