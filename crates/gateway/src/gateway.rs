//! The execution orchestrator.
//!
//! [`ExecutionGateway`] composes the renderer, the policy gate, the record
//! store and the dispatcher into the two request flows:
//!
//! - **dry run**: render, validate on the engine, return `VALIDATED`.
//!   Nothing is persisted and no quota is consumed.
//! - **real run**: render, admit, charge, persist `RUNNING`, dispatch under a
//!   deadline, then persist exactly one terminal state (`COMPLETED`,
//!   `TIMEOUT` or `FAILED`) before returning.
//!
//! The gateway holds no mutable state of its own; share it behind an `Arc`.

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;
use sqlgate_storage::{CompletionMetrics, ExecutionRecord, ExecutionStatus, ExecutionStore, Row};
use time::OffsetDateTime;
use tracing::{error, info, warn};

use crate::config::GatewayConfig;
use crate::dispatch::{DispatchError, QueryDispatcher, QueryOutput};
use crate::error::ExecutionError;
use crate::id::{self, IdGenerator, UlidGenerator};
use crate::policy::{PolicyError, PolicyGate};
use crate::render::{render, ParamValue};

/// Extra time granted past the engine deadline before the gateway stops
/// waiting on a dispatcher that does not honor its timeout.
const DEADLINE_GRACE: Duration = Duration::from_secs(2);

// ──────────────────────────────────────────────
// Requests and results
// ──────────────────────────────────────────────

/// One ad-hoc execution request.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRequest {
    pub user_id: String,
    /// SQL template with `{name}` placeholders.
    pub sql: String,
    pub parameters: BTreeMap<String, ParamValue>,
    pub engine: String,
    pub dry_run: bool,
    /// Stored on the record verbatim.
    pub download_format: Option<String>,
}

impl ExecutionRequest {
    pub fn new(
        user_id: impl Into<String>,
        sql: impl Into<String>,
        engine: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            sql: sql.into(),
            parameters: BTreeMap::new(),
            engine: engine.into(),
            dry_run: false,
            download_format: None,
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_parameters(mut self, parameters: BTreeMap<String, ParamValue>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn with_download_format(mut self, format: impl Into<String>) -> Self {
        self.download_format = Some(format.into());
        self
    }
}

/// What a successful request returns to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    /// `None` for dry runs.
    pub query_id: Option<String>,
    pub status: ExecutionStatus,
    pub rendered_sql: String,
    pub rows: Vec<Row>,
    pub rows_returned: u64,
    pub bytes_scanned: u64,
    pub cost_usd: Decimal,
    pub duration_seconds: f64,
    /// Set for dry runs only.
    pub validation_seconds: Option<f64>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    pub download_format: Option<String>,
}

impl ExecutionResult {
    fn validated(rendered_sql: String, validation_seconds: f64, download_format: Option<String>) -> Self {
        Self {
            query_id: None,
            status: ExecutionStatus::Validated,
            rendered_sql,
            rows: Vec::new(),
            rows_returned: 0,
            bytes_scanned: 0,
            cost_usd: Decimal::ZERO,
            duration_seconds: validation_seconds,
            validation_seconds: Some(validation_seconds),
            expires_at: None,
            download_format,
        }
    }

    fn completed(mut record: ExecutionRecord) -> Self {
        let rows = record.rows.take().unwrap_or_default();
        Self {
            query_id: Some(record.query_id),
            status: record.status,
            rendered_sql: record.rendered_sql,
            rows_returned: record.rows_returned.unwrap_or(rows.len() as u64),
            rows,
            bytes_scanned: record.bytes_scanned.unwrap_or(0),
            cost_usd: record.cost_usd.unwrap_or(Decimal::ZERO),
            duration_seconds: record.duration_seconds.unwrap_or(0.0),
            validation_seconds: None,
            expires_at: record.expires_at,
            download_format: record.download_format,
        }
    }
}

// ──────────────────────────────────────────────
// ExecutionGateway
// ──────────────────────────────────────────────

/// Orchestrates ad-hoc SQL executions over pluggable collaborators.
pub struct ExecutionGateway {
    config: GatewayConfig,
    dispatcher: Arc<dyn QueryDispatcher>,
    store: Arc<dyn ExecutionStore>,
    policy: Arc<dyn PolicyGate>,
    ids: Arc<dyn IdGenerator>,
}

impl ExecutionGateway {
    /// A gateway issuing ULID-based query ids.
    pub fn new(
        config: GatewayConfig,
        dispatcher: Arc<dyn QueryDispatcher>,
        store: Arc<dyn ExecutionStore>,
        policy: Arc<dyn PolicyGate>,
    ) -> Self {
        Self {
            config,
            dispatcher,
            store,
            policy,
            ids: Arc::new(UlidGenerator::new()),
        }
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Run one request: a dry-run validation or a real execution.
    ///
    /// Errors that carry a `query_id` refer to a record that already holds
    /// the terminal state matching the error.
    pub async fn execute(
        &self,
        request: ExecutionRequest,
    ) -> Result<ExecutionResult, ExecutionError> {
        let rendered = render(&request.sql, &request.parameters)?;
        if request.dry_run {
            self.validate_only(request, rendered).await
        } else {
            self.run(request, rendered).await
        }
    }

    async fn validate_only(
        &self,
        request: ExecutionRequest,
        rendered: String,
    ) -> Result<ExecutionResult, ExecutionError> {
        let budget = self.config.validation_timeout_seconds;
        let validation = tokio::time::timeout(
            Duration::from_secs(budget),
            self.dispatcher.validate(&rendered, &request.engine),
        )
        .await
        .unwrap_or(Err(DispatchError::Timeout {
            timeout_seconds: budget,
        }));

        let outcome = match validation {
            Ok(outcome) => outcome,
            Err(DispatchError::Timeout { timeout_seconds }) => {
                warn!(user_id = %request.user_id, engine = %request.engine, timeout_seconds, "validation timed out");
                return Err(ExecutionError::Timeout {
                    query_id: None,
                    timeout_seconds,
                });
            }
            Err(e) => {
                return Err(ExecutionError::InvalidSql {
                    engine_error: self.sanitize(&dispatch_reason(&e)),
                    sql: rendered,
                });
            }
        };

        if !outcome.valid {
            let message = outcome
                .error_message
                .as_deref()
                .unwrap_or("rejected by engine");
            return Err(ExecutionError::InvalidSql {
                engine_error: self.sanitize(message),
                sql: rendered,
            });
        }

        Ok(ExecutionResult::validated(
            rendered,
            outcome.validation_seconds,
            request.download_format,
        ))
    }

    async fn run(
        &self,
        request: ExecutionRequest,
        rendered: String,
    ) -> Result<ExecutionResult, ExecutionError> {
        let ExecutionRequest {
            user_id,
            sql,
            engine,
            download_format,
            ..
        } = request;

        self.admit(&user_id, &rendered, &engine).await?;

        let query_id = id::query_id(self.ids.as_ref());
        let record = ExecutionRecord::running(
            &query_id,
            &user_id,
            sql,
            &rendered,
            &engine,
            OffsetDateTime::now_utc(),
        )
        .with_download_format(download_format);
        let record = self.store.save(record).await?;
        info!(query_id = %query_id, user_id = %user_id, engine = %engine, "dispatching query");

        let timeout_seconds = self.config.max_query_duration_seconds;
        let max_rows = self.config.max_result_rows;
        let dispatched = tokio::time::timeout(
            Duration::from_secs(timeout_seconds).saturating_add(DEADLINE_GRACE),
            self.dispatcher
                .execute(&rendered, &engine, timeout_seconds, max_rows),
        )
        .await
        .unwrap_or(Err(DispatchError::Timeout { timeout_seconds }));

        match dispatched {
            Ok(output) => self.finish(record, output).await,
            Err(DispatchError::Timeout { .. }) => Err(self.time_out(record, timeout_seconds).await),
            Err(e) => Err(self.fail(record, &e).await),
        }
    }

    /// Check the quota, then charge the attempt. Both happen before any
    /// record exists, so a denial leaves no trace.
    async fn admit(&self, user_id: &str, sql: &str, engine: &str) -> Result<(), ExecutionError> {
        let admitted = match self.policy.validate_execution(user_id, sql, engine).await {
            Ok(()) => self.policy.increment_usage(user_id).await,
            Err(e) => Err(e),
        };
        match admitted {
            Ok(()) => Ok(()),
            Err(PolicyError::RateLimitExceeded {
                limit_type,
                limit,
                current_usage,
                reset_at,
            }) => {
                warn!(user_id, limit_type = %limit_type, limit, current_usage, "rate limit exceeded");
                Err(ExecutionError::RateLimitExceeded {
                    limit_type,
                    limit,
                    current_usage,
                    reset_at,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn finish(
        &self,
        mut record: ExecutionRecord,
        output: QueryOutput,
    ) -> Result<ExecutionResult, ExecutionError> {
        let rows = output.rows.len() as u64;
        let size_bytes = serialized_size(&output.rows);
        let max_rows = self.config.max_result_rows;
        let max_bytes = self.config.max_result_bytes();

        if rows > max_rows || size_bytes > max_bytes {
            warn!(query_id = %record.query_id, rows, size_bytes, max_rows, max_bytes, "result too large, discarding rows");
            let err = ExecutionError::ResultTooLarge {
                query_id: record.query_id.clone(),
                rows,
                size_bytes,
                max_rows,
                max_bytes,
            };
            record.bytes_scanned = Some(output.bytes_scanned);
            record.cost_usd = Some(output.cost_usd);
            record.duration_seconds = Some(output.execution_seconds);
            let message = self.sanitize(&err.to_string());
            if let Err(e) = record.mark_failed(message, OffsetDateTime::now_utc()) {
                error!(query_id = %record.query_id, error = %e, "cannot mark execution failed");
            } else {
                self.persist_terminal(record).await;
            }
            return Err(err);
        }

        let metrics = CompletionMetrics {
            rows: output.rows,
            bytes_scanned: output.bytes_scanned,
            cost_usd: output.cost_usd,
            duration_seconds: output.execution_seconds,
        };
        let completed_at = OffsetDateTime::now_utc();
        if let Err(e) = record.mark_completed(metrics, completed_at, self.config.retention()) {
            error!(query_id = %record.query_id, error = %e, "cannot complete execution");
            match record.mark_failed(self.sanitize(&e.to_string()), completed_at) {
                Ok(()) => self.persist_terminal(record).await,
                Err(e) => error!(query_id = %record.query_id, error = %e, "cannot mark execution failed"),
            }
            return Err(e.into());
        }
        let saved = self.store.save(record).await?;
        info!(
            query_id = %saved.query_id,
            user_id = %saved.user_id,
            engine = %saved.engine,
            rows,
            bytes_scanned = output.bytes_scanned,
            duration_seconds = output.execution_seconds,
            "query completed"
        );
        Ok(ExecutionResult::completed(saved))
    }

    async fn time_out(&self, mut record: ExecutionRecord, timeout_seconds: u64) -> ExecutionError {
        warn!(query_id = %record.query_id, timeout_seconds, "query timed out");
        let query_id = record.query_id.clone();
        let message = format!("query exceeded maximum duration of {timeout_seconds}s");
        match record.mark_timed_out(message, OffsetDateTime::now_utc()) {
            Ok(()) => self.persist_terminal(record).await,
            Err(e) => error!(query_id = %query_id, error = %e, "cannot mark execution timed out"),
        }
        ExecutionError::Timeout {
            query_id: Some(query_id),
            timeout_seconds,
        }
    }

    async fn fail(&self, mut record: ExecutionRecord, cause: &DispatchError) -> ExecutionError {
        let query_id = record.query_id.clone();
        let reason = self.sanitize(&dispatch_reason(cause));
        warn!(query_id = %query_id, reason = %reason, "query failed");
        match record.mark_failed(reason.clone(), OffsetDateTime::now_utc()) {
            Ok(()) => self.persist_terminal(record).await,
            Err(e) => error!(query_id = %query_id, error = %e, "cannot mark execution failed"),
        }
        ExecutionError::ExecutionFailed { query_id, reason }
    }

    /// Save a terminal record on an error path. A failure here is logged and
    /// the caller still returns the original error.
    async fn persist_terminal(&self, record: ExecutionRecord) {
        let query_id = record.query_id.clone();
        let status = record.status;
        if let Err(e) = self.store.save(record).await {
            error!(query_id = %query_id, status = %status, error = %e, "failed to persist terminal execution record");
        }
    }

    fn sanitize(&self, message: &str) -> String {
        sanitize_error_message(message, self.config.max_error_message_len)
    }

    // ── Lookup ────────────────────────────────

    pub async fn get_execution(
        &self,
        query_id: &str,
    ) -> Result<Option<ExecutionRecord>, ExecutionError> {
        Ok(self.store.find_by_query_id(query_id).await?)
    }

    pub async fn get_execution_or_throw(
        &self,
        query_id: &str,
    ) -> Result<ExecutionRecord, ExecutionError> {
        self.get_execution(query_id)
            .await?
            .ok_or_else(|| ExecutionError::NotFound {
                query_id: query_id.to_string(),
            })
    }

    /// Rows of a completed execution owned by `user_id`.
    pub async fn get_results(
        &self,
        query_id: &str,
        user_id: &str,
    ) -> Result<Vec<Row>, ExecutionError> {
        self.get_results_at(query_id, user_id, OffsetDateTime::now_utc())
            .await
    }

    /// [`get_results`](Self::get_results) as of `now`.
    pub async fn get_results_at(
        &self,
        query_id: &str,
        user_id: &str,
        now: OffsetDateTime,
    ) -> Result<Vec<Row>, ExecutionError> {
        let record = self.get_execution_or_throw(query_id).await?;
        if record.user_id != user_id {
            return Err(ExecutionError::Forbidden {
                query_id: query_id.to_string(),
                user_id: user_id.to_string(),
            });
        }
        if record.status != ExecutionStatus::Completed {
            return Err(ExecutionError::ResultsUnavailable {
                query_id: query_id.to_string(),
                status: record.status,
            });
        }
        match (record.rows, record.expires_at) {
            (Some(rows), Some(expires_at)) if now <= expires_at => Ok(rows),
            (_, Some(expired_at)) => Err(ExecutionError::ResultsExpired {
                query_id: query_id.to_string(),
                expired_at,
            }),
            (rows, None) => Ok(rows.unwrap_or_default()),
        }
    }

    /// A user's executions, newest first. `limit == 0` returns all of them.
    pub async fn list_executions(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>, ExecutionError> {
        Ok(self.store.list_by_user(user_id, limit).await?)
    }
}

// ──────────────────────────────────────────────
// Helpers
// ──────────────────────────────────────────────

fn dispatch_reason(e: &DispatchError) -> String {
    match e {
        DispatchError::Engine { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

/// Replace control characters with spaces and cap the length at `max_len`
/// characters, the last of which is `…` when truncated.
pub fn sanitize_error_message(message: &str, max_len: usize) -> String {
    let cleaned: String = message
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.chars().count() <= max_len {
        return cleaned.to_string();
    }
    let mut truncated: String = cleaned.chars().take(max_len.saturating_sub(1)).collect();
    truncated.push('…');
    truncated
}

/// Counts bytes written through it.
struct ByteCounter(u64);

impl io::Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// JSON byte length of `rows`. Unserializable rows count as infinitely large.
fn serialized_size(rows: &[Row]) -> u64 {
    let mut counter = ByteCounter(0);
    match serde_json::to_writer(&mut counter, rows) {
        Ok(()) => counter.0,
        Err(_) => u64::MAX,
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
