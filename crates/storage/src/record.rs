use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::StorageError;

/// One materialized result row: column name to JSON value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Lifecycle status of an ad-hoc execution.
///
/// ```text
/// (start) --dry_run--> VALIDATED (terminal, never persisted)
/// (start) --real_run--> RUNNING --> COMPLETED | TIMEOUT | FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Validated,
    Running,
    Completed,
    Timeout,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Validated => "VALIDATED",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Completed => "COMPLETED",
            ExecutionStatus::Timeout => "TIMEOUT",
            ExecutionStatus::Failed => "FAILED",
        }
    }

    /// Whether no further mutation is allowed once a record reaches this status.
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine-reported metrics attached to a record on successful completion.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionMetrics {
    pub rows: Vec<Row>,
    pub bytes_scanned: u64,
    pub cost_usd: Decimal,
    pub duration_seconds: f64,
}

/// The durable record of one real (non-dry-run) ad-hoc execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Internal storage key. `None` until the store assigns one on first save.
    pub id: Option<i64>,
    pub query_id: String,
    pub user_id: String,
    pub original_sql: String,
    pub rendered_sql: String,
    pub engine: String,
    pub status: ExecutionStatus,
    /// Only populated on `COMPLETED`.
    pub rows: Option<Vec<Row>>,
    pub rows_returned: Option<u64>,
    pub bytes_scanned: Option<u64>,
    pub cost_usd: Option<Decimal>,
    pub duration_seconds: Option<f64>,
    pub download_format: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    /// Set only for `COMPLETED` records.
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    pub error_message: Option<String>,
}

impl ExecutionRecord {
    /// A fresh `RUNNING` record, not yet saved.
    pub fn running(
        query_id: impl Into<String>,
        user_id: impl Into<String>,
        original_sql: impl Into<String>,
        rendered_sql: impl Into<String>,
        engine: impl Into<String>,
        created_at: OffsetDateTime,
    ) -> Self {
        Self {
            id: None,
            query_id: query_id.into(),
            user_id: user_id.into(),
            original_sql: original_sql.into(),
            rendered_sql: rendered_sql.into(),
            engine: engine.into(),
            status: ExecutionStatus::Running,
            rows: None,
            rows_returned: None,
            bytes_scanned: None,
            cost_usd: None,
            duration_seconds: None,
            download_format: None,
            created_at,
            completed_at: None,
            expires_at: None,
            error_message: None,
        }
    }

    pub fn with_download_format(mut self, format: Option<String>) -> Self {
        self.download_format = format;
        self
    }

    /// `RUNNING -> COMPLETED`. Sets every metric and `expires_at = completed_at + retention`.
    /// The record is left untouched when that expiry is not representable.
    pub fn mark_completed(
        &mut self,
        metrics: CompletionMetrics,
        completed_at: OffsetDateTime,
        retention: time::Duration,
    ) -> Result<(), StorageError> {
        self.check_transition(ExecutionStatus::Completed)?;
        let expires_at =
            completed_at
                .checked_add(retention)
                .ok_or_else(|| StorageError::ExpiryOutOfRange {
                    query_id: self.query_id.clone(),
                })?;
        self.status = ExecutionStatus::Completed;
        self.rows_returned = Some(metrics.rows.len() as u64);
        self.rows = Some(metrics.rows);
        self.bytes_scanned = Some(metrics.bytes_scanned);
        self.cost_usd = Some(metrics.cost_usd);
        self.duration_seconds = Some(metrics.duration_seconds);
        self.completed_at = Some(completed_at);
        self.expires_at = Some(expires_at);
        Ok(())
    }

    /// `RUNNING -> TIMEOUT`.
    pub fn mark_timed_out(
        &mut self,
        message: impl Into<String>,
        at: OffsetDateTime,
    ) -> Result<(), StorageError> {
        self.finish_with_error(ExecutionStatus::Timeout, message.into(), at)
    }

    /// `RUNNING -> FAILED`. No rows are kept.
    pub fn mark_failed(
        &mut self,
        message: impl Into<String>,
        at: OffsetDateTime,
    ) -> Result<(), StorageError> {
        self.finish_with_error(ExecutionStatus::Failed, message.into(), at)
    }

    /// True once `now` is past `expires_at`. Records without an expiry never expire.
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|at| now > at)
    }

    fn finish_with_error(
        &mut self,
        status: ExecutionStatus,
        message: String,
        at: OffsetDateTime,
    ) -> Result<(), StorageError> {
        self.check_transition(status)?;
        self.status = status;
        self.rows = None;
        self.error_message = Some(message);
        self.completed_at = Some(at);
        Ok(())
    }

    fn check_transition(&self, to: ExecutionStatus) -> Result<(), StorageError> {
        if self.status != ExecutionStatus::Running {
            return Err(StorageError::InvalidTransition {
                query_id: self.query_id.clone(),
                from: self.status,
                to,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn running() -> ExecutionRecord {
        ExecutionRecord::running(
            "adhoc_01",
            "alice",
            "SELECT {x}",
            "SELECT 1",
            "warehouse",
            datetime!(2026-01-01 00:00 UTC),
        )
    }

    fn one_row() -> Row {
        let mut row = Row::new();
        row.insert("x".to_string(), serde_json::json!(1));
        row
    }

    #[test]
    fn completion_sets_metrics_and_expiry() {
        let mut record = running();
        record
            .mark_completed(
                CompletionMetrics {
                    rows: vec![one_row()],
                    bytes_scanned: 2048,
                    cost_usd: Decimal::new(125, 4),
                    duration_seconds: 1.5,
                },
                datetime!(2026-01-01 00:00:02 UTC),
                time::Duration::hours(24),
            )
            .unwrap();

        assert_eq!(record.status, ExecutionStatus::Completed);
        assert_eq!(record.rows_returned, Some(1));
        assert_eq!(record.bytes_scanned, Some(2048));
        assert_eq!(record.cost_usd, Some(Decimal::new(125, 4)));
        assert_eq!(record.expires_at, Some(datetime!(2026-01-02 00:00:02 UTC)));
        assert!(record.error_message.is_none());
    }

    #[test]
    fn terminal_record_rejects_second_transition() {
        let mut record = running();
        record
            .mark_timed_out("exceeded 300s", datetime!(2026-01-01 00:05 UTC))
            .unwrap();

        let err = record
            .mark_failed("late failure", datetime!(2026-01-01 00:06 UTC))
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::InvalidTransition {
                from: ExecutionStatus::Timeout,
                to: ExecutionStatus::Failed,
                ..
            }
        ));
        assert_eq!(record.error_message.as_deref(), Some("exceeded 300s"));
    }

    #[test]
    fn failed_record_has_no_expiry() {
        let mut record = running();
        record
            .mark_failed("boom", datetime!(2026-01-01 00:01 UTC))
            .unwrap();
        assert!(record.expires_at.is_none());
        assert!(!record.is_expired(datetime!(2099-01-01 00:00 UTC)));
    }

    #[test]
    fn expiry_is_strictly_after_expires_at() {
        let mut record = running();
        record
            .mark_completed(
                CompletionMetrics {
                    rows: vec![],
                    bytes_scanned: 0,
                    cost_usd: Decimal::ZERO,
                    duration_seconds: 0.1,
                },
                datetime!(2026-01-01 00:00 UTC),
                time::Duration::hours(1),
            )
            .unwrap();
        assert!(!record.is_expired(datetime!(2026-01-01 01:00 UTC)));
        assert!(record.is_expired(datetime!(2026-01-01 01:00:01 UTC)));
    }

    #[test]
    fn unrepresentable_expiry_leaves_record_running() {
        let mut record = running();
        let err = record
            .mark_completed(
                CompletionMetrics {
                    rows: vec![one_row()],
                    bytes_scanned: 8,
                    cost_usd: Decimal::ZERO,
                    duration_seconds: 0.1,
                },
                datetime!(2026-01-01 00:00 UTC),
                time::Duration::hours(1_000_000_000),
            )
            .unwrap_err();
        assert!(matches!(err, StorageError::ExpiryOutOfRange { .. }));
        assert_eq!(record.status, ExecutionStatus::Running);
        assert!(record.completed_at.is_none());
        assert!(record.rows.is_none());
        record
            .mark_failed("expiry out of range", datetime!(2026-01-01 00:00 UTC))
            .unwrap();
    }

    #[test]
    fn status_serializes_upper_case() {
        let json = serde_json::to_string(&ExecutionStatus::Timeout).unwrap();
        assert_eq!(json, "\"TIMEOUT\"");
        assert!(ExecutionStatus::Validated.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
    }

    #[test]
    fn record_json_uses_rfc3339_timestamps() {
        let json = serde_json::to_value(running()).unwrap();
        assert_eq!(json["created_at"], "2026-01-01T00:00:00Z");
        assert_eq!(json["status"], "RUNNING");
        let back: ExecutionRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, running());
    }
}
