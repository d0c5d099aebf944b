use sqlgate_storage::{ExecutionStatus, StorageError};
use time::OffsetDateTime;

use crate::policy::PolicyError;
use crate::render::RenderError;

/// Every way an ad-hoc execution request can fail.
///
/// Variants that carry a `query_id` correspond to a persisted record that
/// already reflects the failure when the error is observed.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// A parameter could not be rendered; the engine was never called.
    #[error("render error: {0}")]
    Render(#[from] RenderError),

    /// Dry-run validation rejected the rendered SQL. Nothing is persisted.
    #[error("invalid SQL: {engine_error}")]
    InvalidSql { sql: String, engine_error: String },

    /// Admission denied before any engine work. Nothing persisted, nothing charged.
    #[error(
        "rate limit exceeded: {limit_type} usage {current_usage}/{limit}, resets at {reset_at}"
    )]
    RateLimitExceeded {
        limit_type: String,
        limit: u64,
        current_usage: u64,
        reset_at: OffsetDateTime,
    },

    /// The engine exceeded the deadline. `query_id` is `None` for dry runs.
    #[error("query timed out after {timeout_seconds}s")]
    Timeout {
        query_id: Option<String>,
        timeout_seconds: u64,
    },

    /// The engine succeeded but the result exceeds the configured ceilings.
    #[error(
        "result of {query_id} too large: {rows} rows / {size_bytes} bytes (limits {max_rows} rows / {max_bytes} bytes)"
    )]
    ResultTooLarge {
        query_id: String,
        rows: u64,
        size_bytes: u64,
        max_rows: u64,
        max_bytes: u64,
    },

    /// Any other dispatch failure, correlated with its persisted record.
    #[error("execution {query_id} failed: {reason}")]
    ExecutionFailed { query_id: String, reason: String },

    #[error("execution not found: {query_id}")]
    NotFound { query_id: String },

    /// The record exists but belongs to another user.
    #[error("execution {query_id} is not owned by {user_id}")]
    Forbidden { query_id: String, user_id: String },

    #[error("results of {query_id} expired at {expired_at}")]
    ResultsExpired {
        query_id: String,
        expired_at: OffsetDateTime,
    },

    /// Results are only readable from `COMPLETED` records.
    #[error("results of {query_id} are unavailable (status {status})")]
    ResultsUnavailable {
        query_id: String,
        status: ExecutionStatus,
    },

    /// The policy backend itself failed.
    #[error("policy gate error: {0}")]
    Policy(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<PolicyError> for ExecutionError {
    fn from(e: PolicyError) -> Self {
        match e {
            PolicyError::RateLimitExceeded {
                limit_type,
                limit,
                current_usage,
                reset_at,
            } => ExecutionError::RateLimitExceeded {
                limit_type,
                limit,
                current_usage,
                reset_at,
            },
            PolicyError::Backend(msg) => ExecutionError::Policy(msg),
        }
    }
}
