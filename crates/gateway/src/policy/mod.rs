//! Admission control: per-user quota checks before any engine work.
//!
//! The gateway calls [`PolicyGate::validate_execution`] and then
//! [`PolicyGate::increment_usage`] exactly once per real execution attempt,
//! before dispatch. Usage is charged on attempt, so slow or failing queries
//! still count. Dry runs never touch the gate.
//!
//! The gateway never reads and writes counters itself. Implementations own
//! the counters and must make the charge atomic per user: two concurrent
//! requests for the last free slot must not both be admitted.

mod quota;

pub use quota::{QuotaConfig, QuotaLimits, QuotaPolicyGate, UsageSnapshot};

use async_trait::async_trait;
use time::OffsetDateTime;

/// Errors returned by a policy gate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    /// The user has no quota left in some window.
    #[error("{limit_type} limit {limit} reached (usage {current_usage}), resets at {reset_at}")]
    RateLimitExceeded {
        limit_type: String,
        limit: u64,
        current_usage: u64,
        reset_at: OffsetDateTime,
    },

    /// The policy store could not be consulted.
    #[error("policy backend error: {0}")]
    Backend(String),
}

/// Per-user admission control consumed by the execution gateway.
#[async_trait]
pub trait PolicyGate: Send + Sync {
    /// Check whether `user_id` may run `sql` on `engine` right now.
    async fn validate_execution(
        &self,
        user_id: &str,
        sql: &str,
        engine: &str,
    ) -> Result<(), PolicyError>;

    /// Charge one execution attempt to `user_id`.
    ///
    /// Implementations re-check the limit under the same lock as the
    /// increment and fail with `RateLimitExceeded` when the slot was taken
    /// by a concurrent request since `validate_execution`.
    async fn increment_usage(&self, user_id: &str) -> Result<(), PolicyError>;
}
