use crate::record::ExecutionStatus;

/// All errors that can be returned by an ExecutionStore implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Update of a record whose internal key is not present in the store.
    #[error("execution not found: {query_id}")]
    ExecutionNotFound { query_id: String },

    /// Insert of a new record whose `query_id` is already taken.
    #[error("duplicate query id: {query_id}")]
    DuplicateQueryId { query_id: String },

    /// The stored record already reached a terminal state; it is immutable.
    #[error("execution {query_id} is already terminal ({status})")]
    TerminalRecord {
        query_id: String,
        status: ExecutionStatus,
    },

    /// A lifecycle transition the state machine does not allow.
    #[error("invalid transition for execution {query_id}: {from} -> {to}")]
    InvalidTransition {
        query_id: String,
        from: ExecutionStatus,
        to: ExecutionStatus,
    },

    /// An update tried to change the immutable `query_id` of a stored record.
    #[error("query id of stored record {stored} cannot change to {submitted}")]
    QueryIdChanged { stored: String, submitted: String },

    /// The retention window pushes `expires_at` past the representable range.
    #[error("expiry of execution {query_id} is out of range")]
    ExpiryOutOfRange { query_id: String },

    /// Dry-run results are never persisted.
    #[error("records in status {status} cannot be persisted")]
    Unpersistable { status: ExecutionStatus },

    /// A backend-specific storage error (DB connection, serialization, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}
