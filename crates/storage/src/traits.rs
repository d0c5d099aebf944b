use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::ExecutionRecord;

/// The storage trait for ad-hoc execution records.
///
/// An `ExecutionStore` is the durable home of every real execution. The
/// gateway writes a record twice: once in `RUNNING` before dispatch, and
/// once more when the run reaches a terminal status.
///
/// ## Write Semantics
///
/// `save` is insert-or-update keyed by the internal `id`:
///
/// - `id == None` inserts and assigns a fresh key. The `query_id` must not
///   already exist (`StorageError::DuplicateQueryId`).
/// - `id == Some(_)` replaces the stored record with that key. Unknown keys
///   fail with `StorageError::ExecutionNotFound`; a stored record that is
///   already terminal fails with `StorageError::TerminalRecord`; changing
///   the `query_id` fails with `StorageError::QueryIdChanged`.
///
/// `VALIDATED` records are never persisted (`StorageError::Unpersistable`).
///
/// ## Expiry
///
/// Lookups must not expose rows of a `COMPLETED` record once `now` is past
/// its `expires_at`. The record itself stays readable.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` so a single store can be
/// shared behind an `Arc` across tokio tasks.
#[async_trait]
pub trait ExecutionStore: Send + Sync + 'static {
    /// Insert or update a record, returning it as stored (with `id` set).
    async fn save(&self, record: ExecutionRecord) -> Result<ExecutionRecord, StorageError>;

    /// Look a record up by its external id.
    async fn find_by_query_id(
        &self,
        query_id: &str,
    ) -> Result<Option<ExecutionRecord>, StorageError>;

    /// A user's records, newest first.
    ///
    /// - `limit`: maximum number of results (0 = no limit)
    async fn list_by_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>, StorageError>;
}
