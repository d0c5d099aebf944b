//! In-process `ExecutionStore` backed by hash maps.
//!
//! Suitable for tests, the CLI, and single-node deployments that accept
//! losing history on restart.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::error::StorageError;
use crate::record::{ExecutionRecord, ExecutionStatus};
use crate::traits::ExecutionStore;

#[derive(Default)]
struct Inner {
    next_id: i64,
    records: HashMap<i64, ExecutionRecord>,
    by_query_id: HashMap<String, i64>,
}

/// Reference in-memory implementation of [`ExecutionStore`].
#[derive(Default)]
pub struct MemoryExecutionStore {
    inner: RwLock<Inner>,
}

impl MemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lookup as of `now`: rows of an expired record are withheld.
    pub fn find_at(&self, query_id: &str, now: OffsetDateTime) -> Option<ExecutionRecord> {
        let inner = self.read();
        let id = inner.by_query_id.get(query_id)?;
        inner.records.get(id).map(|r| redact_expired(r.clone(), now))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        // Recover data even if the lock was poisoned by a panic in another thread
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn redact_expired(mut record: ExecutionRecord, now: OffsetDateTime) -> ExecutionRecord {
    if record.is_expired(now) {
        record.rows = None;
    }
    record
}

#[async_trait]
impl ExecutionStore for MemoryExecutionStore {
    async fn save(&self, mut record: ExecutionRecord) -> Result<ExecutionRecord, StorageError> {
        if record.status == ExecutionStatus::Validated {
            return Err(StorageError::Unpersistable {
                status: record.status,
            });
        }

        let mut inner = self.write();
        match record.id {
            None => {
                if inner.by_query_id.contains_key(&record.query_id) {
                    return Err(StorageError::DuplicateQueryId {
                        query_id: record.query_id,
                    });
                }
                inner.next_id += 1;
                let id = inner.next_id;
                record.id = Some(id);
                inner.by_query_id.insert(record.query_id.clone(), id);
                inner.records.insert(id, record.clone());
            }
            Some(id) => {
                let stored = inner
                    .records
                    .get(&id)
                    .ok_or_else(|| StorageError::ExecutionNotFound {
                        query_id: record.query_id.clone(),
                    })?;
                if stored.status.is_terminal() {
                    return Err(StorageError::TerminalRecord {
                        query_id: stored.query_id.clone(),
                        status: stored.status,
                    });
                }
                if stored.query_id != record.query_id {
                    return Err(StorageError::QueryIdChanged {
                        stored: stored.query_id.clone(),
                        submitted: record.query_id,
                    });
                }
                inner.records.insert(id, record.clone());
            }
        }
        Ok(record)
    }

    async fn find_by_query_id(
        &self,
        query_id: &str,
    ) -> Result<Option<ExecutionRecord>, StorageError> {
        Ok(self.find_at(query_id, OffsetDateTime::now_utc()))
    }

    async fn list_by_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>, StorageError> {
        let now = OffsetDateTime::now_utc();
        let inner = self.read();
        let mut records: Vec<ExecutionRecord> = inner
            .records
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        if limit > 0 {
            records.truncate(limit);
        }
        Ok(records
            .into_iter()
            .map(|r| redact_expired(r, now))
            .collect())
    }
}
