use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use super::{AuditFilter, AuditStore, PersistOutcome};
use crate::error::AuditError;
use crate::record::AuditRecord;

/// Process-local store, keyed by event id.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<Uuid, AuditRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock_error(e: impl std::fmt::Display) -> AuditError {
    AuditError::Storage(format!("Failed to acquire lock: {}", e))
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn persist(&self, record: AuditRecord) -> Result<PersistOutcome, AuditError> {
        let mut records = self.records.write().map_err(lock_error)?;
        let event_id = record.event_id;

        if records.contains_key(&event_id) {
            return Ok(PersistOutcome::Duplicate(event_id));
        }
        records.insert(event_id, record);
        Ok(PersistOutcome::Stored(event_id))
    }

    async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
        let records = self.records.read().map_err(lock_error)?;
        Ok(filter.apply(records.values()))
    }

    async fn count(&self, filter: &AuditFilter) -> Result<u64, AuditError> {
        let records = self.records.read().map_err(lock_error)?;
        Ok(records.values().filter(|r| filter.matches(r)).count() as u64)
    }

    async fn get(&self, event_id: Uuid) -> Result<Option<AuditRecord>, AuditError> {
        let records = self.records.read().map_err(lock_error)?;
        Ok(records.get(&event_id).cloned())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, AuditError> {
        let mut records = self.records.write().map_err(lock_error)?;
        let before = records.len();
        records.retain(|_, r| r.created_at >= cutoff);
        Ok((before - records.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support;

    #[tokio::test]
    async fn test_memory_store_contract() {
        test_support::exercise(&MemoryStore::new()).await;
    }
}
