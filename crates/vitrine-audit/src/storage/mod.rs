//! Durable audit store backends.
//!
//! Every backend treats the event id as a unique key: persisting a record
//! whose event id is already stored is a successful no-op reported as
//! [`PersistOutcome::Duplicate`]. This keeps redelivered envelopes from
//! producing duplicate log entries.

mod file;
mod memory;
mod sqlite;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use vitrine_core::{StoreBackend, StoreConfig};

use crate::action::{AuditAction, EventCategory};
use crate::error::AuditError;
use crate::record::AuditRecord;

/// Result of a persist call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// A new record was written under this event id.
    Stored(Uuid),
    /// A record with this event id already existed; nothing was written.
    Duplicate(Uuid),
}

impl PersistOutcome {
    pub fn event_id(&self) -> Uuid {
        match self {
            Self::Stored(id) | Self::Duplicate(id) => *id,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }
}

/// Trait for durable audit stores.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append a record unless its event id is already present.
    async fn persist(&self, record: AuditRecord) -> Result<PersistOutcome, AuditError>;

    /// Records matching `filter`, newest first, paginated.
    async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError>;

    /// Number of records matching `filter`, ignoring limit and offset.
    async fn count(&self, filter: &AuditFilter) -> Result<u64, AuditError>;

    async fn get(&self, event_id: Uuid) -> Result<Option<AuditRecord>, AuditError>;

    /// Delete records created before `cutoff`. Returns how many were removed.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, AuditError>;
}

/// Filter for querying audit records.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditFilter {
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub action: Option<AuditAction>,
    pub category: Option<EventCategory>,
    pub actor_id: Option<String>,
    pub success: Option<bool>,
    /// Inclusive lower bound on `created_at`.
    pub start_time: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`.
    pub end_time: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl AuditFilter {
    pub fn matches(&self, record: &AuditRecord) -> bool {
        if let Some(ref entity_type) = self.entity_type {
            if &record.entity_type != entity_type {
                return false;
            }
        }
        if let Some(ref entity_id) = self.entity_id {
            if record.entity_id.as_ref() != Some(entity_id) {
                return false;
            }
        }
        if let Some(action) = self.action {
            if record.action != action {
                return false;
            }
        }
        if let Some(category) = self.category {
            if record.category != category {
                return false;
            }
        }
        if let Some(ref actor_id) = self.actor_id {
            if record.actor_id.as_ref() != Some(actor_id) {
                return false;
            }
        }
        if let Some(success) = self.success {
            if record.success != success {
                return false;
            }
        }
        if let Some(start) = self.start_time {
            if record.created_at < start {
                return false;
            }
        }
        if let Some(end) = self.end_time {
            if record.created_at > end {
                return false;
            }
        }
        true
    }

    /// Filter, order newest first and paginate an in-memory record set.
    pub(crate) fn apply<'a>(&self, records: impl Iterator<Item = &'a AuditRecord>) -> Vec<AuditRecord> {
        let mut matched: Vec<&AuditRecord> = records.filter(|r| self.matches(r)).collect();
        matched.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.event_id.cmp(&a.event_id))
        });

        matched
            .into_iter()
            .skip(self.offset.unwrap_or(0))
            .take(self.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }
}

/// Create a store backend based on configuration.
pub async fn create_store(config: &StoreConfig) -> Result<Arc<dyn AuditStore>, AuditError> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreBackend::File => {
            let path = config.path.as_deref().unwrap_or("audit.jsonl");
            Ok(Arc::new(FileStore::open(path)?))
        }
        StoreBackend::Sqlite => {
            let path = config.path.as_deref().unwrap_or("audit.db");
            Ok(Arc::new(SqliteStore::connect(path).await?))
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_deserializes_from_query_style_fields() {
        let filter: AuditFilter = serde_json::from_value(serde_json::json!({
            "action": "SET_CURRENT",
            "category": "entity_mutation",
            "limit": 10
        }))
        .unwrap();
        assert_eq!(filter.action, Some(AuditAction::SetCurrent));
        assert_eq!(filter.category, Some(EventCategory::EntityMutation));
        assert_eq!(filter.limit, Some(10));
    }

    #[tokio::test]
    async fn test_create_store_defaults_to_memory() {
        let store = create_store(&StoreConfig::default()).await.unwrap();
        assert_eq!(store.count(&AuditFilter::default()).await.unwrap(), 0);
    }
}
