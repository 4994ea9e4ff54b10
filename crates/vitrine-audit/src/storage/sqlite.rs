//! SQLite store.
//!
//! Timestamps are stored as microseconds since the epoch so range filters and
//! ordering compare integers. State snapshots and the changed-field list are
//! JSON text.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

use super::{AuditFilter, AuditStore, PersistOutcome};
use crate::action::{AuditAction, EventCategory};
use crate::capture::StateMap;
use crate::error::AuditError;
use crate::record::AuditRecord;

const COLUMNS: &str = "event_id, created_at_us, persisted_at_us, category, action, entity_type, \
     entity_id, entity_name, old_values, new_values, changed_fields, success, error_message, \
     actor_id, actor_name, actor_role, ip_address, user_agent, http_method, request_path, request_id";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to `location` (a file path or `sqlite:` URL) and run migrations.
    pub async fn connect(location: &str) -> Result<Self, AuditError> {
        let url = if location.starts_with("sqlite:") {
            location.to_string()
        } else {
            ensure_parent_dir(location)?;
            sqlite_url(location)
        };

        let options = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);
        // A private in-memory database only exists on its own connection.
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    pub async fn with_pool(pool: SqlitePool) -> Result<Self, AuditError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn sqlite_url(path: &str) -> String {
    if Path::new(path).is_absolute() {
        format!("sqlite:{}", path)
    } else {
        format!("sqlite://{}", path)
    }
}

fn ensure_parent_dir(file_path: &str) -> Result<(), AuditError> {
    let p = Path::new(file_path);
    if let Some(parent) = p.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn push_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &AuditFilter) {
    builder.push(" WHERE 1 = 1");

    if let Some(ref entity_type) = filter.entity_type {
        builder.push(" AND entity_type = ").push_bind(entity_type.clone());
    }
    if let Some(ref entity_id) = filter.entity_id {
        builder.push(" AND entity_id = ").push_bind(entity_id.clone());
    }
    if let Some(action) = filter.action {
        builder.push(" AND action = ").push_bind(action.as_str());
    }
    if let Some(category) = filter.category {
        builder.push(" AND category = ").push_bind(category.as_str());
    }
    if let Some(ref actor_id) = filter.actor_id {
        builder.push(" AND actor_id = ").push_bind(actor_id.clone());
    }
    if let Some(success) = filter.success {
        builder.push(" AND success = ").push_bind(success);
    }
    if let Some(start) = filter.start_time {
        builder.push(" AND created_at_us >= ").push_bind(start.timestamp_micros());
    }
    if let Some(end) = filter.end_time {
        builder.push(" AND created_at_us <= ").push_bind(end.timestamp_micros());
    }
}

fn to_json_text<T: serde::Serialize>(value: &Option<T>) -> Result<Option<String>, AuditError> {
    value
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(AuditError::from)
}

#[async_trait]
impl AuditStore for SqliteStore {
    async fn persist(&self, record: AuditRecord) -> Result<PersistOutcome, AuditError> {
        let event_id = record.event_id;

        let result = sqlx::query(&format!(
            "INSERT INTO audit_records ({COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(event_id) DO NOTHING"
        ))
        .bind(event_id.to_string())
        .bind(record.created_at.timestamp_micros())
        .bind(record.persisted_at.timestamp_micros())
        .bind(record.category.as_str())
        .bind(record.action.as_str())
        .bind(&record.entity_type)
        .bind(&record.entity_id)
        .bind(&record.entity_name)
        .bind(to_json_text(&record.old_values)?)
        .bind(to_json_text(&record.new_values)?)
        .bind(serde_json::to_string(&record.changed_fields)?)
        .bind(record.success)
        .bind(&record.error_message)
        .bind(&record.actor_id)
        .bind(&record.actor_name)
        .bind(&record.actor_role)
        .bind(&record.ip_address)
        .bind(&record.user_agent)
        .bind(&record.http_method)
        .bind(&record.request_path)
        .bind(record.request_id.map(|id| id.to_string()))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            Ok(PersistOutcome::Duplicate(event_id))
        } else {
            Ok(PersistOutcome::Stored(event_id))
        }
    }

    async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
        let mut builder = QueryBuilder::new(format!("SELECT {COLUMNS} FROM audit_records"));
        push_filter(&mut builder, filter);
        builder.push(" ORDER BY created_at_us DESC, event_id DESC");

        // SQLite needs a LIMIT before OFFSET; -1 means unbounded.
        let limit = filter.limit.map(|l| l as i64).unwrap_or(-1);
        builder.push(" LIMIT ").push_bind(limit);
        builder
            .push(" OFFSET ")
            .push_bind(filter.offset.unwrap_or(0) as i64);

        let rows: Vec<AuditRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(AuditRecord::try_from).collect()
    }

    async fn count(&self, filter: &AuditFilter) -> Result<u64, AuditError> {
        let mut builder = QueryBuilder::new("SELECT COUNT(1) FROM audit_records");
        push_filter(&mut builder, filter);

        let (count,): (i64,) = builder.build_query_as().fetch_one(&self.pool).await?;
        Ok(count as u64)
    }

    async fn get(&self, event_id: Uuid) -> Result<Option<AuditRecord>, AuditError> {
        let row: Option<AuditRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM audit_records WHERE event_id = ?"
        ))
        .bind(event_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(AuditRecord::try_from).transpose()
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, AuditError> {
        let result = sqlx::query("DELETE FROM audit_records WHERE created_at_us < ?")
            .bind(cutoff.timestamp_micros())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, FromRow)]
struct AuditRow {
    event_id: String,
    created_at_us: i64,
    persisted_at_us: i64,
    category: String,
    action: String,
    entity_type: String,
    entity_id: Option<String>,
    entity_name: Option<String>,
    old_values: Option<String>,
    new_values: Option<String>,
    changed_fields: String,
    success: bool,
    error_message: Option<String>,
    actor_id: Option<String>,
    actor_name: Option<String>,
    actor_role: Option<String>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    http_method: Option<String>,
    request_path: Option<String>,
    request_id: Option<String>,
}

fn corrupt(column: &str, detail: impl std::fmt::Display) -> AuditError {
    AuditError::Storage(format!("corrupt audit row ({column}): {detail}"))
}

fn parse_uuid(column: &str, value: &str) -> Result<Uuid, AuditError> {
    Uuid::parse_str(value).map_err(|e| corrupt(column, e))
}

fn parse_micros(column: &str, value: i64) -> Result<DateTime<Utc>, AuditError> {
    DateTime::from_timestamp_micros(value).ok_or_else(|| corrupt(column, value))
}

fn parse_state(column: &str, value: Option<String>) -> Result<Option<StateMap>, AuditError> {
    value
        .map(|text| serde_json::from_str(&text).map_err(|e| corrupt(column, e)))
        .transpose()
}

impl TryFrom<AuditRow> for AuditRecord {
    type Error = AuditError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        Ok(Self {
            event_id: parse_uuid("event_id", &row.event_id)?,
            created_at: parse_micros("created_at_us", row.created_at_us)?,
            persisted_at: parse_micros("persisted_at_us", row.persisted_at_us)?,
            category: EventCategory::from_str(&row.category).map_err(|e| corrupt("category", e))?,
            action: AuditAction::from_str(&row.action).map_err(|e| corrupt("action", e))?,
            entity_type: row.entity_type,
            entity_id: row.entity_id,
            entity_name: row.entity_name,
            old_values: parse_state("old_values", row.old_values)?,
            new_values: parse_state("new_values", row.new_values)?,
            changed_fields: serde_json::from_str(&row.changed_fields)
                .map_err(|e| corrupt("changed_fields", e))?,
            success: row.success,
            error_message: row.error_message,
            actor_id: row.actor_id,
            actor_name: row.actor_name,
            actor_role: row.actor_role,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            http_method: row.http_method,
            request_path: row.request_path,
            request_id: row
                .request_id
                .as_deref()
                .map(|id| parse_uuid("request_id", id))
                .transpose()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support;
    use serde_json::json;

    #[tokio::test]
    async fn test_sqlite_store_contract() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.db");
        let store = SqliteStore::connect(path.to_str().unwrap()).await.unwrap();
        test_support::exercise(&store).await;
    }

    #[tokio::test]
    async fn test_in_memory_url_and_snapshots_round_trip() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();

        let mut record = test_support::record(AuditAction::Update, "Project", "42");
        let old = json!({ "title": "Old", "views": 3 });
        let new = json!({ "title": "New", "views": 3 });
        record.old_values = old.as_object().cloned();
        record.new_values = new.as_object().cloned();
        record.changed_fields = vec!["title".into()];

        store.persist(record.clone()).await.unwrap();
        let fetched = store.get(record.event_id).await.unwrap().unwrap();

        assert_eq!(fetched.old_values, record.old_values);
        assert_eq!(fetched.changed_fields, vec!["title"]);
        assert_eq!(fetched.request_id, record.request_id);
        assert_eq!(
            fetched.created_at.timestamp_micros(),
            record.created_at.timestamp_micros()
        );
    }

    #[tokio::test]
    async fn test_duplicate_insert_keeps_one_row() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        let record = test_support::record(AuditAction::Feature, "Project", "5");

        assert!(!store.persist(record.clone()).await.unwrap().is_duplicate());
        assert!(store.persist(record.clone()).await.unwrap().is_duplicate());

        let (rows,): (i64,) = sqlx::query_as("SELECT COUNT(1) FROM audit_records")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }
}
