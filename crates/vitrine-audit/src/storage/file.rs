//! JSON Lines file store.
//!
//! One record per line, appended on persist. The file is read back at startup
//! so the event-id index survives restarts; retention rewrites the file.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

use super::{AuditFilter, AuditStore, PersistOutcome};
use crate::error::AuditError;
use crate::record::AuditRecord;

pub struct FileStore {
    path: PathBuf,
    // Appends and rewrites happen under this lock, so file and index agree.
    records: Mutex<HashMap<Uuid, AuditRecord>>,
}

impl FileStore {
    /// Open (or create) the store at `path`, loading existing records.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let records = Self::load(&path)?;
        tracing::info!(path = %path.display(), records = records.len(), "loaded audit records");

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> Result<HashMap<Uuid, AuditRecord>, AuditError> {
        let mut records = HashMap::new();
        if !path.exists() {
            return Ok(records);
        }

        let reader = BufReader::new(fs::File::open(path)?);
        for (line_num, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match serde_json::from_str::<AuditRecord>(line) {
                Ok(record) => {
                    // first write wins, matching persist semantics
                    records.entry(record.event_id).or_insert(record);
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        line = line_num + 1,
                        error = %e,
                        "skipping unreadable audit record"
                    );
                }
            }
        }

        Ok(records)
    }

    fn append(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let json = serde_json::to_string(record)?;
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", json)?;
        Ok(())
    }

    fn rewrite(&self, records: &HashMap<Uuid, AuditRecord>) -> Result<(), AuditError> {
        let tmp = self.path.with_extension("jsonl.tmp");
        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)?;

            let mut ordered: Vec<_> = records.values().collect();
            ordered.sort_by_key(|r| r.created_at);
            for record in ordered {
                writeln!(file, "{}", serde_json::to_string(record)?)?;
            }
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn lock_error(e: impl std::fmt::Display) -> AuditError {
    AuditError::Storage(format!("Failed to acquire lock: {}", e))
}

#[async_trait]
impl AuditStore for FileStore {
    async fn persist(&self, record: AuditRecord) -> Result<PersistOutcome, AuditError> {
        let mut records = self.records.lock().map_err(lock_error)?;
        let event_id = record.event_id;

        if records.contains_key(&event_id) {
            return Ok(PersistOutcome::Duplicate(event_id));
        }

        self.append(&record)?;
        records.insert(event_id, record);
        Ok(PersistOutcome::Stored(event_id))
    }

    async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
        let records = self.records.lock().map_err(lock_error)?;
        Ok(filter.apply(records.values()))
    }

    async fn count(&self, filter: &AuditFilter) -> Result<u64, AuditError> {
        let records = self.records.lock().map_err(lock_error)?;
        Ok(records.values().filter(|r| filter.matches(r)).count() as u64)
    }

    async fn get(&self, event_id: Uuid) -> Result<Option<AuditRecord>, AuditError> {
        let records = self.records.lock().map_err(lock_error)?;
        Ok(records.get(&event_id).cloned())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, AuditError> {
        let mut records = self.records.lock().map_err(lock_error)?;
        let before = records.len();

        let mut kept = records.clone();
        kept.retain(|_, r| r.created_at >= cutoff);
        let removed = before - kept.len();
        if removed == 0 {
            return Ok(0);
        }

        self.rewrite(&kept)?;
        *records = kept;
        Ok(removed as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::AuditAction;
    use crate::storage::test_support;

    #[tokio::test]
    async fn test_file_store_contract() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("audit.jsonl")).unwrap();
        test_support::exercise(&store).await;
    }

    #[tokio::test]
    async fn test_reload_keeps_idempotency() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("audit.jsonl");
        let record = test_support::record(AuditAction::Publish, "Article", "9");

        {
            let store = FileStore::open(&path).unwrap();
            store.persist(record.clone()).await.unwrap();
        }

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(
            reopened.persist(record.clone()).await.unwrap(),
            PersistOutcome::Duplicate(record.event_id)
        );
        assert_eq!(reopened.get(record.event_id).await.unwrap(), Some(record));

        let lines = fs::read_to_string(&path).unwrap();
        assert_eq!(lines.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let record = test_support::record(AuditAction::Create, "Skill", "3");
        fs::write(
            &path,
            format!("garbage\n\n{}\n", serde_json::to_string(&record).unwrap()),
        )
        .unwrap();

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.count(&AuditFilter::default()).await.unwrap(), 1);
    }
}
