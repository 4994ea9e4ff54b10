//! Dead-letter holding area.
//!
//! Messages that exhaust their redeliveries land here and stay until an
//! operator replays or discards them. Nothing is retried automatically.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::RwLock;
use uuid::Uuid;

use crate::transport::Message;

/// A message parked on a dead-letter destination.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub message: Message,
    /// `<destination><suffix>`, e.g. "audit.entity.dlq".
    pub dead_letter_destination: String,
    /// Last failure reported for the message.
    pub reason: String,
    pub dead_lettered_at: DateTime<Utc>,
}

/// Serializable view of a [`DeadLetter`] for operators.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetterSummary {
    pub message_id: Uuid,
    pub destination: String,
    pub dead_letter_destination: String,
    pub delivery_count: u32,
    pub reason: String,
    pub first_enqueued_at: DateTime<Utc>,
    pub dead_lettered_at: DateTime<Utc>,
    /// The payload as JSON when it parses, otherwise lossy UTF-8 text.
    pub payload: serde_json::Value,
}

impl DeadLetter {
    pub fn summary(&self) -> DeadLetterSummary {
        let payload = serde_json::from_slice(&self.message.payload).unwrap_or_else(|_| {
            serde_json::Value::String(String::from_utf8_lossy(&self.message.payload).into_owned())
        });

        DeadLetterSummary {
            message_id: self.message.id,
            destination: self.message.destination.clone(),
            dead_letter_destination: self.dead_letter_destination.clone(),
            delivery_count: self.message.delivery_count,
            reason: self.reason.clone(),
            first_enqueued_at: self.message.first_enqueued_at,
            dead_lettered_at: self.dead_lettered_at,
            payload,
        }
    }
}

/// In-memory dead-letter queue keyed by message id.
#[derive(Debug, Default)]
pub struct DeadLetterQueue {
    entries: RwLock<BTreeMap<Uuid, DeadLetter>>,
}

impl DeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, letter: DeadLetter) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(letter.message.id, letter);
    }

    /// Dead letters, oldest first; optionally only those of one dead-letter destination.
    pub fn list(&self, dead_letter_destination: Option<&str>) -> Vec<DeadLetter> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut letters: Vec<_> = entries
            .values()
            .filter(|l| dead_letter_destination.is_none_or(|d| l.dead_letter_destination == d))
            .cloned()
            .collect();
        letters.sort_by_key(|l| l.dead_lettered_at);
        letters
    }

    pub fn get(&self, message_id: Uuid) -> Option<DeadLetter> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(&message_id).cloned()
    }

    /// Remove and return a dead letter.
    pub fn take(&self, message_id: Uuid) -> Option<DeadLetter> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(&message_id)
    }

    /// Drop a dead letter permanently. Returns whether it existed.
    pub fn discard(&self, message_id: Uuid) -> bool {
        let discarded = self.take(message_id).is_some();
        if discarded {
            tracing::info!(message_id = %message_id, "dead letter discarded");
        }
        discarded
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
