//! Error types for the audit crate.

use thiserror::Error;

use crate::transport::TransportError;

/// Errors that can occur in the audit pipeline.
#[derive(Debug, Error)]
pub enum AuditError {
    /// A field-extraction expression could not be parsed.
    #[error("invalid field expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },

    /// A transport payload could not be decoded as an envelope.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// A decoded envelope violates a structural invariant.
    #[error("invalid envelope {event_id}: {reason}")]
    InvalidEnvelope { event_id: uuid::Uuid, reason: String },

    /// The transport refused or lost a message.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Reading prior entity state failed.
    #[error("entity state lookup failed for {entity_type}#{entity_id}: {reason}")]
    StateLookup {
        entity_type: String,
        entity_id: String,
        reason: String,
    },

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Message processing exceeded its time budget.
    #[error("processing timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Database migration error.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
