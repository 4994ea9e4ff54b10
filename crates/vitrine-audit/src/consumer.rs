//! Envelope consumer: decode, diff, persist.

use async_trait::async_trait;
use std::sync::Arc;

use crate::diff::changed_fields;
use crate::envelope::AuditEnvelope;
use crate::error::AuditError;
use crate::metrics::PipelineMetrics;
use crate::record::AuditRecord;
use crate::storage::{AuditStore, PersistOutcome};
use crate::transport::{Message, MessageHandler};

/// Turns delivered envelopes into durable records.
///
/// Failures are returned, never swallowed, so the transport can redeliver and
/// eventually dead-letter the message.
pub struct AuditConsumer {
    store: Arc<dyn AuditStore>,
    metrics: Arc<PipelineMetrics>,
}

impl AuditConsumer {
    pub fn new(store: Arc<dyn AuditStore>, metrics: Arc<PipelineMetrics>) -> Self {
        Self { store, metrics }
    }

    /// Process one envelope payload.
    pub async fn consume(&self, payload: &[u8]) -> Result<PersistOutcome, AuditError> {
        match self.process(payload).await {
            Ok(outcome) => {
                match outcome {
                    PersistOutcome::Stored(event_id) => {
                        self.metrics.record_persisted();
                        tracing::debug!(event_id = %event_id, "audit record persisted");
                    }
                    PersistOutcome::Duplicate(event_id) => {
                        self.metrics.record_duplicate();
                        tracing::debug!(event_id = %event_id, "duplicate delivery ignored");
                    }
                }
                Ok(outcome)
            }
            Err(e) => {
                self.metrics.record_consume_failure();
                tracing::error!(error = %e, "failed to persist audit event");
                Err(e)
            }
        }
    }

    async fn process(&self, payload: &[u8]) -> Result<PersistOutcome, AuditError> {
        let envelope = AuditEnvelope::from_slice(payload)?;
        envelope.validate()?;

        let changed = changed_fields(
            envelope.capture.old_values.as_ref(),
            envelope.capture.new_values.as_ref(),
        );
        let record = AuditRecord::from_envelope(envelope, changed);

        self.store.persist(record).await
    }
}

#[async_trait]
impl MessageHandler for AuditConsumer {
    async fn handle(&self, message: &Message) -> Result<(), AuditError> {
        if message.is_redelivery() {
            tracing::debug!(
                message_id = %message.id,
                delivery_count = message.delivery_count,
                "redelivered audit message"
            );
        }
        self.consume(&message.payload).await.map(|_| ())
    }
}
