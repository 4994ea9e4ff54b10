//! Hand-off of envelopes to the transport.

use async_trait::async_trait;
use std::sync::Arc;

use crate::action::EventCategory;
use crate::envelope::AuditEnvelope;
use crate::error::AuditError;
use crate::metrics::PipelineMetrics;
use crate::transport::Broker;

/// Sends envelopes toward the consumer without waiting for processing.
///
/// Callers never need to know which implementation is active.
#[async_trait]
pub trait AuditPublisher: Send + Sync {
    async fn publish(&self, envelope: AuditEnvelope) -> Result<(), AuditError>;

    fn is_enabled(&self) -> bool;
}

/// Publisher backed by the in-process [`Broker`], routing by category.
pub struct TransportPublisher {
    broker: Broker,
    entity_destination: String,
    auth_destination: String,
    metrics: Arc<PipelineMetrics>,
}

impl TransportPublisher {
    pub fn new(
        broker: Broker,
        entity_destination: impl Into<String>,
        auth_destination: impl Into<String>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            broker,
            entity_destination: entity_destination.into(),
            auth_destination: auth_destination.into(),
            metrics,
        }
    }

    pub fn destination_for(&self, category: EventCategory) -> &str {
        match category {
            EventCategory::EntityMutation => &self.entity_destination,
            EventCategory::Authentication => &self.auth_destination,
        }
    }
}

#[async_trait]
impl AuditPublisher for TransportPublisher {
    async fn publish(&self, envelope: AuditEnvelope) -> Result<(), AuditError> {
        let destination = self.destination_for(envelope.category);
        let payload = envelope.to_bytes()?;

        match self.broker.publish(destination, payload) {
            Ok(message_id) => {
                self.metrics.record_published();
                tracing::debug!(
                    event_id = %envelope.event_id,
                    message_id = %message_id,
                    destination,
                    action = %envelope.capture.action,
                    "audit event published"
                );
                Ok(())
            }
            Err(e) => {
                self.metrics.record_publish_failure();
                Err(e.into())
            }
        }
    }

    fn is_enabled(&self) -> bool {
        true
    }
}

/// Publisher used when no transport is configured. Drops every envelope.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

#[async_trait]
impl AuditPublisher for NoopPublisher {
    async fn publish(&self, envelope: AuditEnvelope) -> Result<(), AuditError> {
        tracing::debug!(
            event_id = %envelope.event_id,
            action = %envelope.capture.action,
            entity_type = %envelope.capture.entity_type,
            "audit transport disabled, event dropped"
        );
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::AuditAction;
    use crate::capture::CaptureRecord;
    use crate::transport::{DeliveryPolicy, TransportError};

    fn envelope(action: AuditAction) -> AuditEnvelope {
        AuditEnvelope::new(CaptureRecord::success(action, "Project"), None)
    }

    #[tokio::test]
    async fn test_routes_by_category() {
        let metrics = Arc::new(PipelineMetrics::new());
        let broker = Broker::new(DeliveryPolicy::default(), metrics.clone());
        broker.declare("entity");
        broker.declare("auth");
        let publisher = TransportPublisher::new(broker.clone(), "entity", "auth", metrics.clone());

        publisher.publish(envelope(AuditAction::Create)).await.unwrap();
        publisher.publish(envelope(AuditAction::Logout)).await.unwrap();
        publisher.publish(envelope(AuditAction::Login)).await.unwrap();

        assert_eq!(broker.pending("entity"), Some(1));
        assert_eq!(broker.pending("auth"), Some(2));
        assert_eq!(metrics.snapshot().published, 3);
        assert!(publisher.is_enabled());
    }

    #[tokio::test]
    async fn test_undeclared_destination_is_a_transport_error() {
        let metrics = Arc::new(PipelineMetrics::new());
        let broker = Broker::new(DeliveryPolicy::default(), metrics.clone());
        let publisher = TransportPublisher::new(broker, "entity", "auth", metrics.clone());

        let err = publisher.publish(envelope(AuditAction::Update)).await.unwrap_err();
        assert!(matches!(
            err,
            AuditError::Transport(TransportError::UnknownDestination(_))
        ));
        assert_eq!(metrics.snapshot().publish_failures, 1);
    }

    #[tokio::test]
    async fn test_noop_accepts_everything() {
        let publisher = NoopPublisher;
        assert!(!publisher.is_enabled());
        publisher.publish(envelope(AuditAction::Delete)).await.unwrap();
    }
}
