//! Transport-ready packaging of a capture plus its request context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::action::EventCategory;
use crate::capture::CaptureRecord;
use crate::context::RequestContext;
use crate::error::AuditError;

/// One captured audit event, immutable once built.
///
/// The request context is copied in, so the envelope outlives the request
/// that produced it and can cross the transport on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEnvelope {
    /// Globally unique; the consumer's idempotency key.
    pub event_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub category: EventCategory,
    #[serde(flatten)]
    pub capture: CaptureRecord,
    /// `None` for background work and anonymous paths without an edge context.
    pub context: Option<RequestContext>,
}

impl AuditEnvelope {
    pub fn new(capture: CaptureRecord, context: Option<RequestContext>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            created_at: Utc::now(),
            category: capture.action.category(),
            capture,
            context,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, AuditError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_slice(payload: &[u8]) -> Result<Self, AuditError> {
        serde_json::from_slice(payload).map_err(|e| AuditError::MalformedEnvelope(e.to_string()))
    }

    /// Check the structural invariants a consumer relies on.
    pub fn validate(&self) -> Result<(), AuditError> {
        let invalid = |reason: &str| {
            Err(AuditError::InvalidEnvelope {
                event_id: self.event_id,
                reason: reason.to_string(),
            })
        };

        if self.capture.entity_type.trim().is_empty() {
            return invalid("entity type is empty");
        }
        if self.capture.success && self.capture.error_message.is_some() {
            return invalid("successful event carries an error message");
        }
        if !self.capture.success && self.capture.error_message.is_none() {
            return invalid("failed event has no error message");
        }
        if self.category != self.capture.action.category() {
            return invalid("category does not match action");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::AuditAction;

    #[test]
    fn test_category_follows_action() {
        let env = AuditEnvelope::new(CaptureRecord::success(AuditAction::Login, "User"), None);
        assert_eq!(env.category, EventCategory::Authentication);
        assert!(env.validate().is_ok());
    }

    #[test]
    fn test_capture_fields_are_flattened() {
        let env = AuditEnvelope::new(
            CaptureRecord::success(AuditAction::Create, "Project").with_entity_id(Some("1".into())),
            Some(RequestContext::new()),
        );
        let json: serde_json::Value = serde_json::from_slice(&env.to_bytes().unwrap()).unwrap();
        assert_eq!(json["action"], "CREATE");
        assert_eq!(json["entity_id"], "1");
        assert_eq!(json["category"], "entity_mutation");
        assert!(json["old_values"].is_null());
        assert_eq!(json["context"]["ip_address"], "unknown");
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(matches!(
            AuditEnvelope::from_slice(b"{not json"),
            Err(AuditError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_rejects_inconsistent_outcome() {
        let mut env = AuditEnvelope::new(CaptureRecord::success(AuditAction::Update, "Project"), None);
        env.capture.error_message = Some("oops".into());
        assert!(matches!(env.validate(), Err(AuditError::InvalidEnvelope { .. })));

        let mut env = AuditEnvelope::new(
            CaptureRecord::failure(AuditAction::Delete, "Project", "not found"),
            None,
        );
        assert!(env.validate().is_ok());
        env.capture.error_message = None;
        assert!(env.validate().is_err());
    }

    #[test]
    fn test_rejects_category_mismatch_and_empty_type() {
        let mut env = AuditEnvelope::new(CaptureRecord::success(AuditAction::Publish, "Article"), None);
        env.category = EventCategory::Authentication;
        assert!(env.validate().is_err());

        let env = AuditEnvelope::new(CaptureRecord::success(AuditAction::Publish, "  "), None);
        assert!(env.validate().is_err());
    }
}
