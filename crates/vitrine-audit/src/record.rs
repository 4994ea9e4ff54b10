//! Durable audit record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::action::{AuditAction, EventCategory};
use crate::capture::StateMap;
use crate::envelope::AuditEnvelope;

/// An append-only audit log entry, created only by the consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub event_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub persisted_at: DateTime<Utc>,
    pub category: EventCategory,
    pub action: AuditAction,

    // ===== Entity =====
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub entity_name: Option<String>,
    pub old_values: Option<StateMap>,
    pub new_values: Option<StateMap>,
    #[serde(default)]
    pub changed_fields: Vec<String>,

    // ===== Outcome =====
    pub success: bool,
    pub error_message: Option<String>,

    // ===== Request context =====
    pub actor_id: Option<String>,
    pub actor_name: Option<String>,
    pub actor_role: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub http_method: Option<String>,
    pub request_path: Option<String>,
    pub request_id: Option<Uuid>,
}

impl AuditRecord {
    /// Map an envelope and its diff to the durable shape.
    pub fn from_envelope(envelope: AuditEnvelope, changed_fields: Vec<String>) -> Self {
        let AuditEnvelope {
            event_id,
            created_at,
            category,
            capture,
            context,
        } = envelope;
        let mut record = Self {
            event_id,
            created_at,
            persisted_at: Utc::now(),
            category,
            action: capture.action,
            entity_type: capture.entity_type,
            entity_id: capture.entity_id,
            entity_name: capture.entity_name,
            old_values: capture.old_values,
            new_values: capture.new_values,
            changed_fields,
            success: capture.success,
            error_message: capture.error_message,
            actor_id: None,
            actor_name: None,
            actor_role: None,
            ip_address: None,
            user_agent: None,
            http_method: None,
            request_path: None,
            request_id: None,
        };

        if let Some(context) = context {
            record.actor_id = context.actor_id;
            record.actor_name = context.actor_name;
            record.actor_role = context.actor_role;
            record.ip_address = Some(context.ip_address);
            record.user_agent = context.user_agent;
            record.http_method = context.http_method;
            record.request_path = context.request_path;
            record.request_id = Some(context.request_id);
        }

        record
    }
}
