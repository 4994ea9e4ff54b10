//! The in-process result of intercepting one audited operation.

use serde::{Deserialize, Serialize};

use crate::action::AuditAction;

/// Field name to value snapshot of an entity.
pub type StateMap = serde_json::Map<String, serde_json::Value>;

/// What happened to which entity, and whether it worked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRecord {
    pub action: AuditAction,
    pub entity_type: String,
    /// Unknown until the call returns for CREATE.
    pub entity_id: Option<String>,
    pub entity_name: Option<String>,
    /// State before the call, for transition actions that asked for it.
    pub old_values: Option<StateMap>,
    /// State after a successful call, for actions that produce one.
    pub new_values: Option<StateMap>,
    pub success: bool,
    /// Set only when `success` is false.
    pub error_message: Option<String>,
}

impl CaptureRecord {
    /// A successful record with no snapshots yet.
    pub fn success(action: AuditAction, entity_type: impl Into<String>) -> Self {
        Self {
            action,
            entity_type: entity_type.into(),
            entity_id: None,
            entity_name: None,
            old_values: None,
            new_values: None,
            success: true,
            error_message: None,
        }
    }

    pub fn failure(
        action: AuditAction,
        entity_type: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            error_message: Some(error_message.into()),
            ..Self::success(action, entity_type)
        }
    }

    pub fn with_entity_id(mut self, id: Option<String>) -> Self {
        self.entity_id = id;
        self
    }

    pub fn with_entity_name(mut self, name: Option<String>) -> Self {
        self.entity_name = name;
        self
    }

    pub fn with_old_values(mut self, values: Option<StateMap>) -> Self {
        self.old_values = values;
        self
    }

    pub fn with_new_values(mut self, values: Option<StateMap>) -> Self {
        self.new_values = values;
        self
    }
}
