//! Audited action kinds and event categories.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// The closed set of administrative actions that are audited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    // ===== Entity mutations =====
    Create,
    Update,
    Delete,
    Publish,
    Unpublish,
    Feature,
    Unfeature,
    SetCurrent,

    // ===== Authentication =====
    Login,
    Logout,
    LoginFailed,
    PasswordChange,
}

impl AuditAction {
    pub const ALL: [AuditAction; 12] = [
        Self::Create,
        Self::Update,
        Self::Delete,
        Self::Publish,
        Self::Unpublish,
        Self::Feature,
        Self::Unfeature,
        Self::SetCurrent,
        Self::Login,
        Self::Logout,
        Self::LoginFailed,
        Self::PasswordChange,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Publish => "PUBLISH",
            Self::Unpublish => "UNPUBLISH",
            Self::Feature => "FEATURE",
            Self::Unfeature => "UNFEATURE",
            Self::SetCurrent => "SET_CURRENT",
            Self::Login => "LOGIN",
            Self::Logout => "LOGOUT",
            Self::LoginFailed => "LOGIN_FAILED",
            Self::PasswordChange => "PASSWORD_CHANGE",
        }
    }

    /// Whether the entity's state before the call is snapshotted
    /// (when the audited operation asks for it).
    pub fn requires_prior_state(&self) -> bool {
        matches!(
            self,
            Self::Update
                | Self::Delete
                | Self::Publish
                | Self::Unpublish
                | Self::Feature
                | Self::Unfeature
                | Self::SetCurrent
        )
    }

    /// Whether a successful call's result is snapshotted as the new state.
    pub fn requires_new_state(&self) -> bool {
        matches!(
            self,
            Self::Create
                | Self::Update
                | Self::Publish
                | Self::Unpublish
                | Self::Feature
                | Self::Unfeature
                | Self::SetCurrent
        )
    }

    pub fn category(&self) -> EventCategory {
        match self {
            Self::Login | Self::Logout | Self::LoginFailed | Self::PasswordChange => {
                EventCategory::Authentication
            }
            _ => EventCategory::EntityMutation,
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown action name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown audit action '{0}'")]
pub struct ParseActionError(pub String);

impl FromStr for AuditAction {
    type Err = ParseActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|action| action.as_str() == normalized)
            .ok_or_else(|| ParseActionError(s.to_string()))
    }
}

/// Envelope category; each category travels on its own destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// Create/update/delete and state transitions of content entities.
    EntityMutation,
    /// Login, logout and credential events.
    Authentication,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EntityMutation => "entity_mutation",
            Self::Authentication => "authentication",
        }
    }
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventCategory {
    type Err = ParseActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "entity_mutation" => Ok(Self::EntityMutation),
            "authentication" => Ok(Self::Authentication),
            other => Err(ParseActionError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prior_state_kinds() {
        let with_prior: Vec<_> = AuditAction::ALL
            .into_iter()
            .filter(|a| a.requires_prior_state())
            .collect();
        assert_eq!(
            with_prior,
            vec![
                AuditAction::Update,
                AuditAction::Delete,
                AuditAction::Publish,
                AuditAction::Unpublish,
                AuditAction::Feature,
                AuditAction::Unfeature,
                AuditAction::SetCurrent,
            ]
        );
        assert!(!AuditAction::Create.requires_prior_state());
    }

    #[test]
    fn test_delete_has_no_new_state() {
        assert!(AuditAction::Create.requires_new_state());
        assert!(!AuditAction::Delete.requires_new_state());
        assert!(!AuditAction::Login.requires_new_state());
    }

    #[test]
    fn test_categories() {
        assert_eq!(AuditAction::Publish.category(), EventCategory::EntityMutation);
        assert_eq!(AuditAction::LoginFailed.category(), EventCategory::Authentication);
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!("set_current".parse::<AuditAction>().unwrap(), AuditAction::SetCurrent);
        assert_eq!(AuditAction::PasswordChange.to_string(), "PASSWORD_CHANGE");
        assert!("ARCHIVE".parse::<AuditAction>().is_err());

        let json = serde_json::to_string(&AuditAction::LoginFailed).unwrap();
        assert_eq!(json, r#""LOGIN_FAILED""#);
    }
}
