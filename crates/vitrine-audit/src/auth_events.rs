//! Authentication event recording.
//!
//! Logins and credential changes have no wrapped business call to intercept,
//! so they are captured directly. Recording never fails the caller.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::action::AuditAction;
use crate::capture::CaptureRecord;
use crate::context::{self, RequestContext};
use crate::envelope::AuditEnvelope;
use crate::metrics::PipelineMetrics;
use crate::publisher::{AuditPublisher, NoopPublisher};
use crate::transport::panic_message;

/// Entity type recorded for authentication events.
pub const USER_ENTITY: &str = "User";

/// Records LOGIN, LOGOUT, LOGIN_FAILED and PASSWORD_CHANGE events.
#[derive(Clone)]
pub struct AuthEventRecorder {
    enabled: bool,
    publisher: Arc<dyn AuditPublisher>,
    metrics: Arc<PipelineMetrics>,
}

impl AuthEventRecorder {
    pub fn new(publisher: Arc<dyn AuditPublisher>, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            enabled: true,
            publisher,
            metrics,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            publisher: Arc::new(NoopPublisher),
            metrics: Arc::new(PipelineMetrics::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// A successful login. The request is usually still anonymous at this
    /// point, so the authenticated user becomes the recorded actor.
    pub async fn login(&self, user_id: &str, username: &str) {
        let capture = CaptureRecord::success(AuditAction::Login, USER_ENTITY)
            .with_entity_id(Some(user_id.to_string()))
            .with_entity_name(Some(username.to_string()));
        self.record(capture, Some((user_id, username))).await;
    }

    /// A rejected login attempt. `username` is whatever the client submitted.
    pub async fn login_failed(&self, username: &str, reason: &str) {
        let capture = CaptureRecord::failure(AuditAction::LoginFailed, USER_ENTITY, reason)
            .with_entity_name(Some(username.to_string()));
        self.record(capture, None).await;
    }

    pub async fn logout(&self, user_id: &str, username: &str) {
        let capture = CaptureRecord::success(AuditAction::Logout, USER_ENTITY)
            .with_entity_id(Some(user_id.to_string()))
            .with_entity_name(Some(username.to_string()));
        self.record(capture, Some((user_id, username))).await;
    }

    /// A password change; failures carry the rejection reason.
    pub async fn password_change(&self, user_id: &str, username: &str, failure: Option<&str>) {
        let capture = match failure {
            None => CaptureRecord::success(AuditAction::PasswordChange, USER_ENTITY),
            Some(reason) => CaptureRecord::failure(AuditAction::PasswordChange, USER_ENTITY, reason),
        }
        .with_entity_id(Some(user_id.to_string()))
        .with_entity_name(Some(username.to_string()));
        self.record(capture, Some((user_id, username))).await;
    }

    async fn record(&self, capture: CaptureRecord, actor: Option<(&str, &str)>) {
        if !self.enabled {
            return;
        }

        let context = match (context::current(), actor) {
            (Some(ctx), Some((id, name))) if ctx.is_anonymous() => {
                let role = ctx.actor_role.clone();
                Some(ctx.with_actor(id, Some(name.to_string()), role))
            }
            (Some(ctx), _) => Some(ctx),
            (None, Some((id, name))) => {
                Some(RequestContext::new().with_actor(id, Some(name.to_string()), None))
            }
            (None, None) => None,
        };

        let envelope = AuditEnvelope::new(capture, context);
        let event_id = envelope.event_id;
        let action = envelope.capture.action;
        self.metrics.record_captured();

        let published = AssertUnwindSafe(self.publisher.publish(envelope))
            .catch_unwind()
            .await;

        match published {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(
                    event_id = %event_id,
                    action = %action,
                    error = %e,
                    "failed to publish authentication event"
                );
            }
            Err(panic) => {
                self.metrics.record_publish_failure();
                tracing::warn!(
                    event_id = %event_id,
                    action = %action,
                    panic = %panic_message(panic.as_ref()),
                    "authentication event publisher panicked"
                );
            }
        }
    }
}
