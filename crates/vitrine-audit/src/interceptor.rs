//! Decorator that audits a business operation.
//!
//! [`AuditInterceptor::intercept`] wraps one call:
//!
//! 1. reads the current [`RequestContext`](crate::context::RequestContext),
//! 2. snapshots prior entity state when the operation asks for it, the action
//!    is a transition and the entity id resolves from the arguments alone,
//! 3. runs the call,
//! 4. resolves entity id and name against the result,
//! 5. maps a successful result to the new-state snapshot,
//! 6. builds the envelope and publishes it.
//!
//! The wrapped call's `Result` is returned untouched. Nothing that goes wrong in
//! steps 2, 4, 5 or 6 reaches the caller: failures are logged and the affected
//! fields are left empty.

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Display;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::action::AuditAction;
use crate::capture::{CaptureRecord, StateMap};
use crate::context::{self, RequestContext};
use crate::envelope::AuditEnvelope;
use crate::error::AuditError;
use crate::expression::{Arguments, Extractor};
use crate::metrics::PipelineMetrics;
use crate::publisher::{AuditPublisher, NoopPublisher};
use crate::transport::panic_message;

/// Reads the current state of an entity by type and id.
///
/// "Not found" is `Ok(None)`, not an error.
#[async_trait]
pub trait EntityStateReader: Send + Sync {
    async fn read_entity_state(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Option<StateMap>, AuditError>;
}

/// Flattens a call result into a field map for the new-state snapshot.
pub trait EntityMapper: Send + Sync {
    fn to_state_map(&self, value: &Value) -> Option<StateMap>;
}

/// Uses the serialized result's top-level object fields as the snapshot.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonEntityMapper;

impl EntityMapper for JsonEntityMapper {
    fn to_state_map(&self, value: &Value) -> Option<StateMap> {
        value.as_object().cloned()
    }
}

/// Declaration of an audited operation.
#[derive(Debug, Clone)]
pub struct Audited {
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: Option<Extractor>,
    pub entity_name: Option<Extractor>,
    pub capture_prior_state: bool,
}

impl Audited {
    pub fn new(action: AuditAction, entity_type: impl Into<String>) -> Self {
        Self {
            action,
            entity_type: entity_type.into(),
            entity_id: None,
            entity_name: None,
            capture_prior_state: false,
        }
    }

    pub fn entity_id(mut self, extractor: impl Into<Extractor>) -> Self {
        self.entity_id = Some(extractor.into());
        self
    }

    /// Entity id from a `#scope.path` expression.
    pub fn entity_id_path(self, expression: &str) -> Result<Self, AuditError> {
        Ok(self.entity_id(Extractor::path(expression)?))
    }

    pub fn entity_name(mut self, extractor: impl Into<Extractor>) -> Self {
        self.entity_name = Some(extractor.into());
        self
    }

    /// Entity display name from a `#scope.path` expression.
    pub fn entity_name_path(self, expression: &str) -> Result<Self, AuditError> {
        Ok(self.entity_name(Extractor::path(expression)?))
    }

    /// Snapshot the entity before the call (transition actions only).
    pub fn capture_prior_state(mut self) -> Self {
        self.capture_prior_state = true;
        self
    }

    fn wants_prior_state(&self) -> bool {
        self.capture_prior_state && self.action.requires_prior_state()
    }
}

/// Wraps business calls and emits one audit envelope per call.
#[derive(Clone)]
pub struct AuditInterceptor {
    enabled: bool,
    publisher: Arc<dyn AuditPublisher>,
    reader: Option<Arc<dyn EntityStateReader>>,
    mapper: Arc<dyn EntityMapper>,
    metrics: Arc<PipelineMetrics>,
}

impl AuditInterceptor {
    pub fn new(publisher: Arc<dyn AuditPublisher>, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            enabled: true,
            publisher,
            reader: None,
            mapper: Arc::new(JsonEntityMapper),
            metrics,
        }
    }

    /// An interceptor that only runs the wrapped calls.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(Arc::new(NoopPublisher), Arc::new(PipelineMetrics::new()))
        }
    }

    pub fn with_reader(mut self, reader: Arc<dyn EntityStateReader>) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn with_mapper(mut self, mapper: Arc<dyn EntityMapper>) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Run `call` as the audited operation described by `op`.
    pub async fn intercept<T, E, F, Fut>(
        &self,
        op: &Audited,
        args: &Arguments,
        call: F,
    ) -> Result<T, E>
    where
        T: Serialize,
        E: Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.enabled {
            return call().await;
        }

        let context = context::current();

        let prior_id = op
            .entity_id
            .as_ref()
            .and_then(|extractor| extractor.evaluate_string(args, None));

        let old_values = match (&prior_id, op.wants_prior_state()) {
            (Some(id), true) => self.read_prior_state(&op.entity_type, id).await,
            _ => None,
        };

        let outcome = call().await;

        let built = catch_unwind(AssertUnwindSafe(|| {
            self.build_envelope(op, args, &outcome, prior_id, old_values, context)
        }));

        match built {
            Ok(envelope) => self.hand_off(envelope).await,
            Err(panic) => {
                tracing::warn!(
                    action = %op.action,
                    entity_type = %op.entity_type,
                    panic = %panic_message(panic.as_ref()),
                    "audit capture failed; business result unaffected"
                );
            }
        }

        outcome
    }

    async fn read_prior_state(&self, entity_type: &str, entity_id: &str) -> Option<StateMap> {
        let reader = self.reader.as_ref()?;

        let read = AssertUnwindSafe(reader.read_entity_state(entity_type, entity_id))
            .catch_unwind()
            .await;

        match read {
            Ok(Ok(state)) => state,
            Ok(Err(e)) => {
                tracing::warn!(
                    entity_type,
                    entity_id,
                    error = %e,
                    "prior state lookup failed; continuing without it"
                );
                None
            }
            Err(panic) => {
                tracing::warn!(
                    entity_type,
                    entity_id,
                    panic = %panic_message(panic.as_ref()),
                    "prior state lookup panicked; continuing without it"
                );
                None
            }
        }
    }

    fn build_envelope<T: Serialize, E: Display>(
        &self,
        op: &Audited,
        args: &Arguments,
        outcome: &Result<T, E>,
        prior_id: Option<String>,
        old_values: Option<StateMap>,
        context: Option<RequestContext>,
    ) -> AuditEnvelope {
        let result_value = match outcome {
            Ok(value) => match serde_json::to_value(value) {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!(error = %e, "call result not serializable; snapshot skipped");
                    None
                }
            },
            Err(_) => None,
        };

        let capture = match outcome {
            Ok(_) => CaptureRecord::success(op.action, op.entity_type.clone()),
            Err(e) => CaptureRecord::failure(op.action, op.entity_type.clone(), e.to_string()),
        };

        let entity_id = prior_id.or_else(|| {
            op.entity_id
                .as_ref()
                .and_then(|x| x.evaluate_string(args, result_value.as_ref()))
        });
        let entity_name = op
            .entity_name
            .as_ref()
            .and_then(|x| x.evaluate_string(args, result_value.as_ref()));

        let new_values = if outcome.is_ok() && op.action.requires_new_state() {
            result_value.as_ref().and_then(|v| self.mapper.to_state_map(v))
        } else {
            None
        };

        let capture = capture
            .with_entity_id(entity_id)
            .with_entity_name(entity_name)
            .with_old_values(old_values)
            .with_new_values(new_values);

        AuditEnvelope::new(capture, context)
    }

    async fn hand_off(&self, envelope: AuditEnvelope) {
        self.metrics.record_captured();

        let event_id = envelope.event_id;
        let action = envelope.capture.action;
        tracing::debug!(
            event_id = %event_id,
            action = %action,
            entity_type = %envelope.capture.entity_type,
            success = envelope.capture.success,
            "audit event captured"
        );

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
                    "audit publish failed; business result unaffected"
                );
            }
            Err(panic) => {
                self.metrics.record_publish_failure();
                tracing::warn!(
                    event_id = %event_id,
                    action = %action,
                    panic = %panic_message(panic.as_ref()),
                    "audit publish panicked; business result unaffected"
                );
            }
        }
    }
}
