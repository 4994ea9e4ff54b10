//! # vitrine-audit
//!
//! Audit pipeline for the Vitrine admin backend.
//!
//! Every administrative mutation is captured as "who changed what", shipped
//! through an asynchronous transport and persisted as an append-only record.
//! The business operation being audited is never blocked or failed by a
//! problem in the pipeline.
//!
//! ## Flow
//!
//! ```text
//! request edge ──► RequestContext (task-local)
//!                        │
//! business call ──► AuditInterceptor ──► AuditEnvelope ──► AuditPublisher
//!                                                             │
//!                                        Broker (bounded queues, redelivery)
//!                                             │                    │
//!                                       AuditConsumer       dead-letter queue
//!                                             │
//!                                         AuditStore (memory | JSONL | SQLite)
//! ```
//!
//! | Stage | Failure handling |
//! |-------|------------------|
//! | Capture (prior state, field extraction) | logged, field left empty |
//! | Publish (transport full or unknown) | logged, business result unaffected |
//! | Consume (malformed, store error, timeout) | retried, then dead-lettered |
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vitrine_audit::{
//!     Arguments, AuditAction, AuditError, AuditPipeline, Audited, EntityStateReader, StateMap,
//! };
//! use vitrine_core::AuditConfig;
//!
//! struct Projects;
//!
//! #[async_trait::async_trait]
//! impl EntityStateReader for Projects {
//!     async fn read_entity_state(&self, _: &str, _: &str) -> Result<Option<StateMap>, AuditError> {
//!         Ok(None)
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pipeline = AuditPipeline::start(&AuditConfig::default()).await?;
//! let audit = pipeline.interceptor(Arc::new(Projects));
//!
//! let op = Audited::new(AuditAction::Update, "Project")
//!     .entity_id_path("#id")?
//!     .entity_name_path("#result.title")?
//!     .capture_prior_state();
//!
//! let updated: Result<serde_json::Value, String> = audit
//!     .intercept(&op, &Arguments::new().with("id", 42), || async {
//!         Ok(serde_json::json!({ "id": 42, "title": "New title" }))
//!     })
//!     .await;
//! # let _ = updated;
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod auth_events;
pub mod capture;
pub mod client_ip;
pub mod consumer;
pub mod context;
pub mod dead_letter;
pub mod diff;
pub mod envelope;
pub mod error;
pub mod expression;
pub mod interceptor;
pub mod metrics;
pub mod pipeline;
pub mod publisher;
pub mod record;
pub mod storage;
pub mod transport;

pub use action::{AuditAction, EventCategory};
pub use auth_events::AuthEventRecorder;
pub use capture::{CaptureRecord, StateMap};
pub use consumer::AuditConsumer;
pub use context::RequestContext;
pub use dead_letter::{DeadLetter, DeadLetterQueue, DeadLetterSummary};
pub use envelope::AuditEnvelope;
pub use error::AuditError;
pub use expression::{Arguments, Extractor, FieldPath};
pub use interceptor::{AuditInterceptor, Audited, EntityMapper, EntityStateReader, JsonEntityMapper};
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use pipeline::AuditPipeline;
pub use publisher::{AuditPublisher, NoopPublisher, TransportPublisher};
pub use record::AuditRecord;
pub use storage::{
    AuditFilter, AuditStore, FileStore, MemoryStore, PersistOutcome, SqliteStore, create_store,
};
pub use transport::{Broker, DeliveryPolicy, Message, MessageHandler, TransportError};
