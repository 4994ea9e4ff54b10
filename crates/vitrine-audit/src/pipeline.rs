//! Pipeline assembly and operator-facing handle.

use chrono::Utc;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;
use vitrine_core::{AuditConfig, RetentionConfig};

use crate::auth_events::AuthEventRecorder;
use crate::consumer::AuditConsumer;
use crate::context::DEFAULT_USER_AGENT_MAX_LEN;
use crate::dead_letter::DeadLetterSummary;
use crate::error::AuditError;
use crate::interceptor::{AuditInterceptor, EntityStateReader};
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::publisher::{AuditPublisher, NoopPublisher, TransportPublisher};
use crate::record::AuditRecord;
use crate::storage::{AuditFilter, AuditStore, MemoryStore, create_store};
use crate::transport::{Broker, DeliveryPolicy};

/// The assembled audit pipeline.
///
/// Capture-side handles ([`AuditInterceptor`], [`AuthEventRecorder`]) are
/// handed out from here; the consumer side runs on the broker's workers.
pub struct AuditPipeline {
    enabled: bool,
    store: Arc<dyn AuditStore>,
    publisher: Arc<dyn AuditPublisher>,
    broker: Option<Broker>,
    metrics: Arc<PipelineMetrics>,
    retention: RetentionConfig,
    user_agent_max_len: usize,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl AuditPipeline {
    /// Build the store, broker and consumers described by `config`.
    pub async fn start(config: &AuditConfig) -> Result<Self, AuditError> {
        let store = create_store(&config.store).await?;
        let metrics = Arc::new(PipelineMetrics::new());
        let transport = &config.transport;

        let (publisher, broker): (Arc<dyn AuditPublisher>, Option<Broker>) = if transport.enabled {
            let broker = Broker::new(DeliveryPolicy::from_config(transport), Arc::clone(&metrics));
            let consumer = Arc::new(AuditConsumer::new(Arc::clone(&store), Arc::clone(&metrics)));

            for destination in [&transport.entity_destination, &transport.auth_destination] {
                broker.declare(destination);
                broker.subscribe(destination, consumer.clone(), transport.workers)?;
            }

            let publisher = TransportPublisher::new(
                broker.clone(),
                transport.entity_destination.clone(),
                transport.auth_destination.clone(),
                Arc::clone(&metrics),
            );
            (Arc::new(publisher), Some(broker))
        } else {
            tracing::info!("audit transport disabled; events will not be persisted");
            (Arc::new(NoopPublisher), None)
        };

        let pipeline = Self {
            enabled: config.enabled,
            store,
            publisher,
            broker,
            metrics,
            retention: config.retention.clone(),
            user_agent_max_len: config.capture.user_agent_max_len,
            sweeper: Mutex::new(None),
        };

        if pipeline.retention.is_enabled() {
            pipeline.spawn_retention_sweeper();
        }

        tracing::info!(
            enabled = pipeline.enabled,
            backend = ?config.store.backend,
            transport = transport.enabled,
            retention_days = pipeline.retention.days,
            "audit pipeline started"
        );

        Ok(pipeline)
    }

    /// A pipeline that captures nothing.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            store: Arc::new(MemoryStore::new()),
            publisher: Arc::new(NoopPublisher),
            broker: None,
            metrics: Arc::new(PipelineMetrics::new()),
            retention: RetentionConfig {
                days: 0,
                ..Default::default()
            },
            user_agent_max_len: DEFAULT_USER_AGENT_MAX_LEN,
            sweeper: Mutex::new(None),
        }
    }

    /// Assemble from explicit components. No consumer is subscribed and no
    /// sweeper is started.
    pub fn from_parts(
        store: Arc<dyn AuditStore>,
        publisher: Arc<dyn AuditPublisher>,
        broker: Option<Broker>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            enabled: true,
            store,
            publisher,
            broker,
            metrics,
            retention: RetentionConfig::default(),
            user_agent_max_len: DEFAULT_USER_AGENT_MAX_LEN,
            sweeper: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn publisher_enabled(&self) -> bool {
        self.enabled && self.publisher.is_enabled()
    }

    pub fn user_agent_max_len(&self) -> usize {
        self.user_agent_max_len
    }

    /// An interceptor reading prior state through `reader`.
    pub fn interceptor(&self, reader: Arc<dyn EntityStateReader>) -> AuditInterceptor {
        if !self.enabled {
            return AuditInterceptor::disabled();
        }
        AuditInterceptor::new(Arc::clone(&self.publisher), Arc::clone(&self.metrics))
            .with_reader(reader)
    }

    pub fn auth_events(&self) -> AuthEventRecorder {
        if !self.enabled {
            return AuthEventRecorder::disabled();
        }
        AuthEventRecorder::new(Arc::clone(&self.publisher), Arc::clone(&self.metrics))
    }

    pub fn store(&self) -> &Arc<dyn AuditStore> {
        &self.store
    }

    pub fn broker(&self) -> Option<&Broker> {
        self.broker.as_ref()
    }

    // ===== Queries =====

    pub async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
        self.store.query(filter).await
    }

    pub async fn count(&self, filter: &AuditFilter) -> Result<u64, AuditError> {
        self.store.count(filter).await
    }

    pub async fn get(&self, event_id: Uuid) -> Result<Option<AuditRecord>, AuditError> {
        self.store.get(event_id).await
    }

    /// Recent records for one entity, newest first.
    pub async fn history(
        &self,
        entity_type: &str,
        entity_id: &str,
        limit: usize,
    ) -> Result<Vec<AuditRecord>, AuditError> {
        self.query(&AuditFilter {
            entity_type: Some(entity_type.to_string()),
            entity_id: Some(entity_id.to_string()),
            limit: Some(limit),
            ..Default::default()
        })
        .await
    }

    // ===== Dead letters =====

    pub fn dead_letters(&self) -> Vec<DeadLetterSummary> {
        self.broker
            .as_ref()
            .map(|b| b.dead_letters().list(None).iter().map(|l| l.summary()).collect())
            .unwrap_or_default()
    }

    pub fn dead_letter_count(&self) -> usize {
        self.broker.as_ref().map_or(0, |b| b.dead_letters().len())
    }

    /// Re-publish a dead letter. `Ok(false)` if it does not exist.
    pub fn replay_dead_letter(&self, message_id: Uuid) -> Result<bool, AuditError> {
        match &self.broker {
            Some(broker) => Ok(broker.replay_dead_letter(message_id)?),
            None => Ok(false),
        }
    }

    pub fn discard_dead_letter(&self, message_id: Uuid) -> bool {
        self.broker
            .as_ref()
            .is_some_and(|b| b.dead_letters().discard(message_id))
    }

    // ===== Metrics and retention =====

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Delete records older than the retention window. No-op when retention is off.
    pub async fn purge_expired(&self) -> Result<u64, AuditError> {
        purge(self.store.as_ref(), &self.retention).await
    }

    fn spawn_retention_sweeper(&self) {
        let store = Arc::clone(&self.store);
        let retention = self.retention.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(retention.sweep_interval());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                if let Err(e) = purge(store.as_ref(), &retention).await {
                    tracing::warn!(error = %e, "audit retention sweep failed");
                }
            }
        });

        let mut sweeper = self.sweeper.lock().unwrap_or_else(|e| e.into_inner());
        *sweeper = Some(handle);
    }

    /// Stop the sweeper and the consumer workers.
    pub async fn shutdown(&self) {
        let sweeper = self.sweeper.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = sweeper {
            handle.abort();
        }

        if let Some(broker) = &self.broker {
            broker.shutdown().await;
        }
        tracing::info!("audit pipeline stopped");
    }
}

async fn purge(store: &dyn AuditStore, retention: &RetentionConfig) -> Result<u64, AuditError> {
    if !retention.is_enabled() {
        return Ok(0);
    }

    let cutoff = chrono::TimeDelta::try_days(i64::from(retention.days))
        .and_then(|window| Utc::now().checked_sub_signed(window))
        .ok_or_else(|| {
            AuditError::Storage(format!(
                "retention window of {} days is out of range",
                retention.days
            ))
        })?;
    let removed = store.purge_older_than(cutoff).await?;
    if removed > 0 {
        tracing::info!(removed, cutoff = %cutoff, "purged expired audit records");
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::AuditAction;
    use crate::storage::test_support;

    #[tokio::test]
    async fn test_disabled_pipeline_hands_out_inert_handles() {
        let pipeline = AuditPipeline::disabled();
        assert!(!pipeline.is_enabled());
        assert!(!pipeline.publisher_enabled());
        assert!(!pipeline.auth_events().is_enabled());
        assert_eq!(pipeline.purge_expired().await.unwrap(), 0);
        assert!(pipeline.dead_letters().is_empty());
        assert!(!pipeline.discard_dead_letter(Uuid::new_v4()));
    }

    #[tokio::test]
    async fn test_transport_disabled_uses_noop_publisher() {
        let mut config = AuditConfig::default();
        config.transport.enabled = false;
        config.retention.days = 0;

        let pipeline = AuditPipeline::start(&config).await.unwrap();
        assert!(pipeline.is_enabled());
        assert!(!pipeline.publisher_enabled());
        assert!(pipeline.broker().is_none());
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_purge_respects_retention_window() {
        let pipeline = AuditPipeline::from_parts(
            Arc::new(MemoryStore::new()),
            Arc::new(NoopPublisher),
            None,
            Arc::new(PipelineMetrics::new()),
        );

        let fresh = test_support::record(AuditAction::Create, "Project", "1");
        let stale = test_support::aged(test_support::record(AuditAction::Create, "Project", "2"), 400);
        pipeline.store().persist(fresh.clone()).await.unwrap();
        pipeline.store().persist(stale.clone()).await.unwrap();

        assert_eq!(pipeline.purge_expired().await.unwrap(), 1);
        assert!(pipeline.get(stale.event_id).await.unwrap().is_none());

        let remaining = pipeline.history("Project", "1", 10).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].event_id, fresh.event_id);
    }

    #[tokio::test]
    async fn test_purge_with_unrepresentable_window_is_an_error() {
        let store = MemoryStore::new();
        store
            .persist(test_support::record(AuditAction::Create, "Project", "1"))
            .await
            .unwrap();
        let retention = RetentionConfig {
            days: u32::MAX,
            ..Default::default()
        };

        let err = purge(&store, &retention).await.unwrap_err();
        assert!(matches!(err, AuditError::Storage(msg) if msg.contains("out of range")));
        assert_eq!(store.count(&AuditFilter::default()).await.unwrap(), 1);
    }
}
