//! In-process message broker with bounded redelivery and dead-lettering.
//!
//! Each declared destination is a bounded tokio mpsc queue. Publishing never
//! waits: a full queue is reported to the caller as [`TransportError::Full`].
//! Subscribed workers pull from the queue and hand each message to a
//! [`MessageHandler`] under a processing timeout. A handler error, panic or
//! timeout schedules a redelivery; once a message has been redelivered
//! `max_redeliveries` times its next failure parks it on the dead-letter queue.
//!
//! [`Broker::shutdown`] does not drop anything: pending redeliveries are
//! re-enqueued at once, whatever is still queued gets one last delivery within
//! the processing timeout, and the rest is dead-lettered.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;
use vitrine_core::TransportConfig;

use crate::dead_letter::{DeadLetter, DeadLetterQueue};
use crate::error::AuditError;
use crate::metrics::PipelineMetrics;

/// Errors raised by the broker itself.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("unknown destination '{0}'")]
    UnknownDestination(String),

    #[error("destination '{0}' is full")]
    Full(String),

    #[error("destination '{0}' is closed")]
    Closed(String),
}

/// A unit of delivery.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: Uuid,
    pub destination: String,
    pub payload: Vec<u8>,
    /// Number of redeliveries so far; zero on the first delivery.
    pub delivery_count: u32,
    pub first_enqueued_at: DateTime<Utc>,
}

impl Message {
    pub fn new(destination: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            destination: destination.into(),
            payload,
            delivery_count: 0,
            first_enqueued_at: Utc::now(),
        }
    }

    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 0
    }
}

/// Consumer-side callback.
///
/// Returning an error (or exceeding the processing timeout) makes the broker
/// redeliver the message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> Result<(), AuditError>;
}

/// Delivery policy, usually taken from [`TransportConfig`].
#[derive(Debug, Clone)]
pub struct DeliveryPolicy {
    pub buffer_size: usize,
    pub max_redeliveries: u32,
    pub redelivery_delay: Duration,
    pub processing_timeout: Duration,
    pub dead_letter_suffix: String,
}

impl DeliveryPolicy {
    pub fn from_config(config: &TransportConfig) -> Self {
        Self {
            buffer_size: config.buffer_size.max(1),
            max_redeliveries: config.max_redeliveries,
            redelivery_delay: config.redelivery_delay(),
            processing_timeout: config.processing_timeout(),
            dead_letter_suffix: config.dead_letter_suffix.clone(),
        }
    }

    fn dead_letter_destination(&self, destination: &str) -> String {
        format!("{}{}", destination, self.dead_letter_suffix)
    }
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self::from_config(&TransportConfig::default())
    }
}

#[derive(Clone)]
struct Queue {
    sender: mpsc::Sender<Message>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Message>>>,
}

struct BrokerInner {
    policy: DeliveryPolicy,
    queues: RwLock<HashMap<String, Queue>>,
    dead_letters: DeadLetterQueue,
    metrics: Arc<PipelineMetrics>,
    handlers: RwLock<HashMap<String, Arc<dyn MessageHandler>>>,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    redeliveries: Mutex<Vec<JoinHandle<()>>>,
}

/// Cheaply cloneable handle to the broker.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

impl Broker {
    pub fn new(policy: DeliveryPolicy, metrics: Arc<PipelineMetrics>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(BrokerInner {
                policy,
                queues: RwLock::new(HashMap::new()),
                dead_letters: DeadLetterQueue::new(),
                metrics,
                handlers: RwLock::new(HashMap::new()),
                shutdown_tx,
                workers: Mutex::new(Vec::new()),
                redeliveries: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn policy(&self) -> &DeliveryPolicy {
        &self.inner.policy
    }

    /// Create `destination` if it does not exist yet.
    pub fn declare(&self, destination: &str) {
        let mut queues = self.inner.queues.write().unwrap_or_else(|e| e.into_inner());
        queues.entry(destination.to_string()).or_insert_with(|| {
            let (sender, receiver) = mpsc::channel(self.inner.policy.buffer_size);
            tracing::debug!(destination, "declared destination");
            Queue {
                sender,
                receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            }
        });
    }

    pub fn destinations(&self) -> Vec<String> {
        let queues = self.inner.queues.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<_> = queues.keys().cloned().collect();
        names.sort();
        names
    }

    /// Enqueue `payload` on `destination` without waiting. Returns the message id.
    ///
    /// Fails with [`TransportError::Closed`] once shutdown has begun.
    pub fn publish(&self, destination: &str, payload: Vec<u8>) -> Result<Uuid, TransportError> {
        if self.is_shut_down() {
            return Err(TransportError::Closed(destination.to_string()));
        }
        let message = Message::new(destination, payload);
        let id = message.id;
        self.inner.enqueue(message)?;
        Ok(id)
    }

    /// Messages waiting on `destination`.
    pub fn pending(&self, destination: &str) -> Option<usize> {
        let queues = self.inner.queues.read().unwrap_or_else(|e| e.into_inner());
        queues
            .get(destination)
            .map(|q| q.sender.max_capacity() - q.sender.capacity())
    }

    /// Start `workers` tasks delivering messages from `destination` to `handler`.
    pub fn subscribe(
        &self,
        destination: &str,
        handler: Arc<dyn MessageHandler>,
        workers: usize,
    ) -> Result<(), TransportError> {
        let queue = self.inner.queue(destination)?;
        self.inner
            .handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(destination.to_string(), Arc::clone(&handler));
        let mut handles = self.inner.workers.lock().unwrap_or_else(|e| e.into_inner());

        for worker_id in 0..workers.max(1) {
            let inner = Arc::clone(&self.inner);
            let receiver = Arc::clone(&queue.receiver);
            let handler = Arc::clone(&handler);
            let shutdown = self.inner.shutdown_tx.subscribe();
            let destination = destination.to_string();

            handles.push(tokio::spawn(async move {
                worker_loop(inner, destination, worker_id, receiver, handler, shutdown).await;
            }));
        }

        tracing::info!(destination, workers, "consumer subscribed");
        Ok(())
    }

    pub fn dead_letters(&self) -> &DeadLetterQueue {
        &self.inner.dead_letters
    }

    /// Re-publish a dead letter to its original destination with a fresh
    /// delivery count. Returns `Ok(false)` if no such dead letter exists.
    pub fn replay_dead_letter(&self, message_id: Uuid) -> Result<bool, TransportError> {
        let Some(letter) = self.inner.dead_letters.take(message_id) else {
            return Ok(false);
        };
        if self.is_shut_down() {
            let destination = letter.message.destination.clone();
            self.inner.dead_letters.push(letter);
            return Err(TransportError::Closed(destination));
        }

        let mut message = letter.message.clone();
        message.delivery_count = 0;

        match self.inner.enqueue(message) {
            Ok(()) => {
                tracing::info!(
                    message_id = %message_id,
                    destination = %letter.message.destination,
                    "dead letter replayed"
                );
                Ok(true)
            }
            Err(e) => {
                self.inner.dead_letters.push(letter);
                Err(e)
            }
        }
    }

    /// Stop all workers and settle every message still in flight.
    ///
    /// Workers finish their current message, sleeping redeliveries are
    /// re-enqueued without waiting out their delay, and the queues are then
    /// drained: each leftover gets one more delivery while the processing
    /// timeout lasts and is dead-lettered otherwise.
    pub async fn shutdown(&self) {
        let _ = self.inner.shutdown_tx.send(true);

        let workers = take_handles(&self.inner.workers);
        for handle in workers {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "consumer worker ended abnormally");
            }
        }

        // Workers may have scheduled redeliveries while finishing up.
        let redeliveries = take_handles(&self.inner.redeliveries);
        for handle in redeliveries {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "redelivery task ended abnormally");
            }
        }

        let (delivered, dead_lettered) = self.inner.drain().await;
        if dead_lettered > 0 {
            tracing::warn!(
                delivered,
                dead_lettered,
                "undelivered messages dead-lettered on shutdown"
            );
        } else if delivered > 0 {
            tracing::info!(delivered, "queued messages delivered on shutdown");
        }
        tracing::info!("broker stopped");
    }

    pub fn is_shut_down(&self) -> bool {
        *self.inner.shutdown_tx.borrow()
    }
}

impl BrokerInner {
    fn queue(&self, destination: &str) -> Result<Queue, TransportError> {
        let queues = self.queues.read().unwrap_or_else(|e| e.into_inner());
        queues
            .get(destination)
            .cloned()
            .ok_or_else(|| TransportError::UnknownDestination(destination.to_string()))
    }

    fn enqueue(&self, message: Message) -> Result<(), TransportError> {
        let queue = self.queue(&message.destination)?;
        let destination = message.destination.clone();

        queue.sender.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::Full(destination),
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed(destination),
        })
    }

    /// Empty every queue after the workers have stopped. Returns how many
    /// messages were delivered and how many were dead-lettered.
    async fn drain(&self) -> (usize, usize) {
        let deadline = tokio::time::Instant::now() + self.policy.processing_timeout;
        let queues: Vec<(String, Queue)> = {
            let queues = self.queues.read().unwrap_or_else(|e| e.into_inner());
            queues.iter().map(|(k, q)| (k.clone(), q.clone())).collect()
        };

        let mut delivered = 0;
        let mut dead_lettered = 0;

        for (destination, queue) in queues {
            let handler = self
                .handlers
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .get(&destination)
                .cloned();
            let mut receiver = queue.receiver.lock().await;

            while let Ok(message) = receiver.try_recv() {
                let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                let outcome = match &handler {
                    Some(handler) if !remaining.is_zero() => {
                        attempt(handler.as_ref(), &message, remaining).await
                    }
                    Some(_) => Err("shutdown deadline passed".to_string()),
                    None => Err("no consumer subscribed".to_string()),
                };

                match outcome {
                    Ok(()) => delivered += 1,
                    Err(failure) => {
                        self.dead_letter(message, format!("broker shut down: {failure}"));
                        dead_lettered += 1;
                    }
                }
            }
        }

        (delivered, dead_lettered)
    }

    fn dead_letter(&self, message: Message, reason: String) {
        let dead_letter_destination = self.policy.dead_letter_destination(&message.destination);

        tracing::warn!(
            message_id = %message.id,
            destination = %message.destination,
            dead_letter_destination = %dead_letter_destination,
            delivery_count = message.delivery_count,
            reason = %reason,
            "message dead-lettered"
        );

        self.metrics.record_dead_lettered();
        self.dead_letters.push(DeadLetter {
            message,
            dead_letter_destination,
            reason,
            dead_lettered_at: Utc::now(),
        });
    }
}

async fn worker_loop(
    inner: Arc<BrokerInner>,
    destination: String,
    worker_id: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Message>>>,
    handler: Arc<dyn MessageHandler>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::debug!(destination = %destination, worker_id, "consumer worker started");

    loop {
        if *shutdown.borrow_and_update() {
            break;
        }

        let next = tokio::select! {
            biased;
            _ = shutdown.changed() => None,
            message = async { receiver.lock().await.recv().await } => message,
        };

        let Some(message) = next else {
            break;
        };

        deliver(&inner, handler.as_ref(), message).await;
    }

    tracing::debug!(destination = %destination, worker_id, "consumer worker stopped");
}

fn take_handles(handles: &Mutex<Vec<JoinHandle<()>>>) -> Vec<JoinHandle<()>> {
    let mut handles = handles.lock().unwrap_or_else(|e| e.into_inner());
    handles.drain(..).collect()
}

/// One guarded call into the handler. The error is the failure reason.
async fn attempt(
    handler: &dyn MessageHandler,
    message: &Message,
    timeout: Duration,
) -> Result<(), String> {
    let call = AssertUnwindSafe(handler.handle(message)).catch_unwind();

    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(e))) => Err(e.to_string()),
        Ok(Err(panic)) => Err(format!("handler panicked: {}", panic_message(panic.as_ref()))),
        Err(_) => Err(AuditError::Timeout(timeout).to_string()),
    }
}

async fn deliver(inner: &Arc<BrokerInner>, handler: &dyn MessageHandler, message: Message) {
    let Err(failure) = attempt(handler, &message, inner.policy.processing_timeout).await else {
        return;
    };

    if message.delivery_count >= inner.policy.max_redeliveries {
        inner.dead_letter(message, failure);
        return;
    }

    tracing::debug!(
        message_id = %message.id,
        destination = %message.destination,
        delivery_count = message.delivery_count,
        error = %failure,
        "delivery failed, scheduling redelivery"
    );

    let task_inner = Arc::clone(inner);
    let mut shutdown = inner.shutdown_tx.subscribe();
    let handle = tokio::spawn(async move {
        let inner = task_inner;
        // Shutdown cuts the delay short so the drain picks the message up.
        tokio::select! {
            _ = tokio::time::sleep(inner.policy.redelivery_delay) => {}
            _ = async {
                let _ = shutdown.wait_for(|stopped| *stopped).await;
            } => {}
        }

        let mut retry = message;
        retry.delivery_count += 1;

        if let Err(e) = inner.enqueue(retry.clone()) {
            inner.dead_letter(retry, format!("redelivery failed: {e}; last error: {failure}"));
        }
    });

    let mut redeliveries = inner.redeliveries.lock().unwrap_or_else(|e| e.into_inner());
    redeliveries.retain(|h| !h.is_finished());
    redeliveries.push(handle);
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
