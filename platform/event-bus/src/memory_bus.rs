//! In-memory implementation of the EventBus trait for testing and development
//!
//! Live dispatch rides a Tokio broadcast channel; replay is served from an
//! in-process log. The full bus contract (replay, stats, shutdown) works
//! without any external service, which is what the contract tests run
//! against.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::envelope::{EventEnvelope, EventType};
use crate::handler::EventHandler;
use crate::registry::HandlerRegistry;
use crate::{BusError, BusResult, BusStats, EventBus, EventStream};

const BROADCAST_CAPACITY: usize = 1024;

/// EventBus implementation using in-memory channels
///
/// Suitable for unit tests, local development without Docker, and
/// integration tests that need a fast, isolated bus. Retention is unbounded
/// (the replay log lives for the life of the process).
///
/// # Example
/// ```rust
/// use event_bus::{EventBus, EventType, MemoryBus};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = MemoryBus::new();
/// bus.initialize().await?;
/// bus.publish(
///     EventType::SystemHealthCheck,
///     serde_json::json!({"status": "ok"}),
///     "health-service",
///     None,
///     None,
/// )
/// .await?;
/// # Ok(())
/// # }
/// ```
pub struct MemoryBus {
    sender: broadcast::Sender<EventEnvelope>,
    log: Arc<RwLock<Vec<EventEnvelope>>>,
    registry: Arc<HandlerRegistry>,
    published: Arc<RwLock<HashMap<EventType, u64>>>,
    shutdown_tx: watch::Sender<bool>,
    listener: Mutex<Option<JoinHandle<()>>>,
    initialized: AtomicBool,
}

impl MemoryBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            sender,
            log: Arc::new(RwLock::new(Vec::new())),
            registry: Arc::new(HandlerRegistry::new()),
            published: Arc::new(RwLock::new(HashMap::new())),
            shutdown_tx,
            listener: Mutex::new(None),
            initialized: AtomicBool::new(false),
        }
    }

    /// Start the dispatch loop if it is not already running
    async fn ensure_listener(&self) {
        let mut listener = self.listener.lock().await;
        if listener.is_some() {
            return;
        }

        let mut receiver = self.sender.subscribe();
        let registry = self.registry.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        *listener = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    received = receiver.recv() => {
                        match received {
                            Ok(event) => registry.dispatch(event).await,
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                tracing::warn!(skipped, "MemoryBus dispatch loop lagged");
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
            tracing::debug!("MemoryBus dispatch loop stopped");
        }));
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn initialize(&self) -> BusResult<()> {
        self.ensure_listener().await;
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&self) -> BusResult<()> {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.listener.lock().await.take() {
            let _ = handle.await;
        }
        // Queued handler work drains before workers exit
        self.registry.close().await;
        self.initialized.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(
        &self,
        event_type: EventType,
        payload: Value,
        source: &str,
        correlation_id: Option<String>,
        metadata: Option<Map<String, Value>>,
    ) -> BusResult<Uuid> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(BusError::NotInitialized);
        }

        let mut event = EventEnvelope::new(event_type, payload, source);
        if let Some(correlation_id) = correlation_id {
            event = event.with_correlation_id(correlation_id);
        }
        if let Some(metadata) = metadata {
            event = event.with_metadata(metadata);
        }
        let event_id = event.id;

        // Durable record first, then live delivery, mirroring the two
        // write paths of the production backends.
        self.log.write().await.push(event.clone());
        *self.published.write().await.entry(event_type).or_insert(0) += 1;

        // No receivers is fine; the log still serves replay.
        let _ = self.sender.send(event);

        Ok(event_id)
    }

    async fn subscribe(
        &self,
        event_types: &[EventType],
        handler: Arc<dyn EventHandler>,
    ) -> BusResult<()> {
        self.registry.add(event_types, handler).await;
        self.ensure_listener().await;
        Ok(())
    }

    async fn replay(
        &self,
        event_type: EventType,
        from: DateTime<Utc>,
        to: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> BusResult<EventStream> {
        let log = self.log.read().await;
        let mut events: Vec<EventEnvelope> = log
            .iter()
            .filter(|e| e.event_type == event_type)
            .filter(|e| e.timestamp >= from)
            .filter(|e| to.map_or(true, |to| e.timestamp <= to))
            .cloned()
            .collect();
        drop(log);

        events.sort_by_key(|e| e.timestamp);
        if let Some(limit) = limit {
            events.truncate(limit);
        }

        Ok(futures::stream::iter(events.into_iter().map(Ok)).boxed())
    }

    async fn stats(&self) -> BusResult<BusStats> {
        let published = self.published.read().await;
        Ok(BusStats {
            backend: "memory".to_string(),
            events_published: published
                .iter()
                .map(|(t, n)| (t.as_str().to_string(), *n))
                .collect(),
            subscriber_count: self.registry.subscription_count().await,
            active_dispatch_tasks: self.registry.active_count(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::FnHandler;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_publish_requires_initialize() {
        let bus = MemoryBus::new();
        let result = bus
            .publish(EventType::SystemError, json!({}), "test", None, None)
            .await;
        assert!(matches!(result, Err(BusError::NotInitialized)));
    }

    #[tokio::test]
    async fn test_publish_and_dispatch() {
        let bus = MemoryBus::new();
        bus.initialize().await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handler = Arc::new(FnHandler::new("capture", move |event| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(event);
                Ok(())
            }
        }));

        bus.subscribe(&[EventType::OpportunityCreated], handler)
            .await
            .unwrap();

        let event_id = bus
            .publish(
                EventType::OpportunityCreated,
                json!({"opportunity_id": "opp-1"}),
                "test",
                None,
                None,
            )
            .await
            .unwrap();

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timeout")
            .expect("channel closed");

        assert_eq!(received.id, event_id);
        assert_eq!(received.payload["opportunity_id"], "opp-1");

        bus.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_unsubscribed_type_not_dispatched() {
        let bus = MemoryBus::new();
        bus.initialize().await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handler = Arc::new(FnHandler::new("capture", move |event| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(event);
                Ok(())
            }
        }));

        bus.subscribe(&[EventType::UserRegistered], handler)
            .await
            .unwrap();

        bus.publish(EventType::SystemError, json!({}), "test", None, None)
            .await
            .unwrap();

        let result = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(result.is_err(), "should not receive non-matching event");
    }

    #[tokio::test]
    async fn test_stats_counts() {
        let bus = MemoryBus::new();
        bus.initialize().await.unwrap();

        for _ in 0..3 {
            bus.publish(EventType::SignalDetected, json!({}), "test", None, None)
                .await
                .unwrap();
        }

        let handler = Arc::new(FnHandler::new("noop", |_e| async { Ok(()) }));
        bus.subscribe(
            &[EventType::SignalDetected, EventType::SignalProcessed],
            handler,
        )
        .await
        .unwrap();

        let stats = bus.stats().await.unwrap();
        assert_eq!(stats.backend, "memory");
        assert_eq!(stats.events_published.get("signal.detected"), Some(&3));
        assert_eq!(stats.subscriber_count, 2);
    }
}
