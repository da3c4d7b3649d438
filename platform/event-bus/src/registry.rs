//! Shared handler registry and dispatch machinery
//!
//! Every subscription gets its own worker task fed by an unbounded queue:
//! the loop that pulls messages off the transport never blocks on a slow
//! handler, handlers never block each other, and each handler still sees
//! events in publish order. Handler failures are routed to `on_error`
//! inside the worker and never reach the transport loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::envelope::{EventEnvelope, EventType};
use crate::handler::EventHandler;

/// Spawn the sequential worker that drains one subscription's queue
///
/// The worker exits once every sender clone is dropped and the queue is
/// drained, so shutdown lets in-flight work complete without pulling new
/// messages. `active_tasks` counts in-flight `handle` invocations for
/// `stats()`.
pub(crate) fn spawn_handler_worker(
    handler: Arc<dyn EventHandler>,
    active_tasks: Arc<AtomicUsize>,
) -> (mpsc::UnboundedSender<EventEnvelope>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<EventEnvelope>();

    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            active_tasks.fetch_add(1, Ordering::SeqCst);
            if let Err(e) = handler.handle(&event).await {
                handler.on_error(&event, &e).await;
            }
            active_tasks.fetch_sub(1, Ordering::SeqCst);
        }
        tracing::debug!(handler = %handler.name(), "Handler worker stopped");
    });

    (tx, handle)
}

/// Per-type registry of subscription queues, shared by the backends whose
/// dispatch loop is a single transport listener (memory, redis)
pub(crate) struct HandlerRegistry {
    senders: RwLock<HashMap<EventType, Vec<mpsc::UnboundedSender<EventEnvelope>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    active_tasks: Arc<AtomicUsize>,
}

impl HandlerRegistry {
    pub(crate) fn new() -> Self {
        Self {
            senders: RwLock::new(HashMap::new()),
            workers: Mutex::new(Vec::new()),
            active_tasks: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Register a handler for the given types, spawning its worker
    pub(crate) async fn add(&self, event_types: &[EventType], handler: Arc<dyn EventHandler>) {
        let (tx, worker) = spawn_handler_worker(handler, self.active_tasks.clone());

        let mut senders = self.senders.write().await;
        for event_type in event_types {
            senders.entry(*event_type).or_default().push(tx.clone());
        }
        drop(senders);

        self.workers.lock().await.push(worker);
    }

    /// Route one event to every subscription queue for its type
    pub(crate) async fn dispatch(&self, event: EventEnvelope) {
        let senders = self.senders.read().await;
        if let Some(queues) = senders.get(&event.event_type) {
            for tx in queues {
                // A closed queue means the worker is gone; nothing to do
                // beyond skipping it.
                let _ = tx.send(event.clone());
            }
        }
    }

    /// Total (event_type, handler) registrations
    pub(crate) async fn subscription_count(&self) -> usize {
        self.senders.read().await.values().map(Vec::len).sum()
    }

    /// Handler invocations currently in flight
    pub(crate) fn active_count(&self) -> usize {
        self.active_tasks.load(Ordering::SeqCst)
    }

    /// Drop all queues and wait for workers to drain
    ///
    /// Called from `shutdown`: queued events are still processed, no new
    /// ones arrive, and no worker task outlives the bus.
    pub(crate) async fn close(&self) {
        self.senders.write().await.clear();
        let mut workers = self.workers.lock().await;
        for worker in workers.drain(..) {
            let _ = worker.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{FnHandler, HandlerError};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc as tokio_mpsc;

    #[tokio::test]
    async fn test_registry_routes_by_type() {
        let registry = HandlerRegistry::new();
        let handler = Arc::new(FnHandler::new("h1", |_e| async { Ok(()) }));

        registry
            .add(
                &[EventType::OpportunityCreated, EventType::OpportunityUpdated],
                handler,
            )
            .await;

        assert_eq!(registry.subscription_count().await, 2);
    }

    #[tokio::test]
    async fn test_worker_preserves_order_and_isolates_failures() {
        let (seen_tx, mut seen_rx) = tokio_mpsc::unbounded_channel();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let handler = Arc::new(FnHandler::new("flaky", move |event| {
            let seen_tx = seen_tx.clone();
            let calls = calls_clone.clone();
            let n = event.payload["n"].as_i64().unwrap_or(-1);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if n == 1 {
                    return Err(HandlerError::new("boom on n=1"));
                }
                let _ = seen_tx.send(n);
                Ok(())
            }
        }));

        let active = Arc::new(AtomicUsize::new(0));
        let (tx, worker) = spawn_handler_worker(handler, active.clone());

        for n in 0..4 {
            let event = EventEnvelope::new(EventType::SignalDetected, json!({ "n": n }), "test");
            tx.send(event).unwrap();
        }
        drop(tx);
        worker.await.unwrap();

        // The failure on n=1 did not stop later events, and order held.
        let mut seen = Vec::new();
        while let Ok(n) = seen_rx.try_recv() {
            seen.push(n);
        }
        assert_eq!(seen, vec![0, 2, 3]);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_close_drains_queued_events() {
        let registry = HandlerRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let handler = Arc::new(FnHandler::new("slowish", move |_e| {
            let count = count_clone.clone();
            async move {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }));

        registry.add(&[EventType::SystemHealthCheck], handler).await;
        for _ in 0..3 {
            registry
                .dispatch(EventEnvelope::new(
                    EventType::SystemHealthCheck,
                    json!({}),
                    "test",
                ))
                .await;
        }

        registry.close().await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(registry.subscription_count().await, 0);
    }
}
