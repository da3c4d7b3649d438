//! Event handler capability
//!
//! Subscribers implement this interface instead of inheriting from a base
//! class: dispatch is a registry lookup by event type, and the bus routes
//! handler failures to `on_error` so one bad message never kills a dispatch
//! loop.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;

use crate::envelope::EventEnvelope;

/// Error raised by a handler while processing one event
///
/// A `HandlerError` is scoped to a single (handler, event) pair. The bus
/// catches it, routes it to the handler's `on_error`, and continues
/// dispatching.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        Self(format!("payload deserialization failed: {e}"))
    }
}

/// Capability interface for event subscribers
///
/// Multiple handlers may subscribe to the same event type; each receives
/// every matching event independently.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Stable handler name, used for consumer-group naming and logging
    fn name(&self) -> &str;

    /// Process one event
    async fn handle(&self, event: &EventEnvelope) -> Result<(), HandlerError>;

    /// Called when `handle` fails for an event
    ///
    /// The default implementation logs and moves on; override to route
    /// failures to a dead-letter store or alerting.
    async fn on_error(&self, event: &EventEnvelope, error: &HandlerError) {
        tracing::error!(
            handler = %self.name(),
            event_id = %event.id,
            event_type = %event.event_type,
            error = %error,
            "Handler failed to process event"
        );
    }
}

type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send>>;

/// Adapter wrapping an async closure as an [`EventHandler`]
///
/// The closure receives its own clone of the event, so the returned future
/// owns everything it needs.
///
/// # Example
/// ```rust
/// use event_bus::FnHandler;
///
/// let handler = FnHandler::new("print-events", |event| async move {
///     println!("saw event {}", event.id);
///     Ok(())
/// });
/// ```
pub struct FnHandler {
    name: String,
    f: Box<dyn Fn(EventEnvelope) -> HandlerFuture + Send + Sync>,
}

impl FnHandler {
    pub fn new<G, Fut>(name: impl Into<String>, f: G) -> Self
    where
        G: Fn(EventEnvelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            f: Box::new(move |event| -> HandlerFuture { Box::pin(f(event)) }),
        }
    }
}

#[async_trait]
impl EventHandler for FnHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<(), HandlerError> {
        (self.f)(event.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::EventType;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fn_handler_invokes_closure() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();

        let handler = FnHandler::new("counter", move |_event| {
            let count = count_clone.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let event = EventEnvelope::new(EventType::SystemHealthCheck, json!({}), "test");
        handler.handle(&event).await.unwrap();
        handler.handle(&event).await.unwrap();

        assert_eq!(handler.name(), "counter");
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_default_on_error_does_not_panic() {
        let handler =
            FnHandler::new("failing", |_event| async { Err(HandlerError::new("boom")) });

        let event = EventEnvelope::new(EventType::SystemError, json!({}), "test");
        let err = handler.handle(&event).await.unwrap_err();
        handler.on_error(&event, &err).await;
    }
}
