//! Audit subscriber
//!
//! The event-sourcing audit layer is just another bus subscriber: it
//! persists every event it sees via the sourcing service. Persistence
//! failures surface through `on_error` logging and never stall dispatch;
//! the durable record is a second copy, not the delivery path.

use std::sync::Arc;

use async_trait::async_trait;
use event_bus::{EventBus, EventEnvelope, EventHandler, EventType, HandlerError};

use crate::service::EventSourcingService;

/// Bus handler persisting every received event to the store
pub struct AuditHandler {
    service: Arc<EventSourcingService>,
}

impl AuditHandler {
    pub fn new(service: Arc<EventSourcingService>) -> Self {
        Self { service }
    }

    /// Subscribe this handler to the full event catalog
    pub async fn subscribe_all(
        service: Arc<EventSourcingService>,
        bus: &dyn EventBus,
    ) -> event_bus::BusResult<()> {
        bus.subscribe(&EventType::ALL, Arc::new(AuditHandler::new(service)))
            .await
    }
}

#[async_trait]
impl EventHandler for AuditHandler {
    fn name(&self) -> &str {
        "event-store-audit"
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<(), HandlerError> {
        self.service
            .record(event)
            .await
            .map_err(|e| HandlerError::new(format!("audit persist failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryEventStore;
    use event_bus::MemoryBus;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_audit_persists_published_events() {
        let bus = MemoryBus::new();
        bus.initialize().await.unwrap();

        let service = Arc::new(EventSourcingService::new(Arc::new(
            InMemoryEventStore::new(),
        )));
        AuditHandler::subscribe_all(service.clone(), &bus)
            .await
            .unwrap();

        bus.publish(
            EventType::UserRegistered,
            json!({"user_id": "u-1"}),
            "user-service",
            None,
            None,
        )
        .await
        .unwrap();
        bus.publish(
            EventType::SignalDetected,
            json!({"signal_id": "s-1"}),
            "scout",
            None,
            None,
        )
        .await
        .unwrap();

        // Dispatch is asynchronous; give the worker a beat
        tokio::time::sleep(Duration::from_millis(100)).await;

        let counts = service.event_counts().await.unwrap();
        assert_eq!(counts.get("user.registered"), Some(&1));
        assert_eq!(counts.get("signal.detected"), Some(&1));
    }
}
