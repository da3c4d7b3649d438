//! Domain event publishers
//!
//! Thin, stateless builders that shape each domain event's payload
//! consistently and hand it to the bus. A publisher instance carries a
//! fresh correlation id, so every event emitted through one call chain
//! shares it.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::envelope::EventType;
use crate::{BusResult, EventBus};

/// Publisher producing consistently shaped domain payloads
///
/// # Example
/// ```rust,no_run
/// use event_bus::{DomainPublisher, MemoryBus};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = Arc::new(MemoryBus::new());
/// let publisher = DomainPublisher::new(bus, "opportunity-service");
/// publisher
///     .opportunity_created("opp-1", "Community garden", "Help plant trees", "volunteering")
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct DomainPublisher {
    bus: Arc<dyn EventBus>,
    source: String,
    correlation_id: String,
}

impl DomainPublisher {
    pub fn new(bus: Arc<dyn EventBus>, source: impl Into<String>) -> Self {
        Self {
            bus,
            source: source.into(),
            correlation_id: Uuid::new_v4().to_string(),
        }
    }

    /// The correlation id shared by every event from this publisher
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Publish an arbitrary payload under this publisher's identity
    pub async fn publish(&self, event_type: EventType, payload: Value) -> BusResult<Uuid> {
        self.bus
            .publish(
                event_type,
                payload,
                &self.source,
                Some(self.correlation_id.clone()),
                None,
            )
            .await
    }

    /// Publish with extra metadata (aggregate linkage, causation)
    pub async fn publish_with_metadata(
        &self,
        event_type: EventType,
        payload: Value,
        metadata: Map<String, Value>,
    ) -> BusResult<Uuid> {
        self.bus
            .publish(
                event_type,
                payload,
                &self.source,
                Some(self.correlation_id.clone()),
                Some(metadata),
            )
            .await
    }

    // ------------------------------------------------------------------
    // Opportunity lifecycle
    // ------------------------------------------------------------------

    pub async fn opportunity_created(
        &self,
        opportunity_id: &str,
        title: &str,
        description: &str,
        category: &str,
    ) -> BusResult<Uuid> {
        self.publish(
            EventType::OpportunityCreated,
            json!({
                "opportunity_id": opportunity_id,
                "title": title,
                "description": description,
                "category": category,
            }),
        )
        .await
    }

    pub async fn opportunity_updated(
        &self,
        opportunity_id: &str,
        changes: Value,
    ) -> BusResult<Uuid> {
        self.publish(
            EventType::OpportunityUpdated,
            json!({
                "opportunity_id": opportunity_id,
                "changes": changes,
            }),
        )
        .await
    }

    pub async fn opportunity_deleted(&self, opportunity_id: &str, reason: &str) -> BusResult<Uuid> {
        self.publish(
            EventType::OpportunityDeleted,
            json!({
                "opportunity_id": opportunity_id,
                "reason": reason,
            }),
        )
        .await
    }

    pub async fn opportunity_validated(
        &self,
        opportunity_id: &str,
        validation_id: &str,
        consensus_score: f64,
    ) -> BusResult<Uuid> {
        self.publish(
            EventType::OpportunityValidated,
            json!({
                "opportunity_id": opportunity_id,
                "validation_id": validation_id,
                "consensus_score": consensus_score,
            }),
        )
        .await
    }

    // ------------------------------------------------------------------
    // User lifecycle
    // ------------------------------------------------------------------

    pub async fn user_registered(
        &self,
        user_id: &str,
        username: &str,
        email: &str,
    ) -> BusResult<Uuid> {
        self.publish(
            EventType::UserRegistered,
            json!({
                "user_id": user_id,
                "username": username,
                "email": email,
            }),
        )
        .await
    }

    pub async fn user_profile_updated(&self, user_id: &str, changes: Value) -> BusResult<Uuid> {
        self.publish(
            EventType::UserProfileUpdated,
            json!({
                "user_id": user_id,
                "changes": changes,
            }),
        )
        .await
    }

    pub async fn user_reputation_changed(
        &self,
        user_id: &str,
        points_delta: i64,
        total_points: i64,
        reason: &str,
    ) -> BusResult<Uuid> {
        self.publish(
            EventType::UserReputationChanged,
            json!({
                "user_id": user_id,
                "points_delta": points_delta,
                "total_points": total_points,
                "reason": reason,
            }),
        )
        .await
    }

    // ------------------------------------------------------------------
    // Validation lifecycle
    // ------------------------------------------------------------------

    pub async fn validation_submitted(
        &self,
        validation_id: &str,
        opportunity_id: &str,
        user_id: &str,
        score: f64,
        confidence: f64,
    ) -> BusResult<Uuid> {
        self.publish(
            EventType::ValidationSubmitted,
            json!({
                "validation_id": validation_id,
                "opportunity_id": opportunity_id,
                "user_id": user_id,
                "score": score,
                "confidence": confidence,
            }),
        )
        .await
    }

    pub async fn validation_approved(
        &self,
        validation_id: &str,
        moderator: Option<&str>,
        automated: bool,
    ) -> BusResult<Uuid> {
        self.publish(
            EventType::ValidationApproved,
            json!({
                "validation_id": validation_id,
                "moderator": moderator,
                "automated": automated,
            }),
        )
        .await
    }

    pub async fn validation_rejected(
        &self,
        validation_id: &str,
        reason: &str,
        automated: bool,
    ) -> BusResult<Uuid> {
        self.publish(
            EventType::ValidationRejected,
            json!({
                "validation_id": validation_id,
                "reason": reason,
                "automated": automated,
            }),
        )
        .await
    }

    // ------------------------------------------------------------------
    // Agent and signal lifecycle
    // ------------------------------------------------------------------

    pub async fn agent_started(&self, agent_id: &str, agent_type: &str) -> BusResult<Uuid> {
        self.publish(
            EventType::AgentStarted,
            json!({"agent_id": agent_id, "agent_type": agent_type}),
        )
        .await
    }

    pub async fn agent_stopped(&self, agent_id: &str, reason: &str) -> BusResult<Uuid> {
        self.publish(
            EventType::AgentStopped,
            json!({"agent_id": agent_id, "reason": reason}),
        )
        .await
    }

    pub async fn agent_error(&self, agent_id: &str, error: &str) -> BusResult<Uuid> {
        self.publish(
            EventType::AgentError,
            json!({"agent_id": agent_id, "error": error}),
        )
        .await
    }

    pub async fn agent_task_completed(
        &self,
        agent_id: &str,
        task_id: &str,
        items_processed: u64,
    ) -> BusResult<Uuid> {
        self.publish(
            EventType::AgentTaskCompleted,
            json!({
                "agent_id": agent_id,
                "task_id": task_id,
                "items_processed": items_processed,
            }),
        )
        .await
    }

    pub async fn signal_detected(
        &self,
        signal_id: &str,
        source_url: &str,
        strength: f64,
    ) -> BusResult<Uuid> {
        self.publish(
            EventType::SignalDetected,
            json!({
                "signal_id": signal_id,
                "source_url": source_url,
                "strength": strength,
            }),
        )
        .await
    }

    pub async fn system_error(&self, component: &str, message: &str) -> BusResult<Uuid> {
        self.publish(
            EventType::SystemError,
            json!({"component": component, "message": message}),
        )
        .await
    }
}

/// Buffering publisher that flushes on a size threshold or explicit flush
///
/// Every buffered event is published on flush; a batch-scoped operation
/// that completes normally (ending in `close`) drops nothing. Events still
/// buffered when the process crashes are lost; batching trades latency,
/// not durability after flush.
pub struct BatchingPublisher {
    bus: Arc<dyn EventBus>,
    source: String,
    correlation_id: String,
    max_size: usize,
    buffer: Mutex<Vec<(EventType, Value)>>,
}

impl BatchingPublisher {
    pub fn new(bus: Arc<dyn EventBus>, source: impl Into<String>, max_size: usize) -> Self {
        Self {
            bus,
            source: source.into(),
            correlation_id: Uuid::new_v4().to_string(),
            max_size: max_size.max(1),
            buffer: Mutex::new(Vec::new()),
        }
    }

    /// Buffer an event, flushing the whole batch if the threshold is hit
    ///
    /// Returns the ids published by a triggered flush (empty when the event
    /// was only buffered).
    pub async fn enqueue(&self, event_type: EventType, payload: Value) -> BusResult<Vec<Uuid>> {
        let should_flush = {
            let mut buffer = self.buffer.lock().await;
            buffer.push((event_type, payload));
            buffer.len() >= self.max_size
        };

        if should_flush {
            self.flush().await
        } else {
            Ok(Vec::new())
        }
    }

    /// Publish every buffered event
    ///
    /// On a publish failure the failed event and everything after it stay
    /// buffered, so nothing is silently dropped; the error propagates.
    pub async fn flush(&self) -> BusResult<Vec<Uuid>> {
        let mut buffer = self.buffer.lock().await;
        let pending: Vec<(EventType, Value)> = buffer.drain(..).collect();
        let mut published = Vec::with_capacity(pending.len());

        for (i, (event_type, payload)) in pending.iter().enumerate() {
            match self
                .bus
                .publish(
                    *event_type,
                    payload.clone(),
                    &self.source,
                    Some(self.correlation_id.clone()),
                    None,
                )
                .await
            {
                Ok(id) => published.push(id),
                Err(e) => {
                    // Re-buffer the unpublished tail, failed event included
                    *buffer = pending[i..].to_vec();
                    return Err(e);
                }
            }
        }

        Ok(published)
    }

    /// Flush the remainder and consume the publisher (scope exit)
    pub async fn close(self) -> BusResult<Vec<Uuid>> {
        self.flush().await
    }

    /// Events currently buffered
    pub async fn pending(&self) -> usize {
        self.buffer.lock().await.len()
    }

    /// Spawn a background task flushing the batch on a fixed cadence
    ///
    /// Bounds how long an event can sit buffered below the size threshold.
    /// Flush errors are logged and retried on the next tick. The task runs
    /// until aborted through the returned handle.
    pub fn spawn_periodic_flush(
        publisher: Arc<Self>,
        interval: std::time::Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if publisher.pending().await == 0 {
                    continue;
                }
                match publisher.flush().await {
                    Ok(ids) => {
                        tracing::debug!(count = ids.len(), "Periodic batch flush published events");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Periodic batch flush failed");
                    }
                }
            }
        })
    }
}
