//! # EventBus Abstraction
//!
//! A platform-level abstraction for event-driven messaging across modules.
//!
//! ## Why This Lives in Tier 1
//!
//! The EventBus is a **shared runtime capability** that all modules depend on.
//! Placing it in `platform/` (Tier 1) allows:
//! - Modules to depend on platform crates without circular dependencies
//! - Plug-and-play module development (modules don't depend on each other)
//! - Config-driven swap between Redis, Kafka, and in-memory backends
//!
//! ## Implementations
//!
//! - **RedisBus**: pub/sub channels for live dispatch plus a per-type sorted
//!   time index and TTL'd blobs for replay
//! - **KafkaBus**: one topic per event type, consumer group per handler,
//!   replay by broker time-index seek
//! - **MemoryBus**: in-process channels and log for dev/test
//!
//! ## Delivery Semantics
//!
//! At-least-once. All handlers subscribed before a publish completes receive
//! the event; partial delivery can occur if the process crashes mid-dispatch.
//! Exactly-once is explicitly out of scope; consumers that need it must
//! deduplicate on `EventEnvelope::id`.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use event_bus::{EventBus, EventType, FnHandler, MemoryBus};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus: Arc<dyn EventBus> = Arc::new(MemoryBus::new());
//! bus.initialize().await?;
//!
//! // Subscribe a handler to one or more event types
//! let handler = Arc::new(FnHandler::new("logger", |event| {
//!     let id = event.id;
//!     async move {
//!         println!("received {id}");
//!         Ok(())
//!     }
//! }));
//! bus.subscribe(&[EventType::OpportunityCreated], handler).await?;
//!
//! // Publish an event
//! let event_id = bus
//!     .publish(
//!         EventType::OpportunityCreated,
//!         serde_json::json!({"opportunity_id": "opp-1"}),
//!         "opportunity-service",
//!         None,
//!         None,
//!     )
//!     .await?;
//! println!("published {event_id}");
//!
//! bus.shutdown().await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod envelope;
mod factory;
mod handler;
mod kafka_bus;
mod memory_bus;
mod publisher;
mod registry;
mod retry;
mod redis_bus;

pub use config::{BusBackend, BusConfig, KafkaConfig, RedisConfig};
pub use envelope::{
    validate_envelope_fields, EventEnvelope, EventType, DEFAULT_EVENT_VERSION,
};
pub use factory::create_event_bus;
pub use handler::{EventHandler, FnHandler, HandlerError};
pub use kafka_bus::KafkaBus;
pub use memory_bus::MemoryBus;
pub use publisher::{BatchingPublisher, DomainPublisher};
pub use retry::{retry_with_backoff, RetryConfig};
pub use redis_bus::RedisBus;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Errors that can occur when using the event bus
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("failed to publish event: {0}")]
    Publish(String),

    #[error("failed to subscribe: {0}")]
    Subscribe(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid bus configuration: {0}")]
    Configuration(String),

    #[error("replay failed: {0}")]
    Replay(String),

    #[error("bus not initialized, call initialize() first")]
    NotInitialized,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for BusError {
    fn from(e: serde_json::Error) -> Self {
        BusError::Serialization(e.to_string())
    }
}

/// Result type for event bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Lazy, finite, restartable sequence of replayed events
///
/// Events arrive in ascending timestamp order. Re-running a replay with the
/// same bounds yields the same set, modulo retention expiry.
pub type EventStream = BoxStream<'static, BusResult<EventEnvelope>>;

/// Operational counters exposed by every backend
#[derive(Debug, Clone, Serialize)]
pub struct BusStats {
    /// Backend identifier ("redis", "kafka", "memory")
    pub backend: String,
    /// Events published since initialize, by event type
    pub events_published: HashMap<String, u64>,
    /// Registered (event_type, handler) subscriptions
    pub subscriber_count: usize,
    /// Handler invocations currently in flight
    pub active_dispatch_tasks: usize,
}

/// Core event bus abstraction for publish/subscribe messaging with replay
///
/// Both production backends implement this contract identically; see the
/// crate docs for delivery semantics.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Acquire transport connections and start dispatch machinery
    ///
    /// A connection failure here is fatal and propagates to the caller.
    async fn initialize(&self) -> BusResult<()>;

    /// Cooperatively stop all dispatch loops and release connections
    ///
    /// In-flight handler invocations are allowed to complete; no new
    /// messages are pulled. Safe to call once per bus lifecycle, owned by
    /// the process entry point.
    async fn shutdown(&self) -> BusResult<()>;

    /// Publish an event, returning its assigned id
    ///
    /// Assigns a fresh id and UTC timestamp, delivers to all current
    /// subscribers for the type, and durably records the envelope for
    /// later replay under the configured retention.
    async fn publish(
        &self,
        event_type: EventType,
        payload: Value,
        source: &str,
        correlation_id: Option<String>,
        metadata: Option<Map<String, Value>>,
    ) -> BusResult<Uuid>;

    /// Register a handler for one or more event types
    ///
    /// Idempotently starts the backend's dispatch loop. Errors raised by
    /// `handle` are caught and routed to the handler's `on_error`; they
    /// never terminate dispatch.
    async fn subscribe(
        &self,
        event_types: &[EventType],
        handler: Arc<dyn EventHandler>,
    ) -> BusResult<()>;

    /// Replay recorded events of one type within a time range
    ///
    /// The range is inclusive on both ends; `to = None` means "up to now".
    /// Events stream in ascending timestamp order, at most `limit` of them.
    async fn replay(
        &self,
        event_type: EventType,
        from: DateTime<Utc>,
        to: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> BusResult<EventStream>;

    /// Operational counters for dashboards and health checks
    async fn stats(&self) -> BusResult<BusStats>;
}

impl fmt::Debug for dyn EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventBus")
    }
}
