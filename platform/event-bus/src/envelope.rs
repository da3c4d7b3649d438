//! # Event Envelope
//!
//! Platform-wide event envelope for all inter-service communication.
//!
//! ## Design Principles
//!
//! 1. **Single Source of Truth**: One envelope struct for the entire platform
//! 2. **Immutability**: `id`, `payload`, and `timestamp` are set once at
//!    creation and never change; schema migration produces a *new* envelope
//!    with the same `id` and a bumped `metadata.version`
//! 3. **Versioning**: payload schema is governed by `(event_type, version)`
//! 4. **Tracing**: built-in correlation and causation linkage
//!
//! ## Envelope Fields
//!
//! - `id`: Unique identifier, used for idempotency and audit linkage
//! - `event_type`: Closed catalog of domain event tags
//! - `payload`: Event-specific data, opaque to the transport
//! - `timestamp`: UTC creation time, the ordering key for replay
//! - `source`: Component that produced the event
//! - `correlation_id`: Links a causal chain of events across services
//! - `metadata`: Open map carrying `version`, aggregate linkage, causation
//!   and replay bookkeeping

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Default payload schema version stamped on new envelopes
pub const DEFAULT_EVENT_VERSION: &str = "1.0";

/// Closed catalog of domain event types
///
/// Serialized as the dotted string form (e.g. `"opportunity.created"`),
/// which is also the wire subject suffix on both bus backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "opportunity.created")]
    OpportunityCreated,
    #[serde(rename = "opportunity.updated")]
    OpportunityUpdated,
    #[serde(rename = "opportunity.deleted")]
    OpportunityDeleted,
    #[serde(rename = "opportunity.validated")]
    OpportunityValidated,
    #[serde(rename = "user.registered")]
    UserRegistered,
    #[serde(rename = "user.profile_updated")]
    UserProfileUpdated,
    #[serde(rename = "user.reputation_changed")]
    UserReputationChanged,
    #[serde(rename = "validation.submitted")]
    ValidationSubmitted,
    #[serde(rename = "validation.approved")]
    ValidationApproved,
    #[serde(rename = "validation.rejected")]
    ValidationRejected,
    #[serde(rename = "agent.started")]
    AgentStarted,
    #[serde(rename = "agent.stopped")]
    AgentStopped,
    #[serde(rename = "agent.error")]
    AgentError,
    #[serde(rename = "agent.task_completed")]
    AgentTaskCompleted,
    #[serde(rename = "signal.detected")]
    SignalDetected,
    #[serde(rename = "signal.processed")]
    SignalProcessed,
    #[serde(rename = "signal.clustered")]
    SignalClustered,
    #[serde(rename = "system.health_check")]
    SystemHealthCheck,
    #[serde(rename = "system.error")]
    SystemError,
    #[serde(rename = "system.maintenance")]
    SystemMaintenance,
}

impl EventType {
    /// Every event type in the catalog, in declaration order
    pub const ALL: [EventType; 20] = [
        EventType::OpportunityCreated,
        EventType::OpportunityUpdated,
        EventType::OpportunityDeleted,
        EventType::OpportunityValidated,
        EventType::UserRegistered,
        EventType::UserProfileUpdated,
        EventType::UserReputationChanged,
        EventType::ValidationSubmitted,
        EventType::ValidationApproved,
        EventType::ValidationRejected,
        EventType::AgentStarted,
        EventType::AgentStopped,
        EventType::AgentError,
        EventType::AgentTaskCompleted,
        EventType::SignalDetected,
        EventType::SignalProcessed,
        EventType::SignalClustered,
        EventType::SystemHealthCheck,
        EventType::SystemError,
        EventType::SystemMaintenance,
    ];

    /// Dotted string form used on the wire and in store indexes
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::OpportunityCreated => "opportunity.created",
            EventType::OpportunityUpdated => "opportunity.updated",
            EventType::OpportunityDeleted => "opportunity.deleted",
            EventType::OpportunityValidated => "opportunity.validated",
            EventType::UserRegistered => "user.registered",
            EventType::UserProfileUpdated => "user.profile_updated",
            EventType::UserReputationChanged => "user.reputation_changed",
            EventType::ValidationSubmitted => "validation.submitted",
            EventType::ValidationApproved => "validation.approved",
            EventType::ValidationRejected => "validation.rejected",
            EventType::AgentStarted => "agent.started",
            EventType::AgentStopped => "agent.stopped",
            EventType::AgentError => "agent.error",
            EventType::AgentTaskCompleted => "agent.task_completed",
            EventType::SignalDetected => "signal.detected",
            EventType::SignalProcessed => "signal.processed",
            EventType::SignalClustered => "signal.clustered",
            EventType::SystemHealthCheck => "system.health_check",
            EventType::SystemError => "system.error",
            EventType::SystemMaintenance => "system.maintenance",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown event type: {s}"))
    }
}

/// Standard event envelope carried by both bus backends and the event store
///
/// # Examples
///
/// ```rust
/// use event_bus::{EventEnvelope, EventType};
/// use serde_json::json;
///
/// let event = EventEnvelope::new(
///     EventType::OpportunityCreated,
///     json!({"opportunity_id": "opp-123", "title": "Community garden"}),
///     "opportunity-service",
/// )
/// .with_correlation_id("corr-456".to_string())
/// .with_aggregate("opp-123", "opportunity", 1);
///
/// assert_eq!(event.version(), "1.0");
/// assert_eq!(event.aggregate_version(), Some(1));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event identifier (idempotency key)
    pub id: Uuid,

    /// Domain event tag
    pub event_type: EventType,

    /// Event-specific data, schema governed by `(event_type, metadata.version)`
    pub payload: Value,

    /// UTC timestamp set once at creation; the replay ordering key
    pub timestamp: DateTime<Utc>,

    /// Component that produced the event
    pub source: String,

    /// Links related events in a causal chain
    pub correlation_id: String,

    /// Open metadata map: `version`, optional aggregate linkage,
    /// `causation_id`, `command_id`, replay bookkeeping
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl EventEnvelope {
    /// Create a new envelope with a fresh id, UTC timestamp, fresh
    /// correlation id, and `metadata.version = "1.0"`
    pub fn new(event_type: EventType, payload: Value, source: impl Into<String>) -> Self {
        let mut metadata = Map::new();
        metadata.insert(
            "version".to_string(),
            Value::String(DEFAULT_EVENT_VERSION.to_string()),
        );

        Self {
            id: Uuid::new_v4(),
            event_type,
            payload,
            timestamp: Utc::now(),
            source: source.into(),
            correlation_id: Uuid::new_v4().to_string(),
            metadata,
        }
    }

    /// Set the correlation id
    pub fn with_correlation_id(mut self, correlation_id: String) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// Set the payload schema version in metadata
    pub fn with_version(mut self, version: &str) -> Self {
        self.metadata
            .insert("version".to_string(), Value::String(version.to_string()));
        self
    }

    /// Attach aggregate linkage for the event-sourcing layer
    pub fn with_aggregate(
        mut self,
        aggregate_id: &str,
        aggregate_type: &str,
        version: i64,
    ) -> Self {
        self.metadata.insert(
            "aggregate_id".to_string(),
            Value::String(aggregate_id.to_string()),
        );
        self.metadata.insert(
            "aggregate_type".to_string(),
            Value::String(aggregate_type.to_string()),
        );
        self.metadata
            .insert("aggregate_version".to_string(), Value::from(version));
        self
    }

    /// Set the causation id (the event/command that caused this one)
    pub fn with_causation_id(mut self, causation_id: String) -> Self {
        self.metadata
            .insert("causation_id".to_string(), Value::String(causation_id));
        self
    }

    /// Merge caller-supplied metadata entries into the envelope
    ///
    /// Existing keys are overwritten by the supplied map. `version` is
    /// restored to the default if the caller's map removes it.
    pub fn with_metadata(mut self, extra: Map<String, Value>) -> Self {
        for (k, v) in extra {
            self.metadata.insert(k, v);
        }
        if !self.metadata.contains_key("version") {
            self.metadata.insert(
                "version".to_string(),
                Value::String(DEFAULT_EVENT_VERSION.to_string()),
            );
        }
        self
    }

    /// Payload schema version ("1.0" when absent)
    pub fn version(&self) -> &str {
        self.metadata
            .get("version")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_EVENT_VERSION)
    }

    /// Aggregate id, when the event carries aggregate linkage
    pub fn aggregate_id(&self) -> Option<&str> {
        self.metadata.get("aggregate_id").and_then(|v| v.as_str())
    }

    /// Aggregate type, when the event carries aggregate linkage
    pub fn aggregate_type(&self) -> Option<&str> {
        self.metadata.get("aggregate_type").and_then(|v| v.as_str())
    }

    /// Aggregate version, when the event carries aggregate linkage
    pub fn aggregate_version(&self) -> Option<i64> {
        self.metadata
            .get("aggregate_version")
            .and_then(|v| v.as_i64())
    }

    /// True once a migrator has rewritten this envelope on a read path
    pub fn migration_applied(&self) -> bool {
        self.metadata
            .get("migration_applied")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Serialize to the JSON wire format
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from the JSON wire format
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Validate a raw JSON envelope before accepting it from an external producer
///
/// # Validation Rules
///
/// - `id`: must be a valid UUID string
/// - `event_type`: must be in the catalog
/// - `timestamp`: must parse as RFC 3339
/// - `source`: must be non-empty
/// - `correlation_id`: must be non-empty
///
/// # Errors
///
/// Returns a descriptive error string if validation fails
pub fn validate_envelope_fields(envelope: &Value) -> Result<(), String> {
    let id = envelope
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or("Missing or invalid id")?;
    Uuid::parse_str(id).map_err(|_| format!("id is not a valid UUID: {id}"))?;

    let event_type = envelope
        .get("event_type")
        .and_then(|v| v.as_str())
        .ok_or("Missing or invalid event_type")?;
    EventType::from_str(event_type)?;

    let timestamp = envelope
        .get("timestamp")
        .and_then(|v| v.as_str())
        .ok_or("Missing or invalid timestamp")?;
    DateTime::parse_from_rfc3339(timestamp)
        .map_err(|_| format!("timestamp is not RFC 3339: {timestamp}"))?;

    let source = envelope
        .get("source")
        .and_then(|v| v.as_str())
        .ok_or("Missing or invalid source")?;
    if source.is_empty() {
        return Err("source cannot be empty".to_string());
    }

    let correlation_id = envelope
        .get("correlation_id")
        .and_then(|v| v.as_str())
        .ok_or("Missing or invalid correlation_id")?;
    if correlation_id.is_empty() {
        return Err("correlation_id cannot be empty".to_string());
    }

    Ok(())
}
