//! Event store record types
//!
//! The stored event itself is the bus [`event_bus::EventEnvelope`]; the
//! store does not re-model it, it indexes it by aggregate linkage, by type
//! and time, and by correlation id. These are the records the store owns
//! outright.

use chrono::{DateTime, Utc};
use event_bus::EventType;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Point-in-time materialized aggregate state
///
/// At most one snapshot exists per `(aggregate_id, version)`; writes are an
/// upsert and same-version writers resolve last-write-wins. Rebuilding an
/// aggregate never needs events older than the latest snapshot at or below
/// the target version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSnapshot {
    pub aggregate_id: String,
    pub aggregate_type: String,
    /// Monotonic per aggregate
    pub version: i64,
    pub timestamp: DateTime<Utc>,
    /// Opaque to the store; the aggregate builder interprets it
    pub data: Value,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl EventSnapshot {
    pub fn new(
        aggregate_id: impl Into<String>,
        aggregate_type: impl Into<String>,
        version: i64,
        data: Value,
    ) -> Self {
        Self {
            aggregate_id: aggregate_id.into(),
            aggregate_type: aggregate_type.into(),
            version,
            timestamp: Utc::now(),
            data,
            metadata: Map::new(),
        }
    }
}

/// Durable replay progress marker, unique per name
///
/// A resumed replay with the same checkpoint name starts from
/// `timestamp` instead of the original lower bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventCheckpoint {
    pub name: String,
    /// Timestamp of the last event covered by this checkpoint
    pub timestamp: DateTime<Utc>,
    pub last_event_id: Uuid,
    /// Cumulative events processed under this name
    pub event_count: u64,
}

/// Combined filter set for audit-trail queries
///
/// All present filters apply conjunctively. `limit` caps the result.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub event_type: Option<EventType>,
    pub aggregate_id: Option<String>,
    pub correlation_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Options for aggregate rebuild
#[derive(Debug, Clone)]
pub struct RebuildOptions {
    /// Seed the fold from the latest applicable snapshot
    pub use_snapshots: bool,
    /// Rebuild state as of this aggregate version (inclusive)
    pub up_to_version: Option<i64>,
}

impl Default for RebuildOptions {
    fn default() -> Self {
        Self {
            use_snapshots: true,
            up_to_version: None,
        }
    }
}

/// Outcome of a completed replay run
#[derive(Debug, Clone, PartialEq)]
pub struct ReplaySummary {
    pub replay_id: Uuid,
    pub events_processed: u64,
    pub checkpoints_written: u64,
}
