//! Storage backend trait and the in-memory implementation
//!
//! The trait captures the store's access patterns (append-only events
//! indexed three ways, snapshot upsert, checkpoint upsert) without
//! committing to a schema. Production runs on
//! [`crate::PostgresEventStore`]; tests and local development use
//! [`InMemoryEventStore`].

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_bus::{EventEnvelope, EventType};
use tokio::sync::RwLock;

use crate::models::{EventCheckpoint, EventSnapshot};
use crate::StoreResult;

/// Storage access patterns for the event sourcing layer
#[async_trait]
pub trait EventStoreBackend: Send + Sync {
    /// Append one event; idempotent on `event.id`
    async fn append(&self, event: &EventEnvelope) -> StoreResult<()>;

    /// Events linked to an aggregate, ordered by aggregate version
    ///
    /// `after_version` is exclusive (used to skip past a snapshot),
    /// `up_to_version` inclusive.
    async fn events_for_aggregate(
        &self,
        aggregate_id: &str,
        after_version: Option<i64>,
        up_to_version: Option<i64>,
    ) -> StoreResult<Vec<EventEnvelope>>;

    /// Events of one type in a closed time range, ordered by timestamp
    async fn events_by_type(
        &self,
        event_type: EventType,
        from: DateTime<Utc>,
        to: Option<DateTime<Utc>>,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<EventEnvelope>>;

    /// Events sharing a correlation id, ordered by timestamp
    async fn events_by_correlation(&self, correlation_id: &str)
        -> StoreResult<Vec<EventEnvelope>>;

    /// All events in a time range, ordered by timestamp
    async fn events_in_range(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<EventEnvelope>>;

    /// Write a snapshot; same `(aggregate_id, version)` overwrites
    async fn upsert_snapshot(&self, snapshot: &EventSnapshot) -> StoreResult<()>;

    /// Latest snapshot with `version <= max_version` (unbounded when None)
    async fn latest_snapshot(
        &self,
        aggregate_id: &str,
        max_version: Option<i64>,
    ) -> StoreResult<Option<EventSnapshot>>;

    /// Write a checkpoint; same name overwrites
    async fn save_checkpoint(&self, checkpoint: &EventCheckpoint) -> StoreResult<()>;

    /// Load a checkpoint by name
    async fn load_checkpoint(&self, name: &str) -> StoreResult<Option<EventCheckpoint>>;

    /// Stored event counts by type
    async fn event_counts(&self) -> StoreResult<HashMap<String, u64>>;
}

/// In-memory event store for dev/test
///
/// Events are held in append order; indexes are computed per query, which
/// is fine at test scale.
#[derive(Default)]
pub struct InMemoryEventStore {
    events: RwLock<Vec<EventEnvelope>>,
    snapshots: RwLock<HashMap<(String, i64), EventSnapshot>>,
    checkpoints: RwLock<HashMap<String, EventCheckpoint>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStoreBackend for InMemoryEventStore {
    async fn append(&self, event: &EventEnvelope) -> StoreResult<()> {
        let mut events = self.events.write().await;
        if events.iter().any(|e| e.id == event.id) {
            return Ok(());
        }
        events.push(event.clone());
        Ok(())
    }

    async fn events_for_aggregate(
        &self,
        aggregate_id: &str,
        after_version: Option<i64>,
        up_to_version: Option<i64>,
    ) -> StoreResult<Vec<EventEnvelope>> {
        let events = self.events.read().await;
        let mut matching: Vec<EventEnvelope> = events
            .iter()
            .filter(|e| e.aggregate_id() == Some(aggregate_id))
            .filter(|e| {
                let version = e.aggregate_version().unwrap_or(0);
                after_version.map_or(true, |after| version > after)
                    && up_to_version.map_or(true, |up_to| version <= up_to)
            })
            .cloned()
            .collect();
        matching.sort_by_key(|e| e.aggregate_version().unwrap_or(0));
        Ok(matching)
    }

    async fn events_by_type(
        &self,
        event_type: EventType,
        from: DateTime<Utc>,
        to: Option<DateTime<Utc>>,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<EventEnvelope>> {
        let events = self.events.read().await;
        let mut matching: Vec<EventEnvelope> = events
            .iter()
            .filter(|e| e.event_type == event_type)
            .filter(|e| e.timestamp >= from)
            .filter(|e| to.map_or(true, |to| e.timestamp <= to))
            .cloned()
            .collect();
        matching.sort_by_key(|e| e.timestamp);
        Ok(matching.into_iter().skip(offset).take(limit).collect())
    }

    async fn events_by_correlation(
        &self,
        correlation_id: &str,
    ) -> StoreResult<Vec<EventEnvelope>> {
        let events = self.events.read().await;
        let mut matching: Vec<EventEnvelope> = events
            .iter()
            .filter(|e| e.correlation_id == correlation_id)
            .cloned()
            .collect();
        matching.sort_by_key(|e| e.timestamp);
        Ok(matching)
    }

    async fn events_in_range(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<EventEnvelope>> {
        let events = self.events.read().await;
        let mut matching: Vec<EventEnvelope> = events
            .iter()
            .filter(|e| from.map_or(true, |from| e.timestamp >= from))
            .filter(|e| to.map_or(true, |to| e.timestamp <= to))
            .cloned()
            .collect();
        matching.sort_by_key(|e| e.timestamp);
        Ok(matching.into_iter().skip(offset).take(limit).collect())
    }

    async fn upsert_snapshot(&self, snapshot: &EventSnapshot) -> StoreResult<()> {
        self.snapshots.write().await.insert(
            (snapshot.aggregate_id.clone(), snapshot.version),
            snapshot.clone(),
        );
        Ok(())
    }

    async fn latest_snapshot(
        &self,
        aggregate_id: &str,
        max_version: Option<i64>,
    ) -> StoreResult<Option<EventSnapshot>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots
            .values()
            .filter(|s| s.aggregate_id == aggregate_id)
            .filter(|s| max_version.map_or(true, |max| s.version <= max))
            .max_by_key(|s| s.version)
            .cloned())
    }

    async fn save_checkpoint(&self, checkpoint: &EventCheckpoint) -> StoreResult<()> {
        self.checkpoints
            .write()
            .await
            .insert(checkpoint.name.clone(), checkpoint.clone());
        Ok(())
    }

    async fn load_checkpoint(&self, name: &str) -> StoreResult<Option<EventCheckpoint>> {
        Ok(self.checkpoints.read().await.get(name).cloned())
    }

    async fn event_counts(&self) -> StoreResult<HashMap<String, u64>> {
        let events = self.events.read().await;
        let mut counts = HashMap::new();
        for event in events.iter() {
            *counts
                .entry(event.event_type.as_str().to_string())
                .or_insert(0) += 1;
        }
        Ok(counts)
    }
}
