//! Event sourcing service
//!
//! Ties the storage backend and the migrator registry together: durable
//! append, migrated reads, snapshot management, aggregate rebuild, and
//! checkpointed replay. All read paths apply the registered migrator chain
//! before events reach the caller.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use event_bus::{EventEnvelope, EventHandler, EventType};
use serde_json::Value;
use uuid::Uuid;

use crate::backend::EventStoreBackend;
use crate::migration::{EventMigrator, MigrationError, MigratorRegistry};
use crate::models::{AuditQuery, EventCheckpoint, EventSnapshot, RebuildOptions, ReplaySummary};
use crate::{StoreError, StoreResult};

/// Default cap for unbounded queries
const DEFAULT_QUERY_LIMIT: usize = 1000;

/// Default audit-trail result cap
const DEFAULT_AUDIT_LIMIT: usize = 100;

/// Default replay fetch batch size
const DEFAULT_REPLAY_BATCH: usize = 100;

/// The event sourcing layer's service facade
pub struct EventSourcingService {
    backend: Arc<dyn EventStoreBackend>,
    migrators: MigratorRegistry,
    replay_batch_size: usize,
}

impl EventSourcingService {
    pub fn new(backend: Arc<dyn EventStoreBackend>) -> Self {
        Self {
            backend,
            migrators: MigratorRegistry::new(),
            replay_batch_size: DEFAULT_REPLAY_BATCH,
        }
    }

    /// Override the replay fetch batch size (bounds replay memory)
    pub fn with_replay_batch_size(mut self, batch_size: usize) -> Self {
        self.replay_batch_size = batch_size.max(1);
        self
    }

    /// Register a schema migrator; see [`MigratorRegistry::register`]
    pub fn register_migrator(
        &mut self,
        migrator: Arc<dyn EventMigrator>,
    ) -> Result<(), MigrationError> {
        self.migrators.register(migrator)
    }

    /// Durably persist one event (idempotent on id)
    pub async fn record(&self, event: &EventEnvelope) -> StoreResult<()> {
        self.backend.append(event).await?;
        tracing::debug!(
            event_id = %event.id,
            event_type = %event.event_type,
            aggregate_id = event.aggregate_id().unwrap_or("-"),
            "Event recorded"
        );
        Ok(())
    }

    fn upgrade_all(&self, events: Vec<EventEnvelope>) -> StoreResult<Vec<EventEnvelope>> {
        events
            .into_iter()
            .map(|e| self.migrators.upgrade(e).map_err(StoreError::from))
            .collect()
    }

    /// Event history for an aggregate, ordered by aggregate version,
    /// migrated to current schema versions
    pub async fn aggregate_events(
        &self,
        aggregate_id: &str,
        up_to_version: Option<i64>,
    ) -> StoreResult<Vec<EventEnvelope>> {
        let events = self
            .backend
            .events_for_aggregate(aggregate_id, None, up_to_version)
            .await?;
        self.upgrade_all(events)
    }

    /// Events of one type in a time range, migrated on read
    pub async fn events_by_type(
        &self,
        event_type: EventType,
        from: DateTime<Utc>,
        to: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<EventEnvelope>> {
        let events = self
            .backend
            .events_by_type(event_type, from, to, limit.unwrap_or(DEFAULT_QUERY_LIMIT), 0)
            .await?;
        self.upgrade_all(events)
    }

    /// The causal chain sharing one correlation id, migrated on read
    pub async fn events_by_correlation(
        &self,
        correlation_id: &str,
    ) -> StoreResult<Vec<EventEnvelope>> {
        let events = self.backend.events_by_correlation(correlation_id).await?;
        self.upgrade_all(events)
    }

    /// Audit-trail query combining type, aggregate, correlation, and time
    /// filters conjunctively
    pub async fn audit_trail(&self, query: AuditQuery) -> StoreResult<Vec<EventEnvelope>> {
        let limit = query.limit.unwrap_or(DEFAULT_AUDIT_LIMIT);

        // Fetch by the most selective index, then narrow in memory.
        let candidates = if let Some(correlation_id) = &query.correlation_id {
            self.backend.events_by_correlation(correlation_id).await?
        } else if let Some(aggregate_id) = &query.aggregate_id {
            self.backend
                .events_for_aggregate(aggregate_id, None, None)
                .await?
        } else if let Some(event_type) = query.event_type {
            let from = query.from.unwrap_or(DateTime::<Utc>::MIN_UTC);
            self.backend
                .events_by_type(event_type, from, query.to, limit, 0)
                .await?
        } else {
            self.backend
                .events_in_range(query.from, query.to, limit, 0)
                .await?
        };

        let filtered: Vec<EventEnvelope> = candidates
            .into_iter()
            .filter(|e| query.event_type.map_or(true, |t| e.event_type == t))
            .filter(|e| {
                query
                    .aggregate_id
                    .as_deref()
                    .map_or(true, |id| e.aggregate_id() == Some(id))
            })
            .filter(|e| {
                query
                    .correlation_id
                    .as_deref()
                    .map_or(true, |c| e.correlation_id == c)
            })
            .filter(|e| query.from.map_or(true, |from| e.timestamp >= from))
            .filter(|e| query.to.map_or(true, |to| e.timestamp <= to))
            .take(limit)
            .collect();

        self.upgrade_all(filtered)
    }

    /// Write a snapshot of an aggregate's state at a version
    ///
    /// Same-version writes overwrite (last-write-wins by design).
    pub async fn save_snapshot(
        &self,
        aggregate_id: &str,
        aggregate_type: &str,
        version: i64,
        data: Value,
    ) -> StoreResult<()> {
        let snapshot = EventSnapshot::new(aggregate_id, aggregate_type, version, data);
        self.backend.upsert_snapshot(&snapshot).await?;
        tracing::debug!(
            aggregate_id = %aggregate_id,
            version = version,
            "Snapshot saved"
        );
        Ok(())
    }

    /// Rebuild an aggregate's state from history
    ///
    /// With `use_snapshots`, the latest snapshot at or below the version
    /// ceiling seeds the fold and only newer events are loaded. The
    /// builder receives the optional snapshot data and the (migrated)
    /// events in aggregate-version order.
    ///
    /// Returns `Ok(None)` when the aggregate never existed (no snapshot
    /// and no events), which is distinct from "no changes since snapshot".
    pub async fn rebuild_aggregate<T, F>(
        &self,
        aggregate_id: &str,
        options: RebuildOptions,
        builder: F,
    ) -> StoreResult<Option<T>>
    where
        F: FnOnce(Option<Value>, &[EventEnvelope]) -> T,
    {
        let snapshot = if options.use_snapshots {
            self.backend
                .latest_snapshot(aggregate_id, options.up_to_version)
                .await?
        } else {
            None
        };

        let after_version = snapshot.as_ref().map(|s| s.version);
        let events = self
            .backend
            .events_for_aggregate(aggregate_id, after_version, options.up_to_version)
            .await?;
        let events = self.upgrade_all(events)?;

        if snapshot.is_none() && events.is_empty() {
            return Ok(None);
        }

        let seed = snapshot.map(|s| s.data);
        Ok(Some(builder(seed, &events)))
    }

    /// Controlled replay with durable checkpoints
    ///
    /// For each requested type, events in `[from, to]` are fetched in
    /// batches of the configured size and delivered to the handler with a
    /// fresh `replay_id` injected into their metadata. After each batch a
    /// checkpoint (scoped `{name}:{event_type}`) is persisted; re-running
    /// with the same name resumes from the checkpoint timestamp instead of
    /// `from`. The boundary event may be redelivered; replay is
    /// at-least-once across resumes.
    ///
    /// A handler error aborts the whole run with
    /// [`StoreError::Replay`] naming the offending event; progress up to
    /// the last checkpoint is preserved.
    pub async fn replay(
        &self,
        event_types: &[EventType],
        from: DateTime<Utc>,
        to: Option<DateTime<Utc>>,
        handler: Arc<dyn EventHandler>,
        checkpoint_name: Option<&str>,
    ) -> StoreResult<ReplaySummary> {
        let replay_id = Uuid::new_v4();
        let mut events_processed = 0u64;
        let mut checkpoints_written = 0u64;

        for event_type in event_types {
            let scoped_name = checkpoint_name.map(|name| format!("{name}:{event_type}"));

            let mut start = from;
            let mut cumulative = 0u64;
            if let Some(name) = &scoped_name {
                if let Some(checkpoint) = self.backend.load_checkpoint(name).await? {
                    start = checkpoint.timestamp;
                    cumulative = checkpoint.event_count;
                    tracing::info!(
                        checkpoint = %name,
                        resume_from = %start,
                        already_processed = cumulative,
                        "Resuming replay from checkpoint"
                    );
                }
            }

            let mut offset = 0usize;
            loop {
                let batch = self
                    .backend
                    .events_by_type(*event_type, start, to, self.replay_batch_size, offset)
                    .await?;
                if batch.is_empty() {
                    break;
                }
                offset += batch.len();
                let batch = self.upgrade_all(batch)?;

                for event in &batch {
                    let mut delivery = event.clone();
                    delivery.metadata.insert(
                        "replay_id".to_string(),
                        Value::String(replay_id.to_string()),
                    );
                    delivery.metadata.insert(
                        "replayed_at".to_string(),
                        Value::String(Utc::now().to_rfc3339()),
                    );

                    handler
                        .handle(&delivery)
                        .await
                        .map_err(|e| StoreError::Replay {
                            event_id: event.id,
                            reason: e.to_string(),
                        })?;
                    events_processed += 1;
                    cumulative += 1;
                }

                if let (Some(name), Some(last)) = (&scoped_name, batch.last()) {
                    self.backend
                        .save_checkpoint(&EventCheckpoint {
                            name: name.clone(),
                            timestamp: last.timestamp,
                            last_event_id: last.id,
                            event_count: cumulative,
                        })
                        .await?;
                    checkpoints_written += 1;
                }

                if batch.len() < self.replay_batch_size {
                    break;
                }
            }
        }

        tracing::info!(
            replay_id = %replay_id,
            events_processed = events_processed,
            "Replay completed"
        );
        Ok(ReplaySummary {
            replay_id,
            events_processed,
            checkpoints_written,
        })
    }

    /// Stored event counts by type
    pub async fn event_counts(&self) -> StoreResult<std::collections::HashMap<String, u64>> {
        self.backend.event_counts().await
    }
}
