//! Postgres implementation of the storage backend
//!
//! Runtime-checked sqlx queries over three tables:
//!
//! - `events`: append-only envelope rows with denormalized aggregate
//!   linkage, indexed by (event_type, occurred_at), (aggregate_id,
//!   aggregate_version), and correlation_id
//! - `event_snapshots`: unique per (aggregate_id, version), upserted
//!   last-write-wins
//! - `event_checkpoints`: unique per name

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_bus::{EventEnvelope, EventType};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::backend::EventStoreBackend;
use crate::models::{EventCheckpoint, EventSnapshot};
use crate::{StoreError, StoreResult};

/// Schema applied by [`PostgresEventStore::ensure_schema`]
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    id UUID PRIMARY KEY,
    event_type TEXT NOT NULL,
    payload JSONB NOT NULL,
    occurred_at TIMESTAMPTZ NOT NULL,
    source TEXT NOT NULL,
    correlation_id TEXT NOT NULL,
    metadata JSONB NOT NULL,
    aggregate_id TEXT,
    aggregate_type TEXT,
    aggregate_version BIGINT
);
CREATE INDEX IF NOT EXISTS idx_events_type_time ON events (event_type, occurred_at);
CREATE INDEX IF NOT EXISTS idx_events_aggregate ON events (aggregate_id, aggregate_version);
CREATE INDEX IF NOT EXISTS idx_events_correlation ON events (correlation_id);

CREATE TABLE IF NOT EXISTS event_snapshots (
    aggregate_id TEXT NOT NULL,
    aggregate_type TEXT NOT NULL,
    version BIGINT NOT NULL,
    occurred_at TIMESTAMPTZ NOT NULL,
    data JSONB NOT NULL,
    metadata JSONB NOT NULL,
    PRIMARY KEY (aggregate_id, version)
);

CREATE TABLE IF NOT EXISTS event_checkpoints (
    name TEXT PRIMARY KEY,
    occurred_at TIMESTAMPTZ NOT NULL,
    last_event_id UUID NOT NULL,
    event_count BIGINT NOT NULL
);
"#;

/// Production event store backed by Postgres
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    /// Wrap an existing connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the tables and indexes if they do not exist
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        for statement in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    event_type: String,
    payload: Value,
    occurred_at: DateTime<Utc>,
    source: String,
    correlation_id: String,
    metadata: Value,
}

impl EventRow {
    fn into_envelope(self) -> StoreResult<EventEnvelope> {
        let event_type: EventType = self
            .event_type
            .parse()
            .map_err(|e: String| StoreError::Storage(e))?;
        let metadata = match self.metadata {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Ok(EventEnvelope {
            id: self.id,
            event_type,
            payload: self.payload,
            timestamp: self.occurred_at,
            source: self.source,
            correlation_id: self.correlation_id,
            metadata,
        })
    }
}

fn rows_to_envelopes(rows: Vec<EventRow>) -> StoreResult<Vec<EventEnvelope>> {
    rows.into_iter().map(EventRow::into_envelope).collect()
}

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    aggregate_id: String,
    aggregate_type: String,
    version: i64,
    occurred_at: DateTime<Utc>,
    data: Value,
    metadata: Value,
}

impl SnapshotRow {
    fn into_snapshot(self) -> EventSnapshot {
        let metadata = match self.metadata {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        EventSnapshot {
            aggregate_id: self.aggregate_id,
            aggregate_type: self.aggregate_type,
            version: self.version,
            timestamp: self.occurred_at,
            data: self.data,
            metadata,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CheckpointRow {
    name: String,
    occurred_at: DateTime<Utc>,
    last_event_id: Uuid,
    event_count: i64,
}

#[async_trait]
impl EventStoreBackend for PostgresEventStore {
    async fn append(&self, event: &EventEnvelope) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO events
                (id, event_type, payload, occurred_at, source, correlation_id,
                 metadata, aggregate_id, aggregate_type, aggregate_version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(event.id)
        .bind(event.event_type.as_str())
        .bind(&event.payload)
        .bind(event.timestamp)
        .bind(&event.source)
        .bind(&event.correlation_id)
        .bind(Value::Object(event.metadata.clone()))
        .bind(event.aggregate_id())
        .bind(event.aggregate_type())
        .bind(event.aggregate_version())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn events_for_aggregate(
        &self,
        aggregate_id: &str,
        after_version: Option<i64>,
        up_to_version: Option<i64>,
    ) -> StoreResult<Vec<EventEnvelope>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT id, event_type, payload, occurred_at, source, correlation_id, metadata
            FROM events
            WHERE aggregate_id = $1
              AND ($2::bigint IS NULL OR aggregate_version > $2)
              AND ($3::bigint IS NULL OR aggregate_version <= $3)
            ORDER BY aggregate_version ASC
            "#,
        )
        .bind(aggregate_id)
        .bind(after_version)
        .bind(up_to_version)
        .fetch_all(&self.pool)
        .await?;

        rows_to_envelopes(rows)
    }

    async fn events_by_type(
        &self,
        event_type: EventType,
        from: DateTime<Utc>,
        to: Option<DateTime<Utc>>,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<EventEnvelope>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT id, event_type, payload, occurred_at, source, correlation_id, metadata
            FROM events
            WHERE event_type = $1
              AND occurred_at >= $2
              AND ($3::timestamptz IS NULL OR occurred_at <= $3)
            ORDER BY occurred_at ASC
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(event_type.as_str())
        .bind(from)
        .bind(to)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        rows_to_envelopes(rows)
    }

    async fn events_by_correlation(
        &self,
        correlation_id: &str,
    ) -> StoreResult<Vec<EventEnvelope>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT id, event_type, payload, occurred_at, source, correlation_id, metadata
            FROM events
            WHERE correlation_id = $1
            ORDER BY occurred_at ASC
            "#,
        )
        .bind(correlation_id)
        .fetch_all(&self.pool)
        .await?;

        rows_to_envelopes(rows)
    }

    async fn events_in_range(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<EventEnvelope>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT id, event_type, payload, occurred_at, source, correlation_id, metadata
            FROM events
            WHERE ($1::timestamptz IS NULL OR occurred_at >= $1)
              AND ($2::timestamptz IS NULL OR occurred_at <= $2)
            ORDER BY occurred_at ASC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(from)
        .bind(to)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        rows_to_envelopes(rows)
    }

    async fn upsert_snapshot(&self, snapshot: &EventSnapshot) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO event_snapshots
                (aggregate_id, aggregate_type, version, occurred_at, data, metadata)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (aggregate_id, version) DO UPDATE
            SET aggregate_type = EXCLUDED.aggregate_type,
                occurred_at = EXCLUDED.occurred_at,
                data = EXCLUDED.data,
                metadata = EXCLUDED.metadata
            "#,
        )
        .bind(&snapshot.aggregate_id)
        .bind(&snapshot.aggregate_type)
        .bind(snapshot.version)
        .bind(snapshot.timestamp)
        .bind(&snapshot.data)
        .bind(Value::Object(snapshot.metadata.clone()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn latest_snapshot(
        &self,
        aggregate_id: &str,
        max_version: Option<i64>,
    ) -> StoreResult<Option<EventSnapshot>> {
        let row = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT aggregate_id, aggregate_type, version, occurred_at, data, metadata
            FROM event_snapshots
            WHERE aggregate_id = $1
              AND ($2::bigint IS NULL OR version <= $2)
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .bind(aggregate_id)
        .bind(max_version)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(SnapshotRow::into_snapshot))
    }

    async fn save_checkpoint(&self, checkpoint: &EventCheckpoint) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO event_checkpoints (name, occurred_at, last_event_id, event_count)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (name) DO UPDATE
            SET occurred_at = EXCLUDED.occurred_at,
                last_event_id = EXCLUDED.last_event_id,
                event_count = EXCLUDED.event_count
            "#,
        )
        .bind(&checkpoint.name)
        .bind(checkpoint.timestamp)
        .bind(checkpoint.last_event_id)
        .bind(checkpoint.event_count as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_checkpoint(&self, name: &str) -> StoreResult<Option<EventCheckpoint>> {
        let row = sqlx::query_as::<_, CheckpointRow>(
            r#"
            SELECT name, occurred_at, last_event_id, event_count
            FROM event_checkpoints
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| EventCheckpoint {
            name: r.name,
            timestamp: r.occurred_at,
            last_event_id: r.last_event_id,
            event_count: r.event_count as u64,
        }))
    }

    async fn event_counts(&self) -> StoreResult<HashMap<String, u64>> {
        #[derive(sqlx::FromRow)]
        struct CountRow {
            event_type: String,
            count: i64,
        }

        let rows = sqlx::query_as::<_, CountRow>(
            r#"
            SELECT event_type, COUNT(*) AS count
            FROM events
            GROUP BY event_type
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| (r.event_type, r.count as u64))
            .collect())
    }
}
