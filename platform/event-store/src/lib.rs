//! # Event Sourcing Layer
//!
//! Durable, immutable event history independent of the pub/sub transport.
//! Every bus event is persisted with optional aggregate linkage; readers
//! get history by aggregate, by type and time range, or by correlation id,
//! with registered schema migrators applied transparently on every read
//! path. Snapshots bound aggregate rebuild cost, and long replays resume
//! from durable checkpoints.
//!
//! ## Pieces
//!
//! - [`EventStoreBackend`]: the storage access pattern (in-memory for
//!   dev/test, Postgres for production)
//! - [`MigratorRegistry`] / [`EventMigrator`]: pure version-N → N+1 payload
//!   transforms, chained in registration order
//! - [`EventSourcingService`]: migrated reads, snapshots, aggregate
//!   rebuild, checkpointed replay, audit trail
//! - [`AuditHandler`]: the bus subscriber that persists every event
//!
//! ## Usage
//!
//! ```rust,no_run
//! use event_store::{EventSourcingService, InMemoryEventStore, RebuildOptions};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = Arc::new(InMemoryEventStore::new());
//! let service = EventSourcingService::new(backend);
//!
//! let state = service
//!     .rebuild_aggregate("opp-123", RebuildOptions::default(), |seed, events| {
//!         // fold events over the snapshot seed
//!         serde_json::json!({"events_applied": events.len(), "seed": seed})
//!     })
//!     .await?;
//! println!("{state:?}");
//! # Ok(())
//! # }
//! ```

mod audit;
mod backend;
mod migration;
mod models;
mod postgres;
mod service;

pub use audit::AuditHandler;
pub use backend::{EventStoreBackend, InMemoryEventStore};
pub use migration::{migrated_envelope, EventMigrator, MigrationError, MigratorRegistry};
pub use models::{AuditQuery, EventCheckpoint, EventSnapshot, RebuildOptions, ReplaySummary};
pub use postgres::PostgresEventStore;
pub use service::EventSourcingService;

use uuid::Uuid;

/// Errors surfaced by the event sourcing layer
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// A migrator failed (or collided at registration); distinguishable
    /// from "no migration needed", which is simply a pass-through read.
    #[error(transparent)]
    Migration(#[from] MigrationError),

    /// A replay handler failed. The replay run is aborted; progress up to
    /// the last checkpoint is preserved, not rolled back.
    #[error("replay aborted at event {event_id}: {reason}")]
    Replay { event_id: Uuid, reason: String },
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Storage(e.to_string())
    }
}

/// Result type for event store operations
pub type StoreResult<T> = Result<T, StoreError>;
