//! Event schema migration
//!
//! Migrators are pure version-N → N+1 transforms for one event type. The
//! store applies every matching migrator in registration order on each
//! read path, so multi-step upgrades (v1.0 → v1.1 → v2.0) compose by
//! chaining single-step migrators; a migrator must not assume it is the
//! only one applied. Migration never mutates the store; it rewrites the
//! envelope on the way out, keeping `id`, `payload` lineage, and
//! `timestamp` intact while bumping `metadata.version`.

use std::sync::Arc;

use event_bus::{EventEnvelope, EventType};
use serde_json::Value;
use uuid::Uuid;

/// Errors raised by migration
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// Two migrators claimed the same (event_type, from_version). Behavior
    /// would be registration-order dependent, so the registry rejects the
    /// collision outright.
    #[error("duplicate migrator for {event_type} from version {from_version}")]
    DuplicateMigrator {
        event_type: EventType,
        from_version: String,
    },

    /// A migrator failed to transform an event. The read that triggered it
    /// is aborted. Stale data is never silently returned.
    #[error("migration of event {event_id} ({event_type} v{from_version}) failed: {reason}")]
    Failed {
        event_id: Uuid,
        event_type: EventType,
        from_version: String,
        reason: String,
    },
}

/// A pure transform upgrading one event type from one schema version to the
/// next
pub trait EventMigrator: Send + Sync {
    /// Event type this migrator applies to
    fn event_type(&self) -> EventType;

    /// Schema version this migrator consumes
    fn from_version(&self) -> &str;

    /// Schema version this migrator produces
    fn to_version(&self) -> &str;

    /// Whether this migrator applies to the given event
    ///
    /// The default checks type and `metadata.version`; once an event is at
    /// `to_version` this returns false, which is what makes re-running a
    /// migration chain a no-op.
    fn can_migrate(&self, event: &EventEnvelope) -> bool {
        event.event_type == self.event_type() && event.version() == self.from_version()
    }

    /// Transform the event, producing a new envelope at `to_version`
    fn migrate(&self, event: &EventEnvelope) -> Result<EventEnvelope, MigrationError>;
}

/// Build the migrated envelope a [`EventMigrator::migrate`] returns
///
/// Keeps `id`, `timestamp`, `source`, `correlation_id`, and metadata from
/// the original; swaps in the transformed payload, bumps
/// `metadata.version`, and marks `migration_applied`.
pub fn migrated_envelope(
    original: &EventEnvelope,
    payload: Value,
    to_version: &str,
) -> EventEnvelope {
    let mut event = original.clone();
    event.payload = payload;
    event.metadata.insert(
        "version".to_string(),
        Value::String(to_version.to_string()),
    );
    event
        .metadata
        .insert("migration_applied".to_string(), Value::Bool(true));
    event
}

/// Ordered migrator registry with collision rejection
#[derive(Default)]
pub struct MigratorRegistry {
    migrators: Vec<Arc<dyn EventMigrator>>,
}

impl MigratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a migrator
    ///
    /// Registration order is chain order. A second migrator claiming the
    /// same (event_type, from_version) is rejected.
    pub fn register(&mut self, migrator: Arc<dyn EventMigrator>) -> Result<(), MigrationError> {
        let collision = self.migrators.iter().find(|existing| {
            existing.event_type() == migrator.event_type()
                && existing.from_version() == migrator.from_version()
        });
        if collision.is_some() {
            return Err(MigrationError::DuplicateMigrator {
                event_type: migrator.event_type(),
                from_version: migrator.from_version().to_string(),
            });
        }

        tracing::debug!(
            event_type = %migrator.event_type(),
            from_version = migrator.from_version(),
            to_version = migrator.to_version(),
            "Migrator registered"
        );
        self.migrators.push(migrator);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.migrators.is_empty()
    }

    pub fn len(&self) -> usize {
        self.migrators.len()
    }

    /// Apply every matching migrator in registration order
    ///
    /// Events already at their target version pass through untouched.
    pub fn upgrade(&self, event: EventEnvelope) -> Result<EventEnvelope, MigrationError> {
        let mut current = event;
        for migrator in &self.migrators {
            if migrator.can_migrate(&current) {
                let from_version = current.version().to_string();
                current = migrator.migrate(&current)?;
                tracing::debug!(
                    event_id = %current.id,
                    event_type = %current.event_type,
                    from_version = %from_version,
                    to_version = migrator.to_version(),
                    "Event migrated on read"
                );
            }
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// v1.0 → v1.1: split "name" into "title" (keeps the old field)
    struct AddTitleMigrator;

    impl EventMigrator for AddTitleMigrator {
        fn event_type(&self) -> EventType {
            EventType::OpportunityCreated
        }
        fn from_version(&self) -> &str {
            "1.0"
        }
        fn to_version(&self) -> &str {
            "1.1"
        }
        fn migrate(&self, event: &EventEnvelope) -> Result<EventEnvelope, MigrationError> {
            let mut payload = event.payload.clone();
            let title = payload
                .get("name")
                .cloned()
                .unwrap_or(Value::String(String::new()));
            payload["title"] = title;
            Ok(migrated_envelope(event, payload, self.to_version()))
        }
    }

    /// v1.1 → v2.0: nest details under "details"
    struct NestDetailsMigrator;

    impl EventMigrator for NestDetailsMigrator {
        fn event_type(&self) -> EventType {
            EventType::OpportunityCreated
        }
        fn from_version(&self) -> &str {
            "1.1"
        }
        fn to_version(&self) -> &str {
            "2.0"
        }
        fn migrate(&self, event: &EventEnvelope) -> Result<EventEnvelope, MigrationError> {
            let payload = json!({
                "title": event.payload.get("title").cloned().unwrap_or(Value::Null),
                "details": event.payload.clone(),
            });
            Ok(migrated_envelope(event, payload, self.to_version()))
        }
    }

    struct FailingMigrator;

    impl EventMigrator for FailingMigrator {
        fn event_type(&self) -> EventType {
            EventType::UserRegistered
        }
        fn from_version(&self) -> &str {
            "1.0"
        }
        fn to_version(&self) -> &str {
            "2.0"
        }
        fn migrate(&self, event: &EventEnvelope) -> Result<EventEnvelope, MigrationError> {
            Err(MigrationError::Failed {
                event_id: event.id,
                event_type: event.event_type,
                from_version: self.from_version().to_string(),
                reason: "unmappable payload".to_string(),
            })
        }
    }

    fn v1_event() -> EventEnvelope {
        EventEnvelope::new(
            EventType::OpportunityCreated,
            json!({"name": "Community garden"}),
            "test",
        )
    }

    #[test]
    fn test_chain_applies_in_registration_order() {
        let mut registry = MigratorRegistry::new();
        registry.register(Arc::new(AddTitleMigrator)).unwrap();
        registry.register(Arc::new(NestDetailsMigrator)).unwrap();

        let original = v1_event();
        let migrated = registry.upgrade(original.clone()).unwrap();

        assert_eq!(migrated.version(), "2.0");
        assert_eq!(migrated.payload["title"], "Community garden");
        assert!(migrated.migration_applied());
        // Identity and timestamp survive migration
        assert_eq!(migrated.id, original.id);
        assert_eq!(migrated.timestamp, original.timestamp);
    }

    #[test]
    fn test_migration_is_idempotent_at_final_version() {
        let mut registry = MigratorRegistry::new();
        registry.register(Arc::new(AddTitleMigrator)).unwrap();
        registry.register(Arc::new(NestDetailsMigrator)).unwrap();

        let once = registry.upgrade(v1_event()).unwrap();
        let twice = registry.upgrade(once.clone()).unwrap();

        assert_eq!(once, twice);
    }

    #[test]
    fn test_registry_rejects_from_version_collision() {
        let mut registry = MigratorRegistry::new();
        registry.register(Arc::new(AddTitleMigrator)).unwrap();

        let err = registry.register(Arc::new(AddTitleMigrator)).unwrap_err();
        assert!(matches!(err, MigrationError::DuplicateMigrator { .. }));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_failed_migration_surfaces_event_id() {
        let mut registry = MigratorRegistry::new();
        registry.register(Arc::new(FailingMigrator)).unwrap();

        let event = EventEnvelope::new(EventType::UserRegistered, json!({}), "test");
        let err = registry.upgrade(event.clone()).unwrap_err();

        match err {
            MigrationError::Failed { event_id, .. } => assert_eq!(event_id, event.id),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_non_matching_event_passes_through() {
        let mut registry = MigratorRegistry::new();
        registry.register(Arc::new(AddTitleMigrator)).unwrap();

        let event = EventEnvelope::new(EventType::SystemError, json!({"x": 1}), "test");
        let upgraded = registry.upgrade(event.clone()).unwrap();
        assert_eq!(upgraded, event);
    }
}
