//! Bus glue
//!
//! Consumes `validation.submitted` events, runs the moderation pipeline,
//! and publishes the automated outcome (`validation.approved` /
//! `validation.rejected`) back onto the bus. Items queued for a human
//! produce no event here; the decision surface emits those when a
//! moderator acts.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_bus::{DomainPublisher, EventBus, EventEnvelope, EventHandler, HandlerError};
use serde::Deserialize;

use crate::gateway::{ValidationContext, ValidationRecord};
use crate::models::ModerationStatus;
use crate::service::ModerationService;
use crate::ModerationResult;

/// Source of the historical context the analyzers need
///
/// Implementations live with the relational layer; tests use a canned one.
#[async_trait]
pub trait ValidationContextSource: Send + Sync {
    async fn load(&self, user_id: &str) -> ModerationResult<ValidationContext>;
}

/// `validation.submitted` payload as published by the platform
#[derive(Debug, Clone, Deserialize)]
pub struct ValidationSubmittedPayload {
    pub validation_id: String,
    pub opportunity_id: String,
    pub user_id: String,
    #[serde(default)]
    pub validation_type: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub evidence_links: Vec<String>,
    #[serde(default)]
    pub helpful_votes: u32,
    #[serde(default)]
    pub unhelpful_votes: u32,
    #[serde(default)]
    pub expertise_relevance: f64,
}

impl ValidationSubmittedPayload {
    fn into_record(self, submitted_at: DateTime<Utc>) -> ValidationRecord {
        ValidationRecord {
            validation_id: self.validation_id,
            opportunity_id: self.opportunity_id,
            user_id: self.user_id,
            validation_type: self.validation_type,
            score: self.score,
            confidence: self.confidence,
            comment: self.comment,
            evidence_links: self.evidence_links,
            helpful_votes: self.helpful_votes,
            unhelpful_votes: self.unhelpful_votes,
            expertise_relevance: self.expertise_relevance,
            submitted_at,
        }
    }
}

/// Bus handler wiring fraud screening into the validation lifecycle
pub struct ValidationSubmittedHandler {
    moderation: Arc<ModerationService>,
    context_source: Arc<dyn ValidationContextSource>,
    publisher: DomainPublisher,
}

impl ValidationSubmittedHandler {
    pub fn new(
        moderation: Arc<ModerationService>,
        context_source: Arc<dyn ValidationContextSource>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            moderation,
            context_source,
            publisher: DomainPublisher::new(bus, "moderation"),
        }
    }
}

#[async_trait]
impl EventHandler for ValidationSubmittedHandler {
    fn name(&self) -> &str {
        "moderation-validation-submitted"
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<(), HandlerError> {
        let payload: ValidationSubmittedPayload =
            serde_json::from_value(event.payload.clone())?;
        let record = payload.into_record(event.timestamp);
        let validation_id = record.validation_id.clone();

        let context = self
            .context_source
            .load(&record.user_id)
            .await
            .map_err(|e| HandlerError::new(format!("context load failed: {e}")))?;

        let outcome = self
            .moderation
            .process_validation(&record, &context)
            .await
            .map_err(|e| HandlerError::new(format!("moderation failed: {e}")))?;

        match outcome {
            None => {
                self.publisher
                    .validation_approved(&validation_id, None, true)
                    .await
                    .map_err(|e| HandlerError::new(e.to_string()))?;
            }
            Some(item) if item.automated && item.status == ModerationStatus::Rejected => {
                let reason = item
                    .fraud_results
                    .iter()
                    .map(|r| format!("{:?}", r.fraud_type))
                    .collect::<Vec<_>>()
                    .join(", ");
                self.publisher
                    .validation_rejected(&validation_id, &reason, true)
                    .await
                    .map_err(|e| HandlerError::new(e.to_string()))?;
            }
            Some(item) => {
                // Queued for a human; the decision surface publishes the
                // outcome later.
                tracing::debug!(
                    validation_id = %validation_id,
                    priority = item.priority,
                    "Validation awaiting human review"
                );
            }
        }

        Ok(())
    }
}
