//! Validation inputs and the relational-layer gateway
//!
//! The analyzers see a validation plus limited historical context for its
//! author; both are plain data assembled by the caller. Executing
//! moderation actions against the actual validation/user records happens
//! through [`ValidationGateway`], the interface to the relational layer
//! this module references but never owns.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use crate::{ModerationError, ModerationResult};

/// A validation submission as the analyzers see it
#[derive(Debug, Clone)]
pub struct ValidationRecord {
    pub validation_id: String,
    pub opportunity_id: String,
    pub user_id: String,
    /// Domain category of the validation (e.g. "market_demand")
    pub validation_type: String,
    pub score: f64,
    /// Self-reported confidence, 0–5 scale
    pub confidence: f64,
    pub comment: String,
    pub evidence_links: Vec<String>,
    pub helpful_votes: u32,
    pub unhelpful_votes: u32,
    /// Claimed expertise relevance, 0–10 scale
    pub expertise_relevance: f64,
    pub submitted_at: DateTime<Utc>,
}

/// One of the author's earlier validations
#[derive(Debug, Clone)]
pub struct PriorValidation {
    pub validation_type: String,
    pub comment: String,
    pub helpful_votes: u32,
    pub unhelpful_votes: u32,
    pub submitted_at: DateTime<Utc>,
}

/// A reputation point accrual event
#[derive(Debug, Clone)]
pub struct ReputationEvent {
    pub points: f64,
    pub occurred_at: DateTime<Utc>,
}

/// Limited historical context for the submitting user
///
/// Assembled by the caller from the relational layer; analyzers only read
/// it.
#[derive(Debug, Clone, Default)]
pub struct ValidationContext {
    /// The user's recent validations, most recent first
    pub recent_validations: Vec<PriorValidation>,
    /// Reputation accruals over the trailing seven days
    pub reputation_events: Vec<ReputationEvent>,
    /// The user's lifetime validation count
    pub total_validations: u64,
}

impl ValidationContext {
    /// Validations the user submitted in the hour before `now`
    pub fn validations_in_trailing_hour(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::hours(1);
        self.recent_validations
            .iter()
            .filter(|v| v.submitted_at > cutoff && v.submitted_at <= now)
            .count()
    }

    /// Total reputation points accrued in the trailing seven days of `now`
    pub fn reputation_points_in_trailing_week(&self, now: DateTime<Utc>) -> f64 {
        let cutoff = now - Duration::days(7);
        self.reputation_events
            .iter()
            .filter(|e| e.occurred_at > cutoff && e.occurred_at <= now)
            .map(|e| e.points)
            .sum()
    }
}

/// Interface to the relational layer that owns validations and users
///
/// Every moderation action resolves to one of these calls. Implementations
/// live with the excluded persistence layer; [`RecordingGateway`] stands in
/// for tests.
#[async_trait]
pub trait ValidationGateway: Send + Sync {
    async fn mark_reviewed(&self, validation_id: &str) -> ModerationResult<()>;
    async fn hide_validation(&self, validation_id: &str) -> ModerationResult<()>;
    async fn unhide_validation(&self, validation_id: &str) -> ModerationResult<()>;
    async fn flag_validation(&self, validation_id: &str) -> ModerationResult<()>;
    async fn unflag_validation(&self, validation_id: &str) -> ModerationResult<()>;
    async fn delete_validation(&self, validation_id: &str) -> ModerationResult<()>;
    async fn suspend_user(&self, user_id: &str) -> ModerationResult<()>;
    async fn reinstate_user(&self, user_id: &str) -> ModerationResult<()>;
    async fn warn_user(&self, user_id: &str) -> ModerationResult<()>;
    async fn reduce_influence(&self, user_id: &str) -> ModerationResult<()>;
    async fn restore_influence(&self, user_id: &str) -> ModerationResult<()>;
    async fn require_verification(&self, user_id: &str) -> ModerationResult<()>;
}

/// Gateway call, as recorded by [`RecordingGateway`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayAction {
    MarkReviewed(String),
    Hide(String),
    Unhide(String),
    Flag(String),
    Unflag(String),
    Delete(String),
    Suspend(String),
    Reinstate(String),
    Warn(String),
    ReduceInfluence(String),
    RestoreInfluence(String),
    RequireVerification(String),
}

/// Test double that records every action it is asked to execute
#[derive(Default)]
pub struct RecordingGateway {
    actions: Mutex<Vec<GatewayAction>>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn actions(&self) -> Vec<GatewayAction> {
        self.actions.lock().await.clone()
    }

    pub async fn contains(&self, action: &GatewayAction) -> bool {
        self.actions.lock().await.contains(action)
    }

    async fn record(&self, action: GatewayAction) -> ModerationResult<()> {
        self.actions.lock().await.push(action);
        Ok(())
    }
}

#[async_trait]
impl ValidationGateway for RecordingGateway {
    async fn mark_reviewed(&self, validation_id: &str) -> ModerationResult<()> {
        self.record(GatewayAction::MarkReviewed(validation_id.to_string()))
            .await
    }
    async fn hide_validation(&self, validation_id: &str) -> ModerationResult<()> {
        self.record(GatewayAction::Hide(validation_id.to_string()))
            .await
    }
    async fn unhide_validation(&self, validation_id: &str) -> ModerationResult<()> {
        self.record(GatewayAction::Unhide(validation_id.to_string()))
            .await
    }
    async fn flag_validation(&self, validation_id: &str) -> ModerationResult<()> {
        self.record(GatewayAction::Flag(validation_id.to_string()))
            .await
    }
    async fn unflag_validation(&self, validation_id: &str) -> ModerationResult<()> {
        self.record(GatewayAction::Unflag(validation_id.to_string()))
            .await
    }
    async fn delete_validation(&self, validation_id: &str) -> ModerationResult<()> {
        self.record(GatewayAction::Delete(validation_id.to_string()))
            .await
    }
    async fn suspend_user(&self, user_id: &str) -> ModerationResult<()> {
        self.record(GatewayAction::Suspend(user_id.to_string())).await
    }
    async fn reinstate_user(&self, user_id: &str) -> ModerationResult<()> {
        self.record(GatewayAction::Reinstate(user_id.to_string()))
            .await
    }
    async fn warn_user(&self, user_id: &str) -> ModerationResult<()> {
        self.record(GatewayAction::Warn(user_id.to_string())).await
    }
    async fn reduce_influence(&self, user_id: &str) -> ModerationResult<()> {
        self.record(GatewayAction::ReduceInfluence(user_id.to_string()))
            .await
    }
    async fn restore_influence(&self, user_id: &str) -> ModerationResult<()> {
        self.record(GatewayAction::RestoreInfluence(user_id.to_string()))
            .await
    }
    async fn require_verification(&self, user_id: &str) -> ModerationResult<()> {
        self.record(GatewayAction::RequireVerification(user_id.to_string()))
            .await
    }
}

/// A gateway error with context, for implementations over the wire
impl ModerationError {
    pub fn gateway(reason: impl Into<String>) -> Self {
        ModerationError::Gateway(reason.into())
    }
}
