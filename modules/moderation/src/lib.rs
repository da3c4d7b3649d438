//! # Moderation Module
//!
//! Fraud detection and moderation for validation submissions.
//!
//! A submitted validation runs through a set of stateless fraud analyzers;
//! the combined findings drive an auto-approve / auto-reject / human-review
//! routing decision. Items that need a human land in a priority queue with
//! an assignment/decision state machine and an appeal workflow.
//!
//! The validation records themselves live in the platform's relational
//! layer; this module only references them through the
//! [`ValidationGateway`] interface and never owns them.

pub mod analyzers;
mod config;
mod fraud;
mod gateway;
mod handlers;
mod models;
mod service;

pub use analyzers::{default_analyzers, FraudAnalyzer};
pub use config::FraudThresholds;
pub use fraud::{FraudDetectionService, FraudStats};
pub use gateway::{
    GatewayAction, PriorValidation, RecordingGateway, ReputationEvent, ValidationContext,
    ValidationGateway, ValidationRecord,
};
pub use handlers::{
    ValidationContextSource, ValidationSubmittedHandler, ValidationSubmittedPayload,
};
pub use models::{
    AppealStatus, FraudDetectionResult, FraudSeverity, FraudType, ModerationAction,
    ModerationAppeal, ModerationItem, ModerationStatus,
};
pub use service::{ModerationService, ModerationStats};

/// Errors surfaced by the moderation workflow
#[derive(Debug, thiserror::Error)]
pub enum ModerationError {
    /// An assignment/decision/appeal was attempted on an item not in the
    /// expected state. Rejected with no state change.
    #[error("moderation conflict for validation {validation_id}: {reason}")]
    Conflict {
        validation_id: String,
        reason: String,
    },

    #[error("no moderation item for validation {0}")]
    NotFound(String),

    #[error("validation gateway error: {0}")]
    Gateway(String),
}

/// Result type for moderation operations
pub type ModerationResult<T> = Result<T, ModerationError>;
