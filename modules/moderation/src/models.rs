//! Moderation domain models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// FRAUD DETECTION
// ============================================================================

/// Categories of suspicious behavior the analyzers can flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FraudType {
    Spam,
    FakeExpertise,
    VoteManipulation,
    DuplicateAccounts,
    CoordinatedAbuse,
    LowQualityContent,
    ReputationFarming,
    Sockpuppeting,
}

/// How severe a finding is; drives queue priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FraudSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl FraudSeverity {
    /// Queue priority for items carrying this severity (1–10)
    pub fn priority(&self) -> u8 {
        match self {
            FraudSeverity::Low => 2,
            FraudSeverity::Medium => 5,
            FraudSeverity::High => 8,
            FraudSeverity::Critical => 10,
        }
    }
}

/// Actions a moderator (or the auto-reject path) can execute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationAction {
    FlagForReview,
    HideValidation,
    SuspendUser,
    ReduceInfluence,
    RequireVerification,
    DeleteValidation,
    WarnUser,
    NoAction,
}

impl ModerationAction {
    /// Whether executing this action rejects the validation outright
    pub fn is_rejecting(&self) -> bool {
        matches!(
            self,
            ModerationAction::HideValidation
                | ModerationAction::DeleteValidation
                | ModerationAction::SuspendUser
        )
    }
}

/// One analyzer finding for one validation
///
/// Ephemeral: findings are attached to a [`ModerationItem`], never
/// persisted as their own entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudDetectionResult {
    pub fraud_type: FraudType,
    pub severity: FraudSeverity,
    /// 0.0–1.0
    pub confidence_score: f64,
    /// Human-readable findings backing the flag
    pub evidence: Vec<String>,
    pub recommended_action: ModerationAction,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub detected_at: DateTime<Utc>,
}

impl FraudDetectionResult {
    pub fn new(
        fraud_type: FraudType,
        severity: FraudSeverity,
        confidence_score: f64,
        recommended_action: ModerationAction,
        evidence: Vec<String>,
    ) -> Self {
        Self {
            fraud_type,
            severity,
            confidence_score: confidence_score.clamp(0.0, 1.0),
            evidence,
            recommended_action,
            metadata: Map::new(),
            detected_at: Utc::now(),
        }
    }
}

/// Highest severity across a set of findings
pub(crate) fn max_severity(results: &[FraudDetectionResult]) -> Option<FraudSeverity> {
    results.iter().map(|r| r.severity).max()
}

/// Highest confidence across a set of findings
pub(crate) fn max_confidence(results: &[FraudDetectionResult]) -> f64 {
    results
        .iter()
        .map(|r| r.confidence_score)
        .fold(0.0, f64::max)
}

// ============================================================================
// MODERATION QUEUE
// ============================================================================

/// Lifecycle of a queued validation
///
/// `pending → in_review → {approved | rejected}`; a rejected (or flagged)
/// item may move to `appealed`, and the appeal decision lands it in
/// `resolved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationStatus {
    Pending,
    InReview,
    Approved,
    Rejected,
    Appealed,
    Resolved,
}

/// A validation awaiting (or past) human review
///
/// Invariant: `assigned_moderator.is_some()` exactly when
/// `status == InReview`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationItem {
    pub validation_id: String,
    pub user_id: String,
    pub fraud_results: Vec<FraudDetectionResult>,
    pub status: ModerationStatus,
    /// 1–10, derived from the max finding severity
    pub priority: u8,
    pub assigned_moderator: Option<String>,
    /// True when the decision was made by the routing thresholds, not a
    /// human
    pub automated: bool,
    /// The action executed at decision time; drives appeal reversal
    pub decision_action: Option<ModerationAction>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ModerationItem {
    pub fn new(
        validation_id: impl Into<String>,
        user_id: impl Into<String>,
        fraud_results: Vec<FraudDetectionResult>,
    ) -> Self {
        let priority = max_severity(&fraud_results)
            .map(|s| s.priority())
            .unwrap_or(1);
        let now = Utc::now();
        Self {
            validation_id: validation_id.into(),
            user_id: user_id.into(),
            fraud_results,
            status: ModerationStatus::Pending,
            priority,
            assigned_moderator: None,
            automated: false,
            decision_action: None,
            notes: None,
            created_at: now,
            updated_at: now,
            resolved_at: None,
        }
    }
}

// ============================================================================
// APPEALS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppealStatus {
    Pending,
    UnderReview,
    Approved,
    Denied,
}

/// A user's challenge to a moderation decision
///
/// Created only against an item that was rejected or flagged; an approved
/// appeal reverses the original action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationAppeal {
    pub validation_id: String,
    pub user_id: String,
    pub original_action: ModerationAction,
    pub appeal_reason: String,
    pub status: AppealStatus,
    pub assigned_reviewer: Option<String>,
    pub resolution: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ModerationAppeal {
    pub fn new(
        validation_id: impl Into<String>,
        user_id: impl Into<String>,
        original_action: ModerationAction,
        appeal_reason: impl Into<String>,
    ) -> Self {
        Self {
            validation_id: validation_id.into(),
            user_id: user_id.into(),
            original_action,
            appeal_reason: appeal_reason.into(),
            status: AppealStatus::Pending,
            assigned_reviewer: None,
            resolution: None,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_priorities() {
        assert_eq!(FraudSeverity::Low.priority(), 2);
        assert_eq!(FraudSeverity::Medium.priority(), 5);
        assert_eq!(FraudSeverity::High.priority(), 8);
        assert_eq!(FraudSeverity::Critical.priority(), 10);
        assert!(FraudSeverity::Critical > FraudSeverity::High);
    }

    #[test]
    fn test_item_priority_from_max_severity() {
        let results = vec![
            FraudDetectionResult::new(
                FraudType::Spam,
                FraudSeverity::Medium,
                0.5,
                ModerationAction::FlagForReview,
                vec![],
            ),
            FraudDetectionResult::new(
                FraudType::ReputationFarming,
                FraudSeverity::High,
                0.8,
                ModerationAction::ReduceInfluence,
                vec![],
            ),
        ];
        let item = ModerationItem::new("val-1", "u-1", results);
        assert_eq!(item.priority, 8);
        assert_eq!(item.status, ModerationStatus::Pending);
        assert!(item.assigned_moderator.is_none());
    }

    #[test]
    fn test_rejecting_actions() {
        assert!(ModerationAction::HideValidation.is_rejecting());
        assert!(ModerationAction::DeleteValidation.is_rejecting());
        assert!(ModerationAction::SuspendUser.is_rejecting());
        assert!(!ModerationAction::WarnUser.is_rejecting());
        assert!(!ModerationAction::FlagForReview.is_rejecting());
        assert!(!ModerationAction::NoAction.is_rejecting());
    }

    #[test]
    fn test_confidence_is_clamped() {
        let result = FraudDetectionResult::new(
            FraudType::Spam,
            FraudSeverity::Low,
            1.7,
            ModerationAction::NoAction,
            vec![],
        );
        assert_eq!(result.confidence_score, 1.0);
    }
}
