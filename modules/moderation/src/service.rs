//! Moderation queue and state machine
//!
//! Routing on a new validation: no findings → auto-approve; max finding
//! confidence below the auto-approve threshold → auto-approve; above the
//! auto-reject threshold → auto-reject (hide immediately, recorded as
//! automated); otherwise the item is queued for a human at a priority
//! derived from the max severity.
//!
//! Item lifecycle: `pending → in_review → {approved | rejected}`; a
//! rejected (or flagged) item can be appealed once per decision cycle, and
//! the appeal decision is final (`appealed → resolved`).
//!
//! Concurrency: one `tokio::sync::Mutex` over the whole queue serializes
//! assignment and decision, so two moderators can never claim the same
//! item. The lock is scoped to the queue, not per moderator.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::fraud::{FraudDetectionService, FraudStats};
use crate::gateway::{ValidationContext, ValidationGateway, ValidationRecord};
use crate::models::{
    max_confidence, AppealStatus, ModerationAction, ModerationAppeal, ModerationItem,
    ModerationStatus,
};
use crate::{ModerationError, ModerationResult};

/// Queue depth and fraud-rate counters for dashboards
#[derive(Debug, Clone, Serialize)]
pub struct ModerationStats {
    pub pending: usize,
    pub in_review: usize,
    pub approved: usize,
    pub rejected: usize,
    pub appealed: usize,
    pub resolved: usize,
    pub open_appeals: usize,
    pub fraud: FraudStats,
}

#[derive(Default)]
struct QueueState {
    items: HashMap<String, ModerationItem>,
    appeals: HashMap<String, ModerationAppeal>,
}

/// The moderation workflow service
pub struct ModerationService {
    fraud: FraudDetectionService,
    gateway: Arc<dyn ValidationGateway>,
    queue: Mutex<QueueState>,
}

impl ModerationService {
    pub fn new(fraud: FraudDetectionService, gateway: Arc<dyn ValidationGateway>) -> Self {
        Self {
            fraud,
            gateway,
            queue: Mutex::new(QueueState::default()),
        }
    }

    pub fn fraud_service(&self) -> &FraudDetectionService {
        &self.fraud
    }

    /// Screen a new validation and route it
    ///
    /// Returns `None` when the validation was auto-approved (no findings,
    /// or all findings below the auto-approve threshold) and marked
    /// reviewed; returns the created item otherwise: `Pending` when it
    /// was queued for a human, `Rejected` with `automated = true` when the
    /// auto-reject path already executed the hide.
    pub async fn process_validation(
        &self,
        validation: &ValidationRecord,
        context: &ValidationContext,
    ) -> ModerationResult<Option<ModerationItem>> {
        let results = self.fraud.analyze(validation, context);

        if results.is_empty() {
            self.gateway.mark_reviewed(&validation.validation_id).await?;
            return Ok(None);
        }

        let confidence = max_confidence(&results);
        let thresholds = self.fraud.thresholds();

        if confidence < thresholds.auto_approve_threshold {
            self.gateway.mark_reviewed(&validation.validation_id).await?;
            tracing::info!(
                validation_id = %validation.validation_id,
                confidence = confidence,
                "Low-confidence findings, auto-approved"
            );
            return Ok(None);
        }

        let mut item = ModerationItem::new(
            validation.validation_id.clone(),
            validation.user_id.clone(),
            results,
        );

        if confidence > thresholds.auto_reject_threshold {
            self.gateway
                .hide_validation(&validation.validation_id)
                .await?;
            let now = Utc::now();
            item.status = ModerationStatus::Rejected;
            item.automated = true;
            item.decision_action = Some(ModerationAction::HideValidation);
            item.resolved_at = Some(now);
            item.updated_at = now;
            tracing::warn!(
                validation_id = %validation.validation_id,
                confidence = confidence,
                "High-confidence fraud, auto-rejected"
            );
        } else {
            tracing::info!(
                validation_id = %validation.validation_id,
                priority = item.priority,
                "Validation queued for human review"
            );
        }

        self.queue
            .lock()
            .await
            .items
            .insert(item.validation_id.clone(), item.clone());
        Ok(Some(item))
    }

    /// The next item a moderator should pick up: highest priority first,
    /// oldest first within a priority
    pub async fn next_pending(&self) -> Option<ModerationItem> {
        let queue = self.queue.lock().await;
        queue
            .items
            .values()
            .filter(|item| item.status == ModerationStatus::Pending)
            .max_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| b.created_at.cmp(&a.created_at))
            })
            .cloned()
    }

    /// Look up an item by validation id
    pub async fn item(&self, validation_id: &str) -> Option<ModerationItem> {
        self.queue.lock().await.items.get(validation_id).cloned()
    }

    /// Look up an appeal by validation id
    pub async fn appeal_for(&self, validation_id: &str) -> Option<ModerationAppeal> {
        self.queue.lock().await.appeals.get(validation_id).cloned()
    }

    /// Claim a pending item for a moderator
    ///
    /// Valid only from `pending`; moves the item to `in_review` and records
    /// the moderator. Anything else is a conflict with no state change.
    pub async fn assign(
        &self,
        validation_id: &str,
        moderator: &str,
    ) -> ModerationResult<ModerationItem> {
        let mut queue = self.queue.lock().await;
        let item = queue
            .items
            .get_mut(validation_id)
            .ok_or_else(|| ModerationError::NotFound(validation_id.to_string()))?;

        if item.status != ModerationStatus::Pending {
            return Err(ModerationError::Conflict {
                validation_id: validation_id.to_string(),
                reason: format!("cannot assign item in state {:?}", item.status),
            });
        }

        item.status = ModerationStatus::InReview;
        item.assigned_moderator = Some(moderator.to_string());
        item.updated_at = Utc::now();

        tracing::info!(
            validation_id = %validation_id,
            moderator = %moderator,
            "Moderation item assigned"
        );
        Ok(item.clone())
    }

    /// Execute a moderator's decision
    ///
    /// Only the assigned moderator may decide, and only from `in_review`.
    /// The chosen action runs against the validation through the gateway;
    /// hide/delete/suspend reject the item, anything else approves it. The
    /// assignment slot is released either way.
    pub async fn decide(
        &self,
        validation_id: &str,
        moderator: &str,
        action: ModerationAction,
        notes: Option<String>,
    ) -> ModerationResult<ModerationItem> {
        let mut queue = self.queue.lock().await;
        let item = queue
            .items
            .get_mut(validation_id)
            .ok_or_else(|| ModerationError::NotFound(validation_id.to_string()))?;

        if item.status != ModerationStatus::InReview {
            return Err(ModerationError::Conflict {
                validation_id: validation_id.to_string(),
                reason: format!("cannot decide item in state {:?}", item.status),
            });
        }
        if item.assigned_moderator.as_deref() != Some(moderator) {
            return Err(ModerationError::Conflict {
                validation_id: validation_id.to_string(),
                reason: format!("item is not assigned to {moderator}"),
            });
        }

        let user_id = item.user_id.clone();
        self.execute_action(action, validation_id, &user_id).await?;

        let now = Utc::now();
        if action.is_rejecting() {
            item.status = ModerationStatus::Rejected;
        } else {
            item.status = ModerationStatus::Approved;
            self.gateway.mark_reviewed(validation_id).await?;
        }
        item.decision_action = Some(action);
        item.notes = notes;
        item.assigned_moderator = None;
        item.resolved_at = Some(now);
        item.updated_at = now;

        tracing::info!(
            validation_id = %validation_id,
            moderator = %moderator,
            action = ?action,
            status = ?item.status,
            "Moderation decision executed"
        );
        Ok(item.clone())
    }

    /// File an appeal against a rejection (or a flag)
    ///
    /// Valid only when the item is `rejected`, or `approved` with a
    /// flag-for-review decision. One appeal per decision cycle; re-appeal
    /// after resolution is a new moderation cycle, not handled here.
    pub async fn appeal(
        &self,
        validation_id: &str,
        user_id: &str,
        reason: &str,
    ) -> ModerationResult<ModerationAppeal> {
        let mut queue = self.queue.lock().await;

        if queue.appeals.contains_key(validation_id) {
            return Err(ModerationError::Conflict {
                validation_id: validation_id.to_string(),
                reason: "this decision has already been appealed".to_string(),
            });
        }

        let item = queue
            .items
            .get_mut(validation_id)
            .ok_or_else(|| ModerationError::NotFound(validation_id.to_string()))?;

        let flagged = item.status == ModerationStatus::Approved
            && item.decision_action == Some(ModerationAction::FlagForReview);
        if item.status != ModerationStatus::Rejected && !flagged {
            return Err(ModerationError::Conflict {
                validation_id: validation_id.to_string(),
                reason: format!("cannot appeal item in state {:?}", item.status),
            });
        }

        let original_action = item.decision_action.ok_or_else(|| ModerationError::Conflict {
            validation_id: validation_id.to_string(),
            reason: "item carries no decision to appeal".to_string(),
        })?;

        item.status = ModerationStatus::Appealed;
        item.updated_at = Utc::now();

        let appeal = ModerationAppeal::new(validation_id, user_id, original_action, reason);
        queue
            .appeals
            .insert(validation_id.to_string(), appeal.clone());

        tracing::info!(
            validation_id = %validation_id,
            user_id = %user_id,
            "Appeal filed"
        );
        Ok(appeal)
    }

    /// Claim an appeal for review
    pub async fn assign_appeal(
        &self,
        validation_id: &str,
        reviewer: &str,
    ) -> ModerationResult<ModerationAppeal> {
        let mut queue = self.queue.lock().await;
        let appeal = queue
            .appeals
            .get_mut(validation_id)
            .ok_or_else(|| ModerationError::NotFound(validation_id.to_string()))?;

        if appeal.status != AppealStatus::Pending {
            return Err(ModerationError::Conflict {
                validation_id: validation_id.to_string(),
                reason: format!("cannot assign appeal in state {:?}", appeal.status),
            });
        }

        appeal.status = AppealStatus::UnderReview;
        appeal.assigned_reviewer = Some(reviewer.to_string());
        Ok(appeal.clone())
    }

    /// Decide an appeal; the decision is final
    ///
    /// Approval reverses the original action (un-hides/un-flags, marks the
    /// validation reviewed); denial leaves it standing. Either way the item
    /// moves to `resolved`.
    pub async fn review_appeal(
        &self,
        validation_id: &str,
        reviewer: &str,
        approve: bool,
        resolution: &str,
    ) -> ModerationResult<ModerationAppeal> {
        let mut queue = self.queue.lock().await;

        let appeal = queue
            .appeals
            .get_mut(validation_id)
            .ok_or_else(|| ModerationError::NotFound(validation_id.to_string()))?;
        if !matches!(
            appeal.status,
            AppealStatus::Pending | AppealStatus::UnderReview
        ) {
            return Err(ModerationError::Conflict {
                validation_id: validation_id.to_string(),
                reason: format!("appeal already decided: {:?}", appeal.status),
            });
        }

        let original_action = appeal.original_action;
        let user_id = appeal.user_id.clone();

        if approve {
            self.reverse_action(original_action, validation_id, &user_id)
                .await?;
            self.gateway.mark_reviewed(validation_id).await?;
            appeal.status = AppealStatus::Approved;
        } else {
            appeal.status = AppealStatus::Denied;
        }

        let now = Utc::now();
        appeal.assigned_reviewer = Some(reviewer.to_string());
        appeal.resolution = Some(resolution.to_string());
        appeal.resolved_at = Some(now);
        let appeal = appeal.clone();

        if let Some(item) = queue.items.get_mut(validation_id) {
            item.status = ModerationStatus::Resolved;
            item.resolved_at = Some(now);
            item.updated_at = now;
        }

        tracing::info!(
            validation_id = %validation_id,
            reviewer = %reviewer,
            approved = approve,
            "Appeal decided"
        );
        Ok(appeal)
    }

    /// Queue depth by status plus the trailing fraud rate
    pub async fn stats(&self) -> ModerationStats {
        let queue = self.queue.lock().await;
        let count = |status: ModerationStatus| {
            queue
                .items
                .values()
                .filter(|item| item.status == status)
                .count()
        };

        ModerationStats {
            pending: count(ModerationStatus::Pending),
            in_review: count(ModerationStatus::InReview),
            approved: count(ModerationStatus::Approved),
            rejected: count(ModerationStatus::Rejected),
            appealed: count(ModerationStatus::Appealed),
            resolved: count(ModerationStatus::Resolved),
            open_appeals: queue
                .appeals
                .values()
                .filter(|a| {
                    matches!(a.status, AppealStatus::Pending | AppealStatus::UnderReview)
                })
                .count(),
            fraud: self.fraud.stats(),
        }
    }

    async fn execute_action(
        &self,
        action: ModerationAction,
        validation_id: &str,
        user_id: &str,
    ) -> ModerationResult<()> {
        match action {
            ModerationAction::FlagForReview => self.gateway.flag_validation(validation_id).await,
            ModerationAction::HideValidation => self.gateway.hide_validation(validation_id).await,
            ModerationAction::DeleteValidation => {
                self.gateway.delete_validation(validation_id).await
            }
            ModerationAction::SuspendUser => self.gateway.suspend_user(user_id).await,
            ModerationAction::ReduceInfluence => self.gateway.reduce_influence(user_id).await,
            ModerationAction::RequireVerification => {
                self.gateway.require_verification(user_id).await
            }
            ModerationAction::WarnUser => self.gateway.warn_user(user_id).await,
            ModerationAction::NoAction => Ok(()),
        }
    }

    async fn reverse_action(
        &self,
        action: ModerationAction,
        validation_id: &str,
        user_id: &str,
    ) -> ModerationResult<()> {
        match action {
            ModerationAction::HideValidation | ModerationAction::DeleteValidation => {
                self.gateway.unhide_validation(validation_id).await
            }
            ModerationAction::FlagForReview => self.gateway.unflag_validation(validation_id).await,
            ModerationAction::SuspendUser => self.gateway.reinstate_user(user_id).await,
            ModerationAction::ReduceInfluence => self.gateway.restore_influence(user_id).await,
            // Warnings and verification requirements leave nothing durable
            // to reverse
            ModerationAction::RequireVerification
            | ModerationAction::WarnUser
            | ModerationAction::NoAction => Ok(()),
        }
    }
}
