//! Spam detection

use super::{token_overlap, FraudAnalyzer};
use crate::config::FraudThresholds;
use crate::gateway::{ValidationContext, ValidationRecord};
use crate::models::{FraudDetectionResult, FraudSeverity, FraudType, ModerationAction};

/// Flags high-rate, too-short, or near-duplicate submissions
///
/// Three independent triggers:
/// 1. more than `max_validations_per_hour` submissions in the trailing hour
/// 2. comment shorter than `min_validation_length`
/// 3. more than `duplicate_content_limit` prior validations with at least
///    `similarity_threshold` token overlap against this one
///
/// Severity is HIGH with two or more triggers, MEDIUM with one;
/// confidence is `min(0.9, triggers * 0.3)`.
pub struct SpamAnalyzer;

impl FraudAnalyzer for SpamAnalyzer {
    fn name(&self) -> &'static str {
        "spam"
    }

    fn analyze(
        &self,
        validation: &ValidationRecord,
        context: &ValidationContext,
        thresholds: &FraudThresholds,
    ) -> Vec<FraudDetectionResult> {
        let mut evidence = Vec::new();
        let mut triggers = 0u32;

        let hourly = context.validations_in_trailing_hour(validation.submitted_at);
        if hourly > thresholds.max_validations_per_hour as usize {
            triggers += 1;
            evidence.push(format!(
                "{hourly} validations submitted in the trailing hour (limit {})",
                thresholds.max_validations_per_hour
            ));
        }

        if validation.comment.len() < thresholds.min_validation_length {
            triggers += 1;
            evidence.push(format!(
                "comment is {} characters, below the {}-character minimum",
                validation.comment.len(),
                thresholds.min_validation_length
            ));
        }

        let near_duplicates = context
            .recent_validations
            .iter()
            .filter(|prior| {
                token_overlap(&validation.comment, &prior.comment)
                    >= thresholds.similarity_threshold
            })
            .count();
        if near_duplicates > thresholds.duplicate_content_limit {
            triggers += 1;
            evidence.push(format!(
                "{near_duplicates} prior validations are near-duplicates of this comment"
            ));
        }

        if triggers == 0 {
            return Vec::new();
        }

        let severity = if triggers >= 2 {
            FraudSeverity::High
        } else {
            FraudSeverity::Medium
        };
        let confidence = (triggers as f64 * 0.3).min(0.9);

        vec![FraudDetectionResult::new(
            FraudType::Spam,
            severity,
            confidence,
            ModerationAction::FlagForReview,
            evidence,
        )]
    }
}
