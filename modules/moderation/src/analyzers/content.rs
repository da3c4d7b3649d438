//! Low-quality content detection

use super::FraudAnalyzer;
use crate::config::FraudThresholds;
use crate::gateway::{ValidationContext, ValidationRecord};
use crate::models::{FraudDetectionResult, FraudSeverity, FraudType, ModerationAction};

/// Generic filler phrases that carry no validation signal
const GENERIC_PHRASES: &[&str] = &[
    "this is good",
    "looks good",
    "not sure",
    "might work",
    "could work",
    "seems fine",
    "i think so",
    "no idea",
    "maybe",
    "probably",
    "interesting",
];

/// Flags validations with no substance behind them
///
/// Independent issues, any of which counts:
/// - more than `generic_phrase_limit` filler phrases in the comment
/// - self-reported confidence below `min_confidence_score`
/// - no evidence links or supporting data
/// - comment shorter than `min_quality_comment_length`
///
/// Severity is MEDIUM with two or more issues, LOW with one.
pub struct LowQualityContentAnalyzer;

impl FraudAnalyzer for LowQualityContentAnalyzer {
    fn name(&self) -> &'static str {
        "low_quality_content"
    }

    fn analyze(
        &self,
        validation: &ValidationRecord,
        _context: &ValidationContext,
        thresholds: &FraudThresholds,
    ) -> Vec<FraudDetectionResult> {
        let mut evidence = Vec::new();
        let mut issues = 0u32;

        let comment_lower = validation.comment.to_lowercase();
        let generic: Vec<&str> = GENERIC_PHRASES
            .iter()
            .filter(|phrase| comment_lower.contains(**phrase))
            .copied()
            .collect();
        if generic.len() > thresholds.generic_phrase_limit {
            issues += 1;
            evidence.push(format!(
                "comment leans on generic phrases: {}",
                generic.join(", ")
            ));
        }

        if validation.confidence < thresholds.min_confidence_score {
            issues += 1;
            evidence.push(format!(
                "self-reported confidence {} is below {}",
                validation.confidence, thresholds.min_confidence_score
            ));
        }

        if validation.evidence_links.is_empty() {
            issues += 1;
            evidence.push("no evidence links or supporting data".to_string());
        }

        if validation.comment.len() < thresholds.min_quality_comment_length {
            issues += 1;
            evidence.push(format!(
                "comment is only {} characters",
                validation.comment.len()
            ));
        }

        if issues == 0 {
            return Vec::new();
        }

        let severity = if issues >= 2 {
            FraudSeverity::Medium
        } else {
            FraudSeverity::Low
        };
        let confidence = (0.4 + issues as f64 * 0.1).min(0.8);

        vec![FraudDetectionResult::new(
            FraudType::LowQualityContent,
            severity,
            confidence,
            ModerationAction::FlagForReview,
            evidence,
        )]
    }
}
