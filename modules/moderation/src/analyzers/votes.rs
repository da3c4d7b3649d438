//! Vote manipulation detection

use super::FraudAnalyzer;
use crate::config::FraudThresholds;
use crate::gateway::{ValidationContext, ValidationRecord};
use crate::models::{FraudDetectionResult, FraudSeverity, FraudType, ModerationAction};

/// Flags suspiciously unanimous vote patterns
///
/// Triggers when more than 5 votes are all helpful, or more than 3 votes
/// are all unhelpful. Both directions flag at MEDIUM / 0.6.
///
/// Known false-positive risk: under small sample sizes a genuinely
/// excellent (or genuinely poor) validation is indistinguishable from a
/// coordinated one. The bounds are tunable defaults, and the symmetric
/// treatment of both directions is kept deliberately rather than second-
/// guessed here.
pub struct VoteManipulationAnalyzer;

impl FraudAnalyzer for VoteManipulationAnalyzer {
    fn name(&self) -> &'static str {
        "vote_manipulation"
    }

    fn analyze(
        &self,
        validation: &ValidationRecord,
        _context: &ValidationContext,
        _thresholds: &FraudThresholds,
    ) -> Vec<FraudDetectionResult> {
        let total = validation.helpful_votes + validation.unhelpful_votes;
        if total == 0 {
            return Vec::new();
        }

        let helpful_ratio = validation.helpful_votes as f64 / total as f64;

        let evidence = if total > 5 && helpful_ratio == 1.0 {
            format!("{total} votes, every one helpful")
        } else if total > 3 && helpful_ratio == 0.0 {
            format!("{total} votes, every one unhelpful")
        } else {
            return Vec::new();
        };

        vec![FraudDetectionResult::new(
            FraudType::VoteManipulation,
            FraudSeverity::Medium,
            0.6,
            ModerationAction::FlagForReview,
            vec![evidence],
        )]
    }
}
