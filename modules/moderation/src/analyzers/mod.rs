//! Fraud analyzers
//!
//! Each analyzer is a pure function over a validation and its historical
//! context: no hidden state, independently unit-testable. Analyzers run
//! independently and their findings are concatenated, so one validation
//! can trigger several fraud types at once.

mod content;
mod expertise;
mod reputation;
mod spam;
mod stubs;
mod votes;

pub use content::LowQualityContentAnalyzer;
pub use expertise::FakeExpertiseAnalyzer;
pub use reputation::ReputationFarmingAnalyzer;
pub use spam::SpamAnalyzer;
pub use stubs::{CoordinatedAbuseAnalyzer, DuplicateAccountAnalyzer, SockpuppetAnalyzer};
pub use votes::VoteManipulationAnalyzer;

use crate::config::FraudThresholds;
use crate::gateway::{ValidationContext, ValidationRecord};
use crate::models::FraudDetectionResult;

/// A stateless fraud heuristic
pub trait FraudAnalyzer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Zero or more findings for this validation
    fn analyze(
        &self,
        validation: &ValidationRecord,
        context: &ValidationContext,
        thresholds: &FraudThresholds,
    ) -> Vec<FraudDetectionResult>;
}

/// The full analyzer set, declared no-ops included
pub fn default_analyzers() -> Vec<Box<dyn FraudAnalyzer>> {
    vec![
        Box::new(SpamAnalyzer),
        Box::new(LowQualityContentAnalyzer),
        Box::new(VoteManipulationAnalyzer),
        Box::new(FakeExpertiseAnalyzer),
        Box::new(ReputationFarmingAnalyzer),
        Box::new(CoordinatedAbuseAnalyzer),
        Box::new(SockpuppetAnalyzer),
        Box::new(DuplicateAccountAnalyzer),
    ]
}

/// Token-overlap similarity between two comments (Jaccard over lowercased
/// word sets)
pub(crate) fn token_overlap(a: &str, b: &str) -> f64 {
    let tokens_a: std::collections::HashSet<String> = a
        .split_whitespace()
        .map(|t| t.to_lowercase())
        .collect();
    let tokens_b: std::collections::HashSet<String> = b
        .split_whitespace()
        .map(|t| t.to_lowercase())
        .collect();

    if tokens_a.is_empty() && tokens_b.is_empty() {
        return 1.0;
    }
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let intersection = tokens_a.intersection(&tokens_b).count();
    let union = tokens_a.union(&tokens_b).count();
    intersection as f64 / union as f64
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_overlap_bounds() {
        assert_eq!(token_overlap("a b c", "a b c"), 1.0);
        assert_eq!(token_overlap("a b", "c d"), 0.0);
        assert_eq!(token_overlap("", ""), 1.0);
        assert_eq!(token_overlap("a", ""), 0.0);

        // Case-insensitive
        assert_eq!(token_overlap("Great Idea", "great idea"), 1.0);

        // Partial overlap: {a b c} vs {a b d} = 2/4
        assert_eq!(token_overlap("a b c", "a b d"), 0.5);
    }

    #[test]
    fn test_clean_validation_triggers_nothing() {
        let validation = test_support::clean_validation();
        let context = test_support::empty_context();
        let thresholds = FraudThresholds::default();

        for analyzer in default_analyzers() {
            let findings = analyzer.analyze(&validation, &context, &thresholds);
            assert!(
                findings.is_empty(),
                "{} flagged a clean validation: {:?}",
                analyzer.name(),
                findings
            );
        }
    }
}
