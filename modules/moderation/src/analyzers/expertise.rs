//! Fake expertise detection

use super::FraudAnalyzer;
use crate::config::FraudThresholds;
use crate::gateway::{ValidationContext, ValidationRecord};
use crate::models::{FraudDetectionResult, FraudSeverity, FraudType, ModerationAction};

/// Claimed relevance above this is treated as an expertise claim
const EXPERTISE_CLAIM_FLOOR: f64 = 7.0;

/// Community reception below this average (helpful − unhelpful) contradicts
/// the claim
const RECEPTION_FLOOR: f64 = -1.0;

/// Minimum same-type track record before the contradiction counts
const MIN_TRACK_RECORD: usize = 3;

/// Flags high expertise claims contradicted by the community's reception
///
/// Triggers when the claimed `expertise_relevance` exceeds 7.0 but the
/// user's last three or more validations of the same type average worse
/// than −1 net helpful votes.
pub struct FakeExpertiseAnalyzer;

impl FraudAnalyzer for FakeExpertiseAnalyzer {
    fn name(&self) -> &'static str {
        "fake_expertise"
    }

    fn analyze(
        &self,
        validation: &ValidationRecord,
        context: &ValidationContext,
        _thresholds: &FraudThresholds,
    ) -> Vec<FraudDetectionResult> {
        if validation.expertise_relevance <= EXPERTISE_CLAIM_FLOOR {
            return Vec::new();
        }

        let same_type: Vec<f64> = context
            .recent_validations
            .iter()
            .filter(|prior| prior.validation_type == validation.validation_type)
            .map(|prior| prior.helpful_votes as f64 - prior.unhelpful_votes as f64)
            .collect();
        if same_type.len() < MIN_TRACK_RECORD {
            return Vec::new();
        }

        let average = same_type.iter().sum::<f64>() / same_type.len() as f64;
        if average >= RECEPTION_FLOOR {
            return Vec::new();
        }

        vec![FraudDetectionResult::new(
            FraudType::FakeExpertise,
            FraudSeverity::Medium,
            0.7,
            ModerationAction::RequireVerification,
            vec![format!(
                "claims expertise relevance {:.1} but the last {} {} validations average \
                 {average:.1} net helpful votes",
                validation.expertise_relevance,
                same_type.len(),
                validation.validation_type,
            )],
        )]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::test_support::{clean_validation, empty_context};
    use crate::gateway::PriorValidation;
    use chrono::{Duration, Utc};

    fn poorly_received_history(validation_type: &str, count: usize) -> ValidationContext {
        let now = Utc::now();
        ValidationContext {
            recent_validations: (0..count)
                .map(|i| PriorValidation {
                    validation_type: validation_type.to_string(),
                    comment: format!("prior {i}"),
                    helpful_votes: 0,
                    unhelpful_votes: 2,
                    submitted_at: now - Duration::days(i as i64 + 1),
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_contradicted_expertise_claim_flags() {
        let mut validation = clean_validation();
        validation.expertise_relevance = 8.5;
        let context = poorly_received_history("market_demand", 4);

        let findings = FakeExpertiseAnalyzer.analyze(
            &validation,
            &context,
            &FraudThresholds::default(),
        );

        assert_eq!(findings.len(), 1);
        let finding = &findings[0];
        assert_eq!(finding.fraud_type, FraudType::FakeExpertise);
        assert_eq!(finding.severity, FraudSeverity::Medium);
        assert_eq!(finding.confidence_score, 0.7);
        assert_eq!(
            finding.recommended_action,
            ModerationAction::RequireVerification
        );
    }

    #[test]
    fn test_modest_claim_passes() {
        let mut validation = clean_validation();
        validation.expertise_relevance = 6.0;
        let context = poorly_received_history("market_demand", 4);

        assert!(FakeExpertiseAnalyzer
            .analyze(&validation, &context, &FraudThresholds::default())
            .is_empty());
    }

    #[test]
    fn test_thin_track_record_passes() {
        let mut validation = clean_validation();
        validation.expertise_relevance = 9.0;
        let context = poorly_received_history("market_demand", 2);

        assert!(FakeExpertiseAnalyzer
            .analyze(&validation, &context, &FraudThresholds::default())
            .is_empty());
    }

    #[test]
    fn test_other_type_history_is_ignored() {
        let mut validation = clean_validation();
        validation.expertise_relevance = 9.0;
        let context = poorly_received_history("technical_feasibility", 5);

        assert!(FakeExpertiseAnalyzer
            .analyze(&validation, &context, &FraudThresholds::default())
            .is_empty());
    }

    #[test]
    fn test_well_received_expert_passes() {
        let mut validation = clean_validation();
        validation.expertise_relevance = 9.0;

        let now = Utc::now();
        let context = ValidationContext {
            recent_validations: (0..4)
                .map(|i| PriorValidation {
                    validation_type: "market_demand".to_string(),
                    comment: format!("prior {i}"),
                    helpful_votes: 5,
                    unhelpful_votes: 0,
                    submitted_at: now - Duration::days(i + 1),
                })
                .collect(),
            ..Default::default()
        };

        assert!(FakeExpertiseAnalyzer
            .analyze(&validation, &context, &FraudThresholds::default())
            .is_empty());
        // Sanity: the empty context also passes
        assert!(FakeExpertiseAnalyzer
            .analyze(&validation, &empty_context(), &FraudThresholds::default())
            .is_empty());
    }
}
