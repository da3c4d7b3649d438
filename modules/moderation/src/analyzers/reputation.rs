//! Reputation farming detection

use super::FraudAnalyzer;
use crate::config::FraudThresholds;
use crate::gateway::{ValidationContext, ValidationRecord};
use crate::models::{FraudDetectionResult, FraudSeverity, FraudType, ModerationAction};

/// Lifetime validation count above which diversity is expected
const DIVERSITY_FLOOR_COUNT: u64 = 10;

/// Flags implausibly fast point accrual or grind-pattern repetition
///
/// Two independent triggers, either of which flags at HIGH / 0.8 with a
/// reduce-influence recommendation:
/// 1. reputation points over the trailing 7 days exceed
///    `suspicious_growth_rate` per day on average
/// 2. more than 10 lifetime validations but fewer than
///    `min_validation_diversity` distinct types relative to
///    `min(5, total)`
pub struct ReputationFarmingAnalyzer;

impl FraudAnalyzer for ReputationFarmingAnalyzer {
    fn name(&self) -> &'static str {
        "reputation_farming"
    }

    fn analyze(
        &self,
        validation: &ValidationRecord,
        context: &ValidationContext,
        thresholds: &FraudThresholds,
    ) -> Vec<FraudDetectionResult> {
        let mut evidence = Vec::new();

        let weekly_points =
            context.reputation_points_in_trailing_week(validation.submitted_at);
        if weekly_points > thresholds.suspicious_growth_rate * 7.0 {
            evidence.push(format!(
                "{weekly_points:.0} reputation points in 7 days ({:.0}/day average, limit {})",
                weekly_points / 7.0,
                thresholds.suspicious_growth_rate
            ));
        }

        if context.total_validations > DIVERSITY_FLOOR_COUNT {
            let distinct_types = context
                .recent_validations
                .iter()
                .map(|v| v.validation_type.as_str())
                .collect::<std::collections::HashSet<_>>()
                .len();
            let expected = context.total_validations.min(5) as f64;
            let diversity = distinct_types as f64 / expected;
            if diversity < thresholds.min_validation_diversity {
                evidence.push(format!(
                    "{} validations across only {distinct_types} distinct types \
                     (diversity {diversity:.2}, floor {})",
                    context.total_validations, thresholds.min_validation_diversity
                ));
            }
        }

        if evidence.is_empty() {
            return Vec::new();
        }

        vec![FraudDetectionResult::new(
            FraudType::ReputationFarming,
            FraudSeverity::High,
            0.8,
            ModerationAction::ReduceInfluence,
            evidence,
        )]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::test_support::{clean_validation, empty_context};
    use crate::gateway::{PriorValidation, ReputationEvent};
    use chrono::{Duration, Utc};

    #[test]
    fn test_fast_accrual_flags_high_with_reduce_influence() {
        let validation = clean_validation();
        let now = validation.submitted_at;

        // 100 events totaling 400 points over the week
        let context = ValidationContext {
            reputation_events: (0..100)
                .map(|i| ReputationEvent {
                    points: 4.0,
                    occurred_at: now - Duration::hours(i % 160),
                })
                .collect(),
            ..Default::default()
        };

        let findings = ReputationFarmingAnalyzer.analyze(
            &validation,
            &context,
            &FraudThresholds::default(),
        );

        assert_eq!(findings.len(), 1);
        let finding = &findings[0];
        assert_eq!(finding.fraud_type, FraudType::ReputationFarming);
        assert_eq!(finding.severity, FraudSeverity::High);
        assert_eq!(finding.confidence_score, 0.8);
        assert_eq!(finding.recommended_action, ModerationAction::ReduceInfluence);
    }

    #[test]
    fn test_grind_pattern_flags_on_low_diversity() {
        let validation = clean_validation();
        let now = validation.submitted_at;

        // 30 lifetime validations, all the same type
        let context = ValidationContext {
            recent_validations: (0..12)
                .map(|i| PriorValidation {
                    validation_type: "market_demand".to_string(),
                    comment: format!("prior {i}"),
                    helpful_votes: 1,
                    unhelpful_votes: 0,
                    submitted_at: now - Duration::days(i),
                })
                .collect(),
            total_validations: 30,
            ..Default::default()
        };

        let findings = ReputationFarmingAnalyzer.analyze(
            &validation,
            &context,
            &FraudThresholds::default(),
        );

        assert_eq!(findings.len(), 1);
        assert!(findings[0].evidence[0].contains("distinct types"));
    }

    #[test]
    fn test_diverse_activity_passes() {
        let validation = clean_validation();
        let now = validation.submitted_at;
        let types = [
            "market_demand",
            "technical_feasibility",
            "competition",
            "pricing",
            "team",
        ];

        let context = ValidationContext {
            recent_validations: (0..15)
                .map(|i| PriorValidation {
                    validation_type: types[i % types.len()].to_string(),
                    comment: format!("prior {i}"),
                    helpful_votes: 1,
                    unhelpful_votes: 0,
                    submitted_at: now - Duration::days(i as i64),
                })
                .collect(),
            total_validations: 15,
            ..Default::default()
        };

        assert!(ReputationFarmingAnalyzer
            .analyze(&validation, &context, &FraudThresholds::default())
            .is_empty());
    }

    #[test]
    fn test_modest_accrual_passes() {
        let validation = clean_validation();
        let now = validation.submitted_at;
        let context = ValidationContext {
            reputation_events: vec![ReputationEvent {
                points: 200.0,
                occurred_at: now - Duration::days(3),
            }],
            ..Default::default()
        };

        assert!(ReputationFarmingAnalyzer
            .analyze(&validation, &context, &FraudThresholds::default())
            .is_empty());
        assert!(ReputationFarmingAnalyzer
            .analyze(&validation, &empty_context(), &FraudThresholds::default())
            .is_empty());
    }
}
