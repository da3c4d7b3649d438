//! Fraud detection service
//!
//! Runs the analyzer set over a validation and concatenates the findings.
//! Analysis of different validations shares no mutable state beyond the
//! aggregate counters, so concurrent analyses never interfere.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::analyzers::{default_analyzers, FraudAnalyzer};
use crate::config::FraudThresholds;
use crate::gateway::{ValidationContext, ValidationRecord};
use crate::models::FraudDetectionResult;

/// Trailing window for the fraud-rate statistic
const STATS_WINDOW_HOURS: i64 = 24;

/// Aggregate counters for operational dashboards
#[derive(Debug, Clone, Serialize)]
pub struct FraudStats {
    /// Validations analyzed in the trailing window
    pub total_analyzed: u64,
    /// Of those, how many produced at least one finding
    pub flagged: u64,
    /// flagged / total over the trailing window (0.0 when idle)
    pub fraud_rate: f64,
}

/// Owns the analyzer set and the trailing fraud-rate window
pub struct FraudDetectionService {
    analyzers: Vec<Box<dyn FraudAnalyzer>>,
    thresholds: FraudThresholds,
    window: Mutex<VecDeque<(DateTime<Utc>, bool)>>,
}

impl FraudDetectionService {
    pub fn new(thresholds: FraudThresholds) -> Self {
        Self {
            analyzers: default_analyzers(),
            thresholds,
            window: Mutex::new(VecDeque::new()),
        }
    }

    /// Replace the analyzer set (used to narrow tests to one analyzer)
    pub fn with_analyzers(mut self, analyzers: Vec<Box<dyn FraudAnalyzer>>) -> Self {
        self.analyzers = analyzers;
        self
    }

    pub fn thresholds(&self) -> &FraudThresholds {
        &self.thresholds
    }

    /// Run every analyzer and concatenate the findings
    pub fn analyze(
        &self,
        validation: &ValidationRecord,
        context: &ValidationContext,
    ) -> Vec<FraudDetectionResult> {
        let results: Vec<FraudDetectionResult> = self
            .analyzers
            .iter()
            .flat_map(|analyzer| analyzer.analyze(validation, context, &self.thresholds))
            .collect();

        if !results.is_empty() {
            tracing::info!(
                validation_id = %validation.validation_id,
                user_id = %validation.user_id,
                findings = results.len(),
                "Fraud analysis produced findings"
            );
        }

        self.record_outcome(!results.is_empty());
        results
    }

    fn record_outcome(&self, flagged: bool) {
        let now = Utc::now();
        let cutoff = now - Duration::hours(STATS_WINDOW_HOURS);
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        window.push_back((now, flagged));
        while window.front().is_some_and(|(t, _)| *t < cutoff) {
            window.pop_front();
        }
    }

    /// Fraud rate over the trailing window
    pub fn stats(&self) -> FraudStats {
        let cutoff = Utc::now() - Duration::hours(STATS_WINDOW_HOURS);
        let window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        let total = window.iter().filter(|(t, _)| *t >= cutoff).count() as u64;
        let flagged = window
            .iter()
            .filter(|(t, flagged)| *t >= cutoff && *flagged)
            .count() as u64;

        FraudStats {
            total_analyzed: total,
            flagged,
            fraud_rate: if total == 0 {
                0.0
            } else {
                flagged as f64 / total as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::test_support::{clean_validation, empty_context};

    #[test]
    fn test_multiple_analyzers_concatenate_findings() {
        let service = FraudDetectionService::new(FraudThresholds::default());

        // Short generic comment with no evidence and unanimous votes:
        // spam, low-quality, and vote-manipulation all fire at once.
        let mut validation = clean_validation();
        validation.comment = "maybe".to_string();
        validation.confidence = 1.0;
        validation.evidence_links.clear();
        validation.helpful_votes = 9;
        validation.unhelpful_votes = 0;

        let results = service.analyze(&validation, &empty_context());
        let types: Vec<_> = results.iter().map(|r| r.fraud_type).collect();

        assert!(types.contains(&crate::FraudType::Spam));
        assert!(types.contains(&crate::FraudType::LowQualityContent));
        assert!(types.contains(&crate::FraudType::VoteManipulation));
    }

    #[test]
    fn test_fraud_rate_tracks_flagged_share() {
        let service = FraudDetectionService::new(FraudThresholds::default());

        // One clean, one flagged
        service.analyze(&clean_validation(), &empty_context());
        let mut bad = clean_validation();
        bad.comment = "no".to_string();
        service.analyze(&bad, &empty_context());

        let stats = service.stats();
        assert_eq!(stats.total_analyzed, 2);
        assert_eq!(stats.flagged, 1);
        assert!((stats.fraud_rate - 0.5).abs() < 1e-9);
    }
}
