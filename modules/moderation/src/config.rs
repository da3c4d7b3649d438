//! Fraud detection thresholds
//!
//! All analyzer decision points are configuration with the defaults below,
//! overridable from the environment. The vote-manipulation bounds in
//! particular are tunable heuristics, not load-bearing constants; see the
//! note on [`crate::analyzers::VoteManipulationAnalyzer`].

use std::env;

/// Tunable thresholds consumed by the analyzers and the routing decision
#[derive(Debug, Clone)]
pub struct FraudThresholds {
    /// Spam: validations from one user in the trailing hour before a rate
    /// flag
    pub max_validations_per_hour: u32,
    /// Spam: minimum comment length before a too-short flag
    pub min_validation_length: usize,
    /// Spam: token-overlap similarity treated as duplicate content
    pub similarity_threshold: f64,
    /// Spam: prior near-duplicates tolerated before a flag
    pub duplicate_content_limit: usize,
    /// Low quality: minimum self-reported confidence score
    pub min_confidence_score: f64,
    /// Low quality: generic filler phrases tolerated before a flag
    pub generic_phrase_limit: usize,
    /// Low quality: comment length below this is an issue on its own
    pub min_quality_comment_length: usize,
    /// Reputation farming: average points/day over the trailing week
    pub suspicious_growth_rate: f64,
    /// Reputation farming: distinct-type ratio below this is suspicious
    pub min_validation_diversity: f64,
    /// Routing: max finding confidence below this auto-approves
    pub auto_approve_threshold: f64,
    /// Routing: max finding confidence above this auto-rejects
    pub auto_reject_threshold: f64,
}

impl Default for FraudThresholds {
    fn default() -> Self {
        Self {
            max_validations_per_hour: 10,
            min_validation_length: 20,
            similarity_threshold: 0.8,
            duplicate_content_limit: 2,
            min_confidence_score: 2.0,
            generic_phrase_limit: 2,
            min_quality_comment_length: 10,
            suspicious_growth_rate: 50.0,
            min_validation_diversity: 0.3,
            auto_approve_threshold: 0.3,
            auto_reject_threshold: 0.9,
        }
    }
}

impl FraudThresholds {
    /// Defaults with environment overrides applied
    ///
    /// Unparseable values fall back to the default rather than failing;
    /// thresholds are tuning, not wiring.
    pub fn from_env() -> Self {
        let mut thresholds = Self::default();

        if let Some(v) = parse_env("FRAUD_MAX_VALIDATIONS_PER_HOUR") {
            thresholds.max_validations_per_hour = v;
        }
        if let Some(v) = parse_env("FRAUD_MIN_VALIDATION_LENGTH") {
            thresholds.min_validation_length = v;
        }
        if let Some(v) = parse_env("FRAUD_SIMILARITY_THRESHOLD") {
            thresholds.similarity_threshold = v;
        }
        if let Some(v) = parse_env("FRAUD_MIN_CONFIDENCE_SCORE") {
            thresholds.min_confidence_score = v;
        }
        if let Some(v) = parse_env("FRAUD_SUSPICIOUS_GROWTH_RATE") {
            thresholds.suspicious_growth_rate = v;
        }
        if let Some(v) = parse_env("FRAUD_MIN_VALIDATION_DIVERSITY") {
            thresholds.min_validation_diversity = v;
        }
        if let Some(v) = parse_env("MODERATION_AUTO_APPROVE_THRESHOLD") {
            thresholds.auto_approve_threshold = v;
        }
        if let Some(v) = parse_env("MODERATION_AUTO_REJECT_THRESHOLD") {
            thresholds.auto_reject_threshold = v;
        }

        thresholds
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}
