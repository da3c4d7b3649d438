//! Declared-but-unimplemented analyzers
//!
//! These fraud types require cross-user graph analysis (shared devices,
//! vote rings, account clusters) that a single validation plus one user's
//! history cannot support. They are registered as explicit no-ops so the
//! catalog is complete and the extension point is visible, rather than a
//! silent gap.

use super::FraudAnalyzer;
use crate::config::FraudThresholds;
use crate::gateway::{ValidationContext, ValidationRecord};
use crate::models::FraudDetectionResult;

/// Coordinated abuse across accounts; needs a cross-user interaction graph
pub struct CoordinatedAbuseAnalyzer;

impl FraudAnalyzer for CoordinatedAbuseAnalyzer {
    fn name(&self) -> &'static str {
        "coordinated_abuse"
    }

    fn analyze(
        &self,
        _validation: &ValidationRecord,
        _context: &ValidationContext,
        _thresholds: &FraudThresholds,
    ) -> Vec<FraudDetectionResult> {
        Vec::new()
    }
}

/// Sockpuppet detection; needs account-linkage signals
pub struct SockpuppetAnalyzer;

impl FraudAnalyzer for SockpuppetAnalyzer {
    fn name(&self) -> &'static str {
        "sockpuppeting"
    }

    fn analyze(
        &self,
        _validation: &ValidationRecord,
        _context: &ValidationContext,
        _thresholds: &FraudThresholds,
    ) -> Vec<FraudDetectionResult> {
        Vec::new()
    }
}

/// Duplicate account detection; needs identity/device correlation
pub struct DuplicateAccountAnalyzer;

impl FraudAnalyzer for DuplicateAccountAnalyzer {
    fn name(&self) -> &'static str {
        "duplicate_accounts"
    }

    fn analyze(
        &self,
        _validation: &ValidationRecord,
        _context: &ValidationContext,
        _thresholds: &FraudThresholds,
    ) -> Vec<FraudDetectionResult> {
        Vec::new()
    }
}
