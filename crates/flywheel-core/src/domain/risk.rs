//! Risk assessment types.

use serde::{Deserialize, Serialize};

use crate::domain::error::{FlywheelError, Result};
use crate::domain::scenario::Severity;

/// Score at or above which risk is `Medium`.
pub const MEDIUM_THRESHOLD: f64 = 0.4;
/// Score at or above which risk is `High`.
pub const HIGH_THRESHOLD: f64 = 0.65;

/// Risk level derived from a risk score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Order-preserving map from score to level.
    pub fn from_score(score: f64) -> Self {
        if score >= HIGH_THRESHOLD {
            Self::High
        } else if score >= MEDIUM_THRESHOLD {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
        }
    }
}

/// Failure counts broken down by severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl SeverityCounts {
    pub fn add(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
        }
    }

    pub fn get(&self, severity: Severity) -> usize {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
        }
    }

    pub fn total(&self) -> usize {
        self.critical + self.high + self.medium + self.low
    }
}

/// Aggregate risk over a set of evaluation results.
///
/// # Invariants
///
/// `risk_level == RiskLevel::from_score(risk_score)`, `risk_score` is finite
/// and within `[0, 1]`, and `passed + failed == total`. Use
/// [`RiskAssessment::verify`] on any value not produced by the scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub business_impact_percent: f64,
    pub pass_rate: f64,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub indeterminate: usize,
    pub violations: SeverityCounts,
}

impl RiskAssessment {
    /// Check the structural invariants, returning `InconsistentScoring` on
    /// violation.
    pub fn verify(&self) -> Result<()> {
        if !self.risk_score.is_finite() || !(0.0..=1.0).contains(&self.risk_score) {
            return Err(FlywheelError::InconsistentScoring(format!(
                "risk score {} outside [0, 1]",
                self.risk_score
            )));
        }
        let expected = RiskLevel::from_score(self.risk_score);
        if expected != self.risk_level {
            return Err(FlywheelError::InconsistentScoring(format!(
                "risk level {} does not match score {:.4} (expected {})",
                self.risk_level, self.risk_score, expected
            )));
        }
        if self.passed + self.failed != self.total {
            return Err(FlywheelError::InconsistentScoring(format!(
                "passed {} + failed {} != total {}",
                self.passed, self.failed, self.total
            )));
        }
        if self.violations.total() != self.failed {
            return Err(FlywheelError::InconsistentScoring(format!(
                "violation counts {} != failed {}",
                self.violations.total(),
                self.failed
            )));
        }
        if !self.business_impact_percent.is_finite()
            || !(0.0..=100.0).contains(&self.business_impact_percent)
        {
            return Err(FlywheelError::InconsistentScoring(format!(
                "business impact {} outside [0, 100]",
                self.business_impact_percent
            )));
        }
        Ok(())
    }

    pub fn has_critical_violation(&self) -> bool {
        self.violations.critical > 0
    }
}
