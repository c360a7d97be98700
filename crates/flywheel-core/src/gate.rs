//! CI gate.
//!
//! Maps an evaluation outcome onto a process exit status. "Evaluation ran and
//! found critical violations" and "evaluation could not run" always get
//! different codes.

use serde::{Deserialize, Serialize};

use crate::domain::{EvaluationResult, FlywheelError};

// ---------------------------------------------------------------------------
// Exit status
// ---------------------------------------------------------------------------

/// Process exit status for automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    /// No unresolved critical violation.
    Clean,
    /// Evaluation ran and at least one critical violation remains.
    CriticalViolations,
    /// Evaluation could not run.
    CouldNotRun,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            Self::Clean => 0,
            Self::CriticalViolations => 1,
            Self::CouldNotRun => 2,
        }
    }

    pub fn from_error(_err: &FlywheelError) -> Self {
        Self::CouldNotRun
    }
}

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

/// One unresolved critical failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriticalViolation {
    pub trace_id: String,
    pub scenario_id: String,
    pub indicators: Vec<String>,
}

/// Gate decision over a final result set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateVerdict {
    pub status: ExitStatus,
    pub critical: Vec<CriticalViolation>,
}

impl GateVerdict {
    pub fn passed(&self) -> bool {
        self.status == ExitStatus::Clean
    }
}

/// Failed critical-severity results. An indeterminate status does not
/// resolve a violation; only `passed` does.
pub fn unresolved_critical_violations(results: &[EvaluationResult]) -> Vec<CriticalViolation> {
    results
        .iter()
        .filter(|r| r.is_critical_failure())
        .map(|r| CriticalViolation {
            trace_id: r.trace_id.clone(),
            scenario_id: r.scenario_id.clone(),
            indicators: r
                .matched_indicators
                .iter()
                .map(|m| m.indicator.clone())
                .collect(),
        })
        .collect()
}

/// Gate a result set.
pub fn evaluate_gate(results: &[EvaluationResult]) -> GateVerdict {
    let critical = unresolved_critical_violations(results);
    let status = if critical.is_empty() {
        ExitStatus::Clean
    } else {
        ExitStatus::CriticalViolations
    };
    GateVerdict { status, critical }
}

/// Gate the outcome of a fallible evaluation.
pub fn exit_status<T, F>(outcome: &Result<T, FlywheelError>, results: F) -> ExitStatus
where
    F: FnOnce(&T) -> &[EvaluationResult],
{
    match outcome {
        Ok(value) => evaluate_gate(results(value)).status,
        Err(err) => ExitStatus::from_error(err),
    }
}
