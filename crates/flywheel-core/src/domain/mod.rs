//! Domain models for the flywheel.
//!
//! Canonical definitions for the core entities:
//! - `Scenario`: Immutable compliance/risk check owned by the catalog
//! - `NormalizedTrace`: One agent execution's steps
//! - `EvaluationResult`: One scenario judged against one trace
//! - `RiskAssessment`: Aggregate risk over a result set
//! - `IterationRecord` / `Curriculum`: Flywheel history and targeting

pub mod error;
pub mod eval;
pub mod iteration;
pub mod risk;
pub mod scenario;
pub mod trace;

// Re-export main types and errors
pub use error::{FlywheelError, JudgeServiceError, Result};
pub use eval::{
    EvaluationResult, EvaluationStatus, MatchField, MatchedIndicator, SchemaMismatchKind,
    SkippedTrace,
};
pub use iteration::{Curriculum, CurriculumPhase, IterationRecord, ScenarioOutcome, WeaknessRank};
pub use risk::{RiskAssessment, RiskLevel, SeverityCounts, HIGH_THRESHOLD, MEDIUM_THRESHOLD};
pub use scenario::{
    FailureIndicator, IndicatorSpec, PiiKind, RemediationCategory, Scenario, ScenarioDefinition,
    Severity,
};
pub use trace::{
    NormalizedTrace, ParamType, StepError, StepKind, ToolParameter, ToolSignature, TraceStep,
};
