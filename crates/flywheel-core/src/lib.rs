//! Compliance Flywheel Core Library
//!
//! Evaluates normalized agent traces against compliance scenario catalogs,
//! scores the results, and drives the curriculum-based self-improvement loop.

pub mod adapters;
pub mod artifacts;
pub mod budget;
pub mod catalog;
pub mod config;
pub mod curriculum;
pub mod domain;
pub mod evaluator;
pub mod flywheel;
pub mod gate;
pub mod judge;
pub mod matcher;
pub mod metrics;
pub mod obs;
pub mod remediation;
pub mod scorer;
pub mod telemetry;

pub use domain::{
    Curriculum, CurriculumPhase, EvaluationResult, EvaluationStatus, FailureIndicator,
    FlywheelError, IndicatorSpec, IterationRecord, JudgeServiceError, MatchField,
    MatchedIndicator, NormalizedTrace, ParamType, PiiKind, RemediationCategory, Result,
    RiskAssessment, RiskLevel, Scenario, ScenarioDefinition, ScenarioOutcome, SchemaMismatchKind,
    Severity, SeverityCounts, SkippedTrace, StepError, StepKind, ToolParameter, ToolSignature,
    TraceStep, WeaknessRank,
};

pub use adapters::{normalize, normalize_all, TraceFormat};
pub use artifacts::{read_history_artifact, write_history_artifact, HistoryArtifact};
pub use budget::{BudgetReason, BudgetTracker};
pub use catalog::{CatalogDocument, ScenarioCatalog};
pub use config::{
    ConvergenceMetric, CurriculumConfig, EvaluatorConfig, FlywheelConfig, JudgeRetryConfig,
};
pub use curriculum::{category_stats, next_curriculum, CategoryStats};
pub use evaluator::{
    calibrate, evaluate, match_scenario, BatchEvaluation, CalibrationReport, Evaluator,
    TraceEvaluation,
};
pub use flywheel::{FlywheelController, FlywheelOutcome, FlywheelReport, FlywheelState};
pub use gate::{
    evaluate_gate, exit_status, unresolved_critical_violations, CriticalViolation, ExitStatus,
    GateVerdict,
};
pub use judge::{
    explain_with_retry, HttpJudge, HttpJudgeConfig, JudgeCall, JudgeRequest, JudgeResponse,
    JudgeService, TemplateJudge,
};
pub use remediation::{RemediationOutcome, Remediator, StagedTraceRemediator};
pub use scorer::{risk_variance, score, score_by_trace, CRITICAL_IMPACT_CAP};
pub use telemetry::init_tracing;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
