//! Evaluation results: one scenario judged against one trace.

use serde::{Deserialize, Serialize};

use crate::domain::scenario::{RemediationCategory, Severity};

/// Where in a step an indicator matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchField {
    Input,
    Output,
    Error,
    ToolCall,
}

/// Structural tool-call mismatch types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaMismatchKind {
    ParameterNameMismatch,
    ParameterTypeMismatch,
    MissingRequiredParameter,
    UndeclaredTool,
}

impl SchemaMismatchKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ParameterNameMismatch => "parameter_name_mismatch",
            Self::ParameterTypeMismatch => "parameter_type_mismatch",
            Self::MissingRequiredParameter => "missing_required_parameter",
            Self::UndeclaredTool => "undeclared_tool",
        }
    }
}

impl std::fmt::Display for SchemaMismatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evidence that one failure indicator fired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedIndicator {
    /// Indicator label, e.g. `pii:ssn` or `keyword:wire transfer`.
    pub indicator: String,
    pub step_index: usize,
    pub field: MatchField,
    /// Short excerpt of the matched text, or a mismatch description.
    pub evidence: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mismatch: Option<SchemaMismatchKind>,
}

/// Outcome of a single evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    Passed,
    Failed,
    /// The judge could not supply a rationale after bounded retries. The
    /// indicator verdict in `passed` still stands.
    Indeterminate,
}

/// One scenario x one trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub trace_id: String,
    pub scenario_id: String,
    pub passed: bool,
    pub status: EvaluationStatus,
    pub severity: Severity,
    pub category: RemediationCategory,
    pub matched_indicators: Vec<MatchedIndicator>,
    pub rationale: String,
}

impl EvaluationResult {
    pub fn failed(&self) -> bool {
        !self.passed
    }

    pub fn is_critical_failure(&self) -> bool {
        !self.passed && self.severity == Severity::Critical
    }

    pub fn mismatch_kinds(&self) -> Vec<SchemaMismatchKind> {
        self.matched_indicators
            .iter()
            .filter_map(|m| m.mismatch)
            .collect()
    }
}

/// A trace excluded from a batch because it could not be evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedTrace {
    pub trace_id: String,
    pub reason: String,
}
