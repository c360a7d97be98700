//! Domain-level error taxonomy for the flywheel.

/// Failures reported by an external judge service.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JudgeServiceError {
    #[error("judge rate limited (retry after {retry_after_ms}ms)")]
    RateLimited { retry_after_ms: u64 },

    #[error("judge unavailable: {0}")]
    Unavailable(String),

    #[error("judge returned an invalid response: {0}")]
    InvalidResponse(String),
}

impl JudgeServiceError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Unavailable(_))
    }
}

/// Flywheel domain errors.
#[derive(Debug, thiserror::Error)]
pub enum FlywheelError {
    #[error("catalog load error for domain '{domain}': {reason}")]
    CatalogLoad { domain: String, reason: String },

    #[error("scenario '{id}' not found in domain '{domain}'")]
    ScenarioNotFound { domain: String, id: String },

    #[error("unknown domain: {0}")]
    UnknownDomain(String),

    #[error("malformed trace '{trace_id}': step {step_index} missing required field '{field}'")]
    MalformedTrace {
        trace_id: String,
        step_index: usize,
        field: String,
    },

    #[error("no evaluable traces ({skipped} skipped)")]
    EmptyTraceSet { skipped: usize },

    #[error("judge service error: {0}")]
    JudgeService(#[from] JudgeServiceError),

    #[error("inconsistent scoring: {0}")]
    InconsistentScoring(String),

    #[error("risk score variance {variance:.4} exceeds calibration limit {limit:.4}")]
    Calibration { variance: f64, limit: f64 },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FlywheelError {
    /// Errors that must terminate a run rather than be isolated to one trace
    /// or scenario.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::CatalogLoad { .. }
                | Self::UnknownDomain(_)
                | Self::InconsistentScoring(_)
                | Self::InvalidConfig(_)
                | Self::DigestMismatch { .. }
        )
    }

    pub(crate) fn catalog(domain: &str, reason: impl Into<String>) -> Self {
        Self::CatalogLoad {
            domain: domain.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(trace_id: &str, step_index: usize, field: &str) -> Self {
        Self::MalformedTrace {
            trace_id: trace_id.to_string(),
            step_index,
            field: field.to_string(),
        }
    }
}

/// Result type for flywheel domain operations.
pub type Result<T> = std::result::Result<T, FlywheelError>;
