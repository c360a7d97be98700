//! Scenario definitions and their compiled, immutable form.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::domain::error::{FlywheelError, Result};

/// Scenario severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Weight a failing result of this severity contributes to the risk score.
    pub fn weight(self) -> f64 {
        match self {
            Self::Critical => 1.0,
            Self::High => 0.7,
            Self::Medium => 0.4,
            Self::Low => 0.15,
        }
    }

    /// All severities, most severe first.
    pub const DESCENDING: [Severity; 4] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
    ];
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

/// Remediation category a scenario belongs to.
///
/// Variant order doubles as the tie-break order when two categories rank
/// equally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationCategory {
    Pii,
    Aml,
    Sox,
    Bias,
    General,
}

impl RemediationCategory {
    pub const ALL: [RemediationCategory; 5] = [
        RemediationCategory::Pii,
        RemediationCategory::Aml,
        RemediationCategory::Sox,
        RemediationCategory::Bias,
        RemediationCategory::General,
    ];

    /// Infer a category from compliance-framework tags. The first tag that
    /// maps to a specific category wins.
    pub fn infer(frameworks: &[String]) -> Self {
        for tag in frameworks {
            let tag = tag.to_ascii_lowercase();
            if ["gdpr", "hipaa", "ccpa", "pii", "glba"]
                .iter()
                .any(|k| tag.contains(k))
            {
                return Self::Pii;
            }
            if ["bsa", "fatf", "aml", "kyc", "ofac"]
                .iter()
                .any(|k| tag.contains(k))
            {
                return Self::Aml;
            }
            if tag.contains("sox") || tag.contains("sarbanes") {
                return Self::Sox;
            }
            if ["fairness", "ai act", "ai_act", "ecoa", "bias"]
                .iter()
                .any(|k| tag.contains(k))
            {
                return Self::Bias;
            }
        }
        Self::General
    }

    /// Human-readable remediation strategy label.
    pub fn strategy(self) -> &'static str {
        match self {
            Self::Pii => "pii_protection",
            Self::Aml => "aml_compliance",
            Self::Sox => "sox_controls",
            Self::Bias => "bias_mitigation",
            Self::General => "general_hardening",
        }
    }
}

impl std::fmt::Display for RemediationCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pii => "pii",
            Self::Aml => "aml",
            Self::Sox => "sox",
            Self::Bias => "bias",
            Self::General => "general",
        };
        write!(f, "{s}")
    }
}

/// Built-in personally-identifiable-information detectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiKind {
    Ssn,
    CreditCard,
    Email,
    Phone,
    Iban,
}

impl PiiKind {
    fn pattern(self) -> &'static str {
        match self {
            Self::Ssn => r"\b\d{3}-\d{2}-\d{4}\b",
            Self::CreditCard => r"\b(?:\d[ -]?){13,16}\b",
            Self::Email => r"\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b",
            Self::Phone => r"\(?\b\d{3}\)?[ .-]\d{3}[ .-]\d{4}\b",
            Self::Iban => r"\b[a-z]{2}\d{2}[a-z0-9]{11,30}\b",
        }
    }
}

impl std::fmt::Display for PiiKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Ssn => "ssn",
            Self::CreditCard => "credit_card",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Iban => "iban",
        };
        write!(f, "{s}")
    }
}

/// Failure indicator as written in a catalog definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IndicatorSpec {
    /// Case-insensitive substring.
    Keyword { value: String },
    /// Case-insensitive regular expression.
    Pattern { regex: String },
    /// Built-in PII detector.
    Pii { kind: PiiKind },
    /// Tool call does not conform to the declared tool signature.
    SchemaMismatch,
    /// A tool call reported an error.
    ToolError,
}

/// A scenario record as supplied by a catalog definition source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioDefinition {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub severity: String,
    #[serde(default)]
    pub frameworks: Vec<String>,
    #[serde(default)]
    pub category: Option<RemediationCategory>,
    #[serde(default)]
    pub indicators: Vec<IndicatorSpec>,
    #[serde(default)]
    pub remediation: String,
}

/// Compiled failure-indicator predicate.
#[derive(Debug, Clone)]
pub enum FailureIndicator {
    Keyword { needle: String },
    Pattern { source: String, regex: Regex },
    Pii { kind: PiiKind, regex: Regex },
    SchemaMismatch,
    ToolError,
}

impl FailureIndicator {
    fn compile(spec: &IndicatorSpec) -> std::result::Result<Self, String> {
        match spec {
            IndicatorSpec::Keyword { value } => {
                let needle = value.trim().to_lowercase();
                if needle.is_empty() {
                    return Err("keyword indicator must not be empty".to_string());
                }
                Ok(Self::Keyword { needle })
            }
            IndicatorSpec::Pattern { regex } => {
                let compiled = case_insensitive(regex)
                    .map_err(|e| format!("invalid pattern '{regex}': {e}"))?;
                Ok(Self::Pattern {
                    source: regex.clone(),
                    regex: compiled,
                })
            }
            IndicatorSpec::Pii { kind } => {
                let regex = case_insensitive(kind.pattern())
                    .map_err(|e| format!("invalid pii pattern for {kind}: {e}"))?;
                Ok(Self::Pii { kind: *kind, regex })
            }
            IndicatorSpec::SchemaMismatch => Ok(Self::SchemaMismatch),
            IndicatorSpec::ToolError => Ok(Self::ToolError),
        }
    }

    /// Stable label used in evaluation results.
    pub fn label(&self) -> String {
        match self {
            Self::Keyword { needle } => format!("keyword:{needle}"),
            Self::Pattern { source, .. } => format!("pattern:{source}"),
            Self::Pii { kind, .. } => format!("pii:{kind}"),
            Self::SchemaMismatch => "schema_mismatch".to_string(),
            Self::ToolError => "tool_error".to_string(),
        }
    }
}

fn case_insensitive(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

/// Immutable, validated scenario owned by the catalog.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub id: String,
    pub domain: String,
    pub name: String,
    pub severity: Severity,
    pub frameworks: Vec<String>,
    pub category: RemediationCategory,
    pub indicators: Vec<FailureIndicator>,
    pub remediation: String,
}

impl Scenario {
    /// Validate and compile a definition record.
    pub fn from_definition(domain: &str, def: &ScenarioDefinition) -> Result<Self> {
        let id = def.id.trim();
        if id.is_empty() {
            return Err(FlywheelError::catalog(
                domain,
                format!("scenario '{}' is missing an id", def.name),
            ));
        }
        let severity: Severity = def
            .severity
            .parse()
            .map_err(|e: String| FlywheelError::catalog(domain, format!("scenario '{id}': {e}")))?;
        if def.indicators.is_empty() {
            return Err(FlywheelError::catalog(
                domain,
                format!("scenario '{id}' has no failure indicators"),
            ));
        }

        let indicators = def
            .indicators
            .iter()
            .map(FailureIndicator::compile)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| FlywheelError::catalog(domain, format!("scenario '{id}': {e}")))?;

        Ok(Self {
            id: id.to_string(),
            domain: domain.to_string(),
            name: def.name.clone(),
            severity,
            category: def
                .category
                .unwrap_or_else(|| RemediationCategory::infer(&def.frameworks)),
            frameworks: def.frameworks.clone(),
            indicators,
            remediation: def.remediation.clone(),
        })
    }
}
