//! Flywheel configuration.
//!
//! Values come from `FlywheelConfig::default()`, optionally overlaid by a
//! TOML file and then by `FLYWHEEL_*` environment variables. Call
//! [`FlywheelConfig::validate`] before handing the config to the controller.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::{FlywheelError, Result};

/// Metric compared against `target_pass_rate` to decide convergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceMetric {
    /// Fraction of passing evaluations (0.0 to 1.0).
    PassRate,
    /// `business_impact_percent / 100`.
    BusinessImpact,
}

/// Iteration boundaries between curriculum phases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurriculumConfig {
    /// Iterations `[0, early_iterations)` use scenario-driven selection.
    pub early_iterations: usize,
    /// Iterations `[early_iterations, middle_iterations)` use weakness
    /// targeting; later iterations use mastery balancing.
    pub middle_iterations: usize,
    pub max_scenarios_per_iteration: usize,
}

impl Default for CurriculumConfig {
    fn default() -> Self {
        Self {
            early_iterations: 2,
            middle_iterations: 5,
            max_scenarios_per_iteration: 5,
        }
    }
}

/// Judge retry controls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeRetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for JudgeRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
        }
    }
}

/// Evaluator execution controls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    /// Scenario count above which judge requests are grouped per trace.
    pub batch_threshold: usize,
    /// Maximum traces evaluated concurrently.
    pub max_concurrency: usize,
    pub judge_retry: JudgeRetryConfig,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            batch_threshold: 25,
            max_concurrency: 8,
            judge_retry: JudgeRetryConfig::default(),
        }
    }
}

/// Top-level flywheel configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlywheelConfig {
    pub target_pass_rate: f64,
    pub convergence_metric: ConvergenceMetric,
    pub max_iterations: usize,
    pub cost_budget: f64,
    pub consistency_variance_limit: f64,
    pub curriculum: CurriculumConfig,
    pub evaluator: EvaluatorConfig,
}

impl Default for FlywheelConfig {
    fn default() -> Self {
        Self {
            target_pass_rate: 0.95,
            convergence_metric: ConvergenceMetric::PassRate,
            max_iterations: 10,
            cost_budget: 100.0,
            consistency_variance_limit: 0.1,
            curriculum: CurriculumConfig::default(),
            evaluator: EvaluatorConfig::default(),
        }
    }
}

impl FlywheelConfig {
    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| FlywheelError::InvalidConfig(e.to_string()))
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Overlay `FLYWHEEL_*` environment variables.
    pub fn apply_env_overrides(self) -> Result<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, raw: String) -> Result<T> {
            raw.trim()
                .parse()
                .map_err(|_| FlywheelError::InvalidConfig(format!("{key}: cannot parse '{raw}'")))
        }

        if let Some(v) = lookup("FLYWHEEL_TARGET_PASS_RATE") {
            self.target_pass_rate = parse("FLYWHEEL_TARGET_PASS_RATE", v)?;
        }
        if let Some(v) = lookup("FLYWHEEL_MAX_ITERATIONS") {
            self.max_iterations = parse("FLYWHEEL_MAX_ITERATIONS", v)?;
        }
        if let Some(v) = lookup("FLYWHEEL_COST_BUDGET") {
            self.cost_budget = parse("FLYWHEEL_COST_BUDGET", v)?;
        }
        if let Some(v) = lookup("FLYWHEEL_MAX_SCENARIOS_PER_ITERATION") {
            self.curriculum.max_scenarios_per_iteration =
                parse("FLYWHEEL_MAX_SCENARIOS_PER_ITERATION", v)?;
        }
        if let Some(v) = lookup("FLYWHEEL_BATCH_THRESHOLD") {
            self.evaluator.batch_threshold = parse("FLYWHEEL_BATCH_THRESHOLD", v)?;
        }
        if let Some(v) = lookup("FLYWHEEL_MAX_CONCURRENCY") {
            self.evaluator.max_concurrency = parse("FLYWHEEL_MAX_CONCURRENCY", v)?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(FlywheelError::InvalidConfig(msg));

        if !(0.0..=1.0).contains(&self.target_pass_rate) {
            return invalid(format!(
                "target_pass_rate must be within [0, 1], got {}",
                self.target_pass_rate
            ));
        }
        if self.max_iterations == 0 {
            return invalid("max_iterations must be at least 1".to_string());
        }
        if !self.cost_budget.is_finite() || self.cost_budget < 0.0 {
            return invalid(format!("cost_budget must be >= 0, got {}", self.cost_budget));
        }
        if self.consistency_variance_limit <= 0.0 {
            return invalid("consistency_variance_limit must be positive".to_string());
        }
        if self.curriculum.max_scenarios_per_iteration == 0 {
            return invalid("max_scenarios_per_iteration must be at least 1".to_string());
        }
        if self.curriculum.early_iterations > self.curriculum.middle_iterations {
            return invalid(format!(
                "curriculum.early_iterations ({}) must not exceed middle_iterations ({})",
                self.curriculum.early_iterations, self.curriculum.middle_iterations
            ));
        }
        if self.evaluator.max_concurrency == 0 {
            return invalid("max_concurrency must be at least 1".to_string());
        }
        if self.evaluator.judge_retry.max_attempts == 0 {
            return invalid("judge_retry.max_attempts must be at least 1".to_string());
        }
        Ok(())
    }
}
