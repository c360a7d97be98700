//! Flywheel iteration history and curriculum records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::eval::EvaluationResult;
use crate::domain::risk::RiskAssessment;
use crate::domain::scenario::{RemediationCategory, Severity};

/// Per-scenario tally within one iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioOutcome {
    pub scenario_id: String,
    pub severity: Severity,
    pub category: RemediationCategory,
    pub attempts: usize,
    pub failures: usize,
}

impl ScenarioOutcome {
    /// Summarise results into outcomes sorted by scenario id.
    pub fn tally(results: &[EvaluationResult]) -> Vec<ScenarioOutcome> {
        let mut by_id: BTreeMap<&str, ScenarioOutcome> = BTreeMap::new();
        for r in results {
            let entry = by_id
                .entry(r.scenario_id.as_str())
                .or_insert_with(|| ScenarioOutcome {
                    scenario_id: r.scenario_id.clone(),
                    severity: r.severity,
                    category: r.category,
                    attempts: 0,
                    failures: 0,
                });
            entry.attempts += 1;
            if r.failed() {
                entry.failures += 1;
            }
        }
        by_id.into_values().collect()
    }
}

/// Which curriculum policy produced a curriculum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurriculumPhase {
    /// Highest-severity, most-frequently failing scenarios of the last round.
    ScenarioDriven,
    /// Worst category by cumulative failure frequency.
    WeaknessTargeting,
    /// Allocation inversely weighted by smoothed per-category mastery.
    MasteryBalancing,
}

impl std::fmt::Display for CurriculumPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ScenarioDriven => write!(f, "scenario_driven"),
            Self::WeaknessTargeting => write!(f, "weakness_targeting"),
            Self::MasteryBalancing => write!(f, "mastery_balancing"),
        }
    }
}

/// One entry of a curriculum's weakness ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeaknessRank {
    pub category: RemediationCategory,
    /// Phase-specific weakness score; higher means weaker.
    pub score: f64,
}

/// The next targeted scenario subset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Curriculum {
    pub iteration: usize,
    pub phase: CurriculumPhase,
    pub scenario_ids: Vec<String>,
    pub category: Option<RemediationCategory>,
    pub ranking: Vec<WeaknessRank>,
    pub rationale: String,
}

impl Curriculum {
    /// An empty curriculum signals convergence.
    pub fn is_empty(&self) -> bool {
        self.scenario_ids.is_empty()
    }

    pub fn strategy(&self) -> Option<&'static str> {
        self.category.map(RemediationCategory::strategy)
    }
}

/// One flywheel round. History is append-only and written only by the
/// controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: usize,
    pub targeted_scenarios: Vec<String>,
    /// True when the round evaluated the whole catalog.
    pub full_sweep: bool,
    pub assessment: RiskAssessment,
    pub outcomes: Vec<ScenarioOutcome>,
    pub skipped_traces: usize,
    /// Remediation applied after this round, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<RemediationCategory>,
    pub cumulative_cost: f64,
    pub recorded_at: DateTime<Utc>,
}

impl IterationRecord {
    pub fn failing_outcomes(&self) -> impl Iterator<Item = &ScenarioOutcome> {
        self.outcomes.iter().filter(|o| o.failures > 0)
    }

    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(|o| o.failures > 0)
    }
}
