//! Flywheel controller.
//!
//! Drives `INIT -> EVALUATING -> SCORING -> CURRICULUM -> APPLYING` rounds
//! until the convergence metric reaches its target on a full-catalog sweep
//! (`CONVERGED`), a budget runs out (`BUDGET_EXHAUSTED`), or the cancellation
//! signal is raised (`CANCELLED`, checked only between iterations).
//!
//! The first round evaluates the full catalog. After remediation only the
//! curriculum's scenarios are evaluated; when such a subset round meets the
//! target, the next round is a full confirmation sweep on the same traces.
//!
//! The controller owns the [`BudgetTracker`] and the iteration history and
//! is their only writer.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::budget::{BudgetReason, BudgetTracker};
use crate::catalog::ScenarioCatalog;
use crate::config::{ConvergenceMetric, FlywheelConfig};
use crate::curriculum::next_curriculum;
use crate::domain::{
    Curriculum, EvaluationResult, FlywheelError, IterationRecord, NormalizedTrace, Result,
    RiskAssessment, Scenario, ScenarioOutcome, SkippedTrace,
};
use crate::evaluator::{evaluate, Evaluator};
use crate::judge::JudgeService;
use crate::metrics::METRICS;
use crate::obs::{
    emit_curriculum_selected, emit_flywheel_finished, emit_iteration_scored,
    emit_remediation_failed, emit_state_transition, run_span,
};
use crate::remediation::{RemediationOutcome, Remediator};
use crate::scorer::score;

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlywheelState {
    Init,
    Evaluating,
    Scoring,
    Curriculum,
    Applying,
    Converged,
    BudgetExhausted,
    Cancelled,
}

impl FlywheelState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Converged | Self::BudgetExhausted | Self::Cancelled)
    }
}

impl std::fmt::Display for FlywheelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Init => "INIT",
            Self::Evaluating => "EVALUATING",
            Self::Scoring => "SCORING",
            Self::Curriculum => "CURRICULUM",
            Self::Applying => "APPLYING",
            Self::Converged => "CONVERGED",
            Self::BudgetExhausted => "BUDGET_EXHAUSTED",
            Self::Cancelled => "CANCELLED",
        };
        write!(f, "{s}")
    }
}

/// How a run ended. Budget exhaustion is a normal outcome, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FlywheelOutcome {
    Converged,
    BudgetExhausted { reason: BudgetReason },
    Cancelled,
}

impl FlywheelOutcome {
    pub fn state(&self) -> FlywheelState {
        match self {
            Self::Converged => FlywheelState::Converged,
            Self::BudgetExhausted { .. } => FlywheelState::BudgetExhausted,
            Self::Cancelled => FlywheelState::Cancelled,
        }
    }
}

/// Everything a finished run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlywheelReport {
    pub run_id: String,
    pub domain: String,
    pub catalog_version: String,
    pub outcome: FlywheelOutcome,
    pub history: Vec<IterationRecord>,
    /// Full-catalog results for the final trace set.
    pub final_results: Vec<EvaluationResult>,
    pub final_assessment: RiskAssessment,
    /// Traces skipped in the final evaluation.
    pub skipped: Vec<SkippedTrace>,
    pub total_cost: f64,
    /// States visited, in order.
    pub states: Vec<FlywheelState>,
}

impl FlywheelReport {
    pub fn iterations(&self) -> usize {
        self.history.len()
    }

    pub fn converged(&self) -> bool {
        self.outcome == FlywheelOutcome::Converged
    }
}

/// Orchestrates evaluation, scoring, curriculum and remediation rounds.
pub struct FlywheelController {
    run_id: String,
    domain: String,
    catalog: Arc<ScenarioCatalog>,
    config: FlywheelConfig,
    evaluator: Evaluator,
    remediator: Arc<dyn Remediator>,
    cancel: Option<watch::Receiver<bool>>,
}

impl FlywheelController {
    /// Validates the config and the domain up front; both are fatal.
    pub fn new(
        catalog: Arc<ScenarioCatalog>,
        domain: impl Into<String>,
        config: FlywheelConfig,
        remediator: Arc<dyn Remediator>,
    ) -> Result<Self> {
        config.validate()?;
        let domain = domain.into();
        catalog.scenarios_for(&domain)?;
        Ok(Self {
            run_id: format!("run-{}", Uuid::new_v4()),
            domain,
            catalog,
            evaluator: Evaluator::new(config.evaluator.clone()),
            config,
            remediator,
            cancel: None,
        })
    }

    pub fn with_judge(mut self, judge: Arc<dyn JudgeService>) -> Self {
        self.evaluator = self.evaluator.with_judge(judge);
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    /// Stop at the next iteration boundary once the receiver reads `true`.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Run from an empty history.
    pub async fn run(&self, baseline: Vec<NormalizedTrace>) -> Result<FlywheelReport> {
        self.resume(baseline, Vec::new()).await
    }

    /// Continue a run from persisted history. Budget usage is rebuilt from
    /// the history, and the first round is a full sweep over `traces`.
    pub async fn resume(
        &self,
        traces: Vec<NormalizedTrace>,
        history: Vec<IterationRecord>,
    ) -> Result<FlywheelReport> {
        self.drive(traces, history)
            .instrument(run_span(&self.run_id))
            .await
    }

    async fn drive(
        &self,
        traces: Vec<NormalizedTrace>,
        history: Vec<IterationRecord>,
    ) -> Result<FlywheelReport> {
        let full: Vec<Scenario> = self.catalog.scenarios_for(&self.domain)?.to_vec();

        let mut run = RunState {
            run_id: &self.run_id,
            state: FlywheelState::Init,
            states: vec![FlywheelState::Init],
            budget: BudgetTracker::resume(
                self.config.max_iterations,
                self.config.cost_budget,
                &history,
            ),
            history,
            traces,
            last_full: None,
        };
        let mut active = full.clone();
        let mut full_sweep = true;

        info!(
            domain = %self.domain,
            traces = run.traces.len(),
            scenarios = full.len(),
            resumed_iterations = run.history.len(),
            "flywheel run starting"
        );

        let outcome = loop {
            if self.cancelled() {
                break FlywheelOutcome::Cancelled;
            }
            // Covers resumed history and remediation spend.
            if let Some(reason) = run.budget.check() {
                break FlywheelOutcome::BudgetExhausted { reason };
            }

            run.transition(FlywheelState::Evaluating);
            let batch = self.evaluator.evaluate_batch(&run.traces, &active).await;
            run.budget.charge(batch.judge_cost);
            if batch.results.is_empty() && !active.is_empty() {
                return Err(FlywheelError::EmptyTraceSet {
                    skipped: batch.skipped.len(),
                });
            }

            run.transition(FlywheelState::Scoring);
            let assessment = score(&batch.results)?;
            let iteration = run.history.len();
            run.history.push(IterationRecord {
                iteration,
                targeted_scenarios: active.iter().map(|s| s.id.clone()).collect(),
                full_sweep,
                assessment: assessment.clone(),
                outcomes: ScenarioOutcome::tally(&batch.results),
                skipped_traces: batch.skipped.len(),
                remediation: None,
                cumulative_cost: run.budget.spent(),
                recorded_at: Utc::now(),
            });
            run.budget.record_iteration();
            run.last_full = full_sweep.then(|| (batch.results, batch.skipped));
            METRICS.inc_iterations();
            emit_iteration_scored(
                &self.run_id,
                iteration,
                assessment.risk_score,
                assessment.risk_level,
                assessment.pass_rate,
                assessment.business_impact_percent,
            );

            let target_met = self.target_met(&assessment);
            if target_met && full_sweep {
                break FlywheelOutcome::Converged;
            }
            if let Some(reason) = run.budget.check() {
                break FlywheelOutcome::BudgetExhausted { reason };
            }
            if target_met {
                active = full.clone();
                full_sweep = true;
                continue;
            }

            run.transition(FlywheelState::Curriculum);
            let curriculum =
                next_curriculum(&run.history, &self.catalog, &self.domain, &self.config.curriculum)?;
            emit_curriculum_selected(
                &self.run_id,
                curriculum.iteration,
                curriculum.phase,
                curriculum.scenario_ids.len(),
                curriculum.strategy().unwrap_or("none"),
            );
            if curriculum.is_empty() {
                if full_sweep {
                    break FlywheelOutcome::Converged;
                }
                active = full.clone();
                full_sweep = true;
                continue;
            }

            run.transition(FlywheelState::Applying);
            let remediated = match self
                .apply_with_retry(&curriculum, &run.traces, &mut run.budget)
                .await
            {
                Ok(out) => out,
                Err(error) => {
                    break FlywheelOutcome::BudgetExhausted {
                        reason: BudgetReason::RemediationFailed { error },
                    }
                }
            };
            if let Some(last) = run.history.last_mut() {
                last.remediation = curriculum.category;
                last.cumulative_cost = run.budget.spent();
            }
            run.traces = remediated.traces;
            run.last_full = None;

            active = self.catalog.select(&self.domain, &curriculum.scenario_ids)?;
            full_sweep = active.len() == full.len();
        };

        run.transition(outcome.state());
        let (final_results, final_skipped) = self.closing_sweep(&mut run, &full);
        let final_assessment = score(&final_results)?;

        emit_flywheel_finished(
            &self.run_id,
            &outcome.state().to_string(),
            run.history.len(),
            run.budget.spent(),
        );
        METRICS.flush();

        Ok(FlywheelReport {
            run_id: self.run_id.clone(),
            domain: self.domain.clone(),
            catalog_version: self.catalog.version().to_string(),
            outcome,
            total_cost: run.budget.spent(),
            history: run.history,
            final_results,
            final_assessment,
            skipped: final_skipped,
            states: run.states,
        })
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    fn target_met(&self, assessment: &RiskAssessment) -> bool {
        let value = match self.config.convergence_metric {
            ConvergenceMetric::PassRate => assessment.pass_rate,
            ConvergenceMetric::BusinessImpact => assessment.business_impact_percent / 100.0,
        };
        value >= self.config.target_pass_rate
    }

    /// Apply the curriculum; on failure retry once with the same curriculum.
    /// An outcome with no evaluable traces counts as a failure, and its cost
    /// is still charged.
    async fn apply_with_retry(
        &self,
        curriculum: &Curriculum,
        traces: &[NormalizedTrace],
        budget: &mut BudgetTracker,
    ) -> std::result::Result<RemediationOutcome, String> {
        let mut last_error = String::new();
        for attempt in 1..=2u32 {
            match self.remediator.apply(curriculum, traces).await {
                Ok(out) => {
                    budget.charge(out.cost);
                    let e = if out.traces.is_empty() {
                        "remediator returned no traces"
                    } else if out.traces.iter().all(|t| t.validate().is_err()) {
                        "remediator returned no evaluable traces"
                    } else {
                        return Ok(out);
                    };
                    emit_remediation_failed(&self.run_id, attempt, &e);
                    last_error = e.to_string();
                }
                Err(e) => {
                    emit_remediation_failed(&self.run_id, attempt, &e);
                    last_error = format!("{e:#}");
                }
            }
        }
        warn!(
            remediator = self.remediator.name(),
            iteration = curriculum.iteration,
            "remediation failed twice; stopping"
        );
        Err(last_error)
    }

    /// Full-catalog results for the final traces. Reuses the last round when
    /// it was a full sweep over the current traces; otherwise re-runs the
    /// deterministic matcher, which spends no budget.
    fn closing_sweep(
        &self,
        run: &mut RunState<'_>,
        full: &[Scenario],
    ) -> (Vec<EvaluationResult>, Vec<SkippedTrace>) {
        if let Some(last) = run.last_full.take() {
            return last;
        }
        let mut results = Vec::new();
        let mut skipped = Vec::new();
        for trace in &run.traces {
            match evaluate(trace, full) {
                Ok(rs) => results.extend(rs),
                Err(e) => skipped.push(SkippedTrace {
                    trace_id: trace.trace_id.clone(),
                    reason: e.to_string(),
                }),
            }
        }
        (results, skipped)
    }
}

struct RunState<'a> {
    run_id: &'a str,
    state: FlywheelState,
    states: Vec<FlywheelState>,
    budget: BudgetTracker,
    history: Vec<IterationRecord>,
    traces: Vec<NormalizedTrace>,
    /// Results of the latest round if it swept the full catalog over the
    /// current traces.
    last_full: Option<(Vec<EvaluationResult>, Vec<SkippedTrace>)>,
}

impl RunState<'_> {
    fn transition(&mut self, to: FlywheelState) {
        if self.state == to {
            return;
        }
        emit_state_transition(self.run_id, &self.state.to_string(), &to.to_string());
        self.state = to;
        self.states.push(to);
    }
}
