//! Structured observability hooks for flywheel lifecycle events.
//!
//! This module provides:
//! - A run-scoped tracing span via [`run_span`]
//! - Emission functions for state transitions, scoring, curriculum
//!   selection, skipped traces and judge retries
//!
//! Events are emitted at `info!` level unless noted. For JSON output, pass
//! `json = true` to [`crate::telemetry::init_tracing`].

use tracing::{info, warn};

use crate::domain::{CurriculumPhase, RiskLevel};

/// Span carrying `run_id` for every event of one flywheel run. Attach it
/// with [`tracing::Instrument`] so it follows the future across awaits.
///
/// # Example
///
/// ```ignore
/// controller_future.instrument(run_span("run-12345")).await
/// ```
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("flywheel.run", run_id = %run_id)
}

/// Emit event: controller moved between states.
pub fn emit_state_transition(run_id: &str, from: &str, to: &str) {
    info!(event = "flywheel.state_transition", run_id = %run_id, from = %from, to = %to);
}

/// Emit event: an iteration was scored.
pub fn emit_iteration_scored(
    run_id: &str,
    iteration: usize,
    risk_score: f64,
    risk_level: RiskLevel,
    pass_rate: f64,
    business_impact_percent: f64,
) {
    info!(
        event = "flywheel.iteration_scored",
        run_id = %run_id,
        iteration = iteration,
        risk_score = risk_score,
        risk_level = %risk_level,
        pass_rate = pass_rate,
        business_impact_percent = business_impact_percent,
    );
}

/// Emit event: a curriculum was selected for the next round.
pub fn emit_curriculum_selected(
    run_id: &str,
    iteration: usize,
    phase: CurriculumPhase,
    scenarios: usize,
    strategy: &str,
) {
    info!(
        event = "flywheel.curriculum_selected",
        run_id = %run_id,
        iteration = iteration,
        phase = %phase,
        scenarios = scenarios,
        strategy = %strategy,
    );
}

/// Emit event: run finished.
pub fn emit_flywheel_finished(run_id: &str, outcome: &str, iterations: usize, cost: f64) {
    info!(
        event = "flywheel.finished",
        run_id = %run_id,
        outcome = %outcome,
        iterations = iterations,
        cost = cost,
    );
}

/// Emit event: a trace was excluded from a batch (warning level).
pub fn emit_trace_skipped(trace_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "eval.trace_skipped", trace_id = %trace_id, error = %error);
}

/// Emit event: a judge call will be retried (warning level).
pub fn emit_judge_retry(judge: &str, attempt: u32, wait_ms: u64, error: &dyn std::fmt::Display) {
    warn!(
        event = "judge.retry",
        judge = %judge,
        attempt = attempt,
        wait_ms = wait_ms,
        error = %error,
    );
}

/// Emit event: remediation collaborator failed (warning level).
pub fn emit_remediation_failed(run_id: &str, attempt: u32, error: &dyn std::fmt::Display) {
    warn!(event = "flywheel.remediation_failed", run_id = %run_id, attempt = attempt, error = %error);
}
