//! Evaluator (judge orchestration over indicator matching).
//!
//! [`evaluate`] is the deterministic core: every failure indicator of every
//! scenario is matched against the trace and a scenario fails if any
//! indicator fires. The async [`Evaluator`] wraps it with optional judge
//! rationale and a bounded worker pool for batches.
//!
//! A malformed trace aborts evaluation of that trace only; the batch records
//! it in `skipped` and continues.

use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, instrument};

use crate::config::EvaluatorConfig;
use crate::domain::{
    EvaluationResult, EvaluationStatus, FlywheelError, MatchedIndicator, NormalizedTrace, Result,
    RiskAssessment, Scenario, SkippedTrace,
};
use crate::judge::{explain_with_retry, JudgeRequest, JudgeService, TemplateJudge};
use crate::matcher::match_indicator;
use crate::metrics::METRICS;
use crate::obs::emit_trace_skipped;
use crate::scorer::{risk_variance, score};

/// Match one scenario against a trace. Returns every matched indicator in
/// indicator order, then step order.
pub fn match_scenario(trace: &NormalizedTrace, scenario: &Scenario) -> Vec<MatchedIndicator> {
    scenario
        .indicators
        .iter()
        .flat_map(|indicator| match_indicator(indicator, trace))
        .collect()
}

fn base_result(
    trace: &NormalizedTrace,
    scenario: &Scenario,
    matched: Vec<MatchedIndicator>,
) -> EvaluationResult {
    let passed = matched.is_empty();
    let mut result = EvaluationResult {
        trace_id: trace.trace_id.clone(),
        scenario_id: scenario.id.clone(),
        passed,
        status: if passed {
            EvaluationStatus::Passed
        } else {
            EvaluationStatus::Failed
        },
        severity: scenario.severity,
        category: scenario.category,
        matched_indicators: matched,
        rationale: String::new(),
    };
    result.rationale = if passed {
        format!(
            "Scenario '{}' passed: no failure indicators matched.",
            scenario.name
        )
    } else {
        TemplateJudge::render(&judge_request(&result, scenario))
    };
    result
}

fn judge_request(result: &EvaluationResult, scenario: &Scenario) -> JudgeRequest {
    JudgeRequest {
        trace_id: result.trace_id.clone(),
        scenario_id: scenario.id.clone(),
        scenario_name: scenario.name.clone(),
        severity: scenario.severity,
        indicators: result
            .matched_indicators
            .iter()
            .map(|m| m.indicator.clone())
            .collect(),
        evidence: result
            .matched_indicators
            .iter()
            .map(|m| m.evidence.clone())
            .collect(),
        remediation: scenario.remediation.clone(),
    }
}

/// Evaluate a trace against `scenarios`, one result per scenario, in
/// scenario order. Pure and deterministic.
pub fn evaluate(trace: &NormalizedTrace, scenarios: &[Scenario]) -> Result<Vec<EvaluationResult>> {
    trace.validate()?;
    Ok(scenarios
        .iter()
        .map(|s| base_result(trace, s, match_scenario(trace, s)))
        .collect())
}

/// Results for one trace plus the judge spend incurred producing them.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceEvaluation {
    pub results: Vec<EvaluationResult>,
    pub judge_cost: f64,
}

/// Outcome of evaluating a trace set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchEvaluation {
    pub results: Vec<EvaluationResult>,
    pub skipped: Vec<SkippedTrace>,
    /// Total judge spend. The caller owns budget accounting.
    pub judge_cost: f64,
    pub batched: bool,
}

/// Async evaluator with optional judge rationale.
#[derive(Clone)]
pub struct Evaluator {
    judge: Option<Arc<dyn JudgeService>>,
    config: EvaluatorConfig,
}

impl Evaluator {
    pub fn new(config: EvaluatorConfig) -> Self {
        Self {
            judge: None,
            config,
        }
    }

    pub fn with_judge(mut self, judge: Arc<dyn JudgeService>) -> Self {
        self.judge = Some(judge);
        self
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Whether a scenario set is large enough to group judge requests.
    pub fn uses_batched_requests(&self, scenario_count: usize) -> bool {
        scenario_count > self.config.batch_threshold
    }

    /// Evaluate one trace, consulting the judge for failed results.
    ///
    /// With `batched` the failed results of the trace share one judge call;
    /// otherwise each failed result gets its own call. Given a deterministic
    /// judge both modes produce identical results.
    pub async fn evaluate_trace(
        &self,
        trace: &NormalizedTrace,
        scenarios: &[Scenario],
        batched: bool,
    ) -> Result<TraceEvaluation> {
        let mut results = evaluate(trace, scenarios)?;
        METRICS.add_evaluations(results.len() as u64);

        let Some(judge) = &self.judge else {
            return Ok(TraceEvaluation {
                results,
                judge_cost: 0.0,
            });
        };

        let failed: Vec<usize> = results
            .iter()
            .enumerate()
            .filter(|(_, r)| r.failed())
            .map(|(i, _)| i)
            .collect();
        if failed.is_empty() {
            return Ok(TraceEvaluation {
                results,
                judge_cost: 0.0,
            });
        }

        let groups: Vec<Vec<usize>> = if batched {
            vec![failed]
        } else {
            failed.into_iter().map(|i| vec![i]).collect()
        };

        let mut judge_cost = 0.0;
        for group in groups {
            let requests: Vec<JudgeRequest> = group
                .iter()
                .map(|&i| judge_request(&results[i], &scenarios[i]))
                .collect();
            let call =
                explain_with_retry(judge.as_ref(), &requests, &self.config.judge_retry).await;
            judge_cost += call.cost;
            match call.result {
                Ok(resp) => {
                    for (&i, rationale) in group.iter().zip(resp.rationales) {
                        results[i].rationale = rationale;
                    }
                }
                Err(e) => {
                    debug!(trace_id = %trace.trace_id, error = %e, "judge rationale unavailable");
                    for &i in &group {
                        results[i].status = EvaluationStatus::Indeterminate;
                        results[i]
                            .rationale
                            .push_str(&format!(" [judge unavailable: {e}]"));
                    }
                }
            }
        }

        Ok(TraceEvaluation {
            results,
            judge_cost,
        })
    }

    /// Evaluate every trace against `scenarios` on a bounded worker pool.
    ///
    /// Results are ordered by trace order, then scenario order, regardless
    /// of completion order.
    #[instrument(skip_all, fields(traces = traces.len(), scenarios = scenarios.len()))]
    pub async fn evaluate_batch(
        &self,
        traces: &[NormalizedTrace],
        scenarios: &[Scenario],
    ) -> BatchEvaluation {
        let batched = self.uses_batched_requests(scenarios.len());
        let scenarios: Arc<Vec<Scenario>> = Arc::new(scenarios.to_vec());
        let sem = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));

        let mut tasks = Vec::with_capacity(traces.len());
        for trace in traces.iter().cloned() {
            let evaluator = self.clone();
            let scenarios = Arc::clone(&scenarios);
            let sem = Arc::clone(&sem);
            tasks.push(tokio::spawn(async move {
                let _permit = sem.acquire_owned().await.ok();
                let outcome = evaluator.evaluate_trace(&trace, &scenarios, batched).await;
                (trace.trace_id, outcome)
            }));
        }

        let mut batch = BatchEvaluation {
            batched,
            ..Default::default()
        };
        for (joined, trace) in join_all(tasks).await.into_iter().zip(traces) {
            match joined {
                Ok((_, Ok(eval))) => {
                    batch.judge_cost += eval.judge_cost;
                    batch.results.extend(eval.results);
                }
                Ok((trace_id, Err(e))) => {
                    METRICS.inc_traces_skipped();
                    emit_trace_skipped(&trace_id, &e);
                    batch.skipped.push(SkippedTrace {
                        trace_id,
                        reason: e.to_string(),
                    });
                }
                Err(join_err) => {
                    METRICS.inc_traces_skipped();
                    emit_trace_skipped(&trace.trace_id, &join_err);
                    batch.skipped.push(SkippedTrace {
                        trace_id: trace.trace_id.clone(),
                        reason: format!("evaluation task failed: {join_err}"),
                    });
                }
            }
        }
        batch
    }
}

/// Result of repeated evaluation of the same trace set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub runs: usize,
    pub assessments: Vec<RiskAssessment>,
    pub variance: f64,
    pub limit: f64,
}

/// Evaluate the same traces `runs` times and fail with
/// `FlywheelError::Calibration` when the risk-score variance reaches
/// `limit`. A nondeterministic judge shows up here.
pub async fn calibrate(
    evaluator: &Evaluator,
    traces: &[NormalizedTrace],
    scenarios: &[Scenario],
    runs: usize,
    limit: f64,
) -> Result<CalibrationReport> {
    let mut assessments = Vec::with_capacity(runs);
    for _ in 0..runs {
        let batch = evaluator.evaluate_batch(traces, scenarios).await;
        assessments.push(score(&batch.results)?);
    }
    let variance = risk_variance(&assessments);
    if variance >= limit {
        return Err(FlywheelError::Calibration { variance, limit });
    }
    Ok(CalibrationReport {
        runs,
        assessments,
        variance,
        limit,
    })
}
