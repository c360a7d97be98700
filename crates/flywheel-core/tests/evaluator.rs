use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use flywheel_core::catalog::builtin::{FINANCE, SECURITY};
use flywheel_core::{
    calibrate, evaluate, EvaluationStatus, Evaluator, EvaluatorConfig, FlywheelError,
    JudgeRequest, JudgeResponse, JudgeRetryConfig, JudgeService, JudgeServiceError,
    NormalizedTrace, ParamType, RiskLevel, ScenarioCatalog, SchemaMismatchKind, Severity,
    ToolSignature, TraceStep,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn catalog() -> ScenarioCatalog {
    ScenarioCatalog::builtin().expect("builtin catalog")
}

fn ssn_trace(id: &str) -> NormalizedTrace {
    NormalizedTrace::new(id)
        .with_step(TraceStep::model_call("look up the customer", "found them"))
        .with_step(TraceStep::text("SSN: 123-45-6789"))
}

fn clean_trace(id: &str) -> NormalizedTrace {
    NormalizedTrace::new(id).with_step(TraceStep::text("Your request has been recorded."))
}

/// Deterministic judge that counts calls and requests.
#[derive(Default)]
struct CountingJudge {
    calls: AtomicUsize,
    requests: AtomicUsize,
}

#[async_trait]
impl JudgeService for CountingJudge {
    fn name(&self) -> &str {
        "counting"
    }

    async fn explain(&self, requests: &[JudgeRequest]) -> Result<JudgeResponse, JudgeServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.fetch_add(requests.len(), Ordering::SeqCst);
        Ok(JudgeResponse {
            rationales: requests
                .iter()
                .map(|r| format!("{} failed on {}", r.scenario_id, r.trace_id))
                .collect(),
            cost: 0.25 * requests.len() as f64,
        })
    }
}

struct DownJudge;

#[async_trait]
impl JudgeService for DownJudge {
    fn name(&self) -> &str {
        "down"
    }

    async fn explain(&self, _: &[JudgeRequest]) -> Result<JudgeResponse, JudgeServiceError> {
        Err(JudgeServiceError::Unavailable("connection refused".into()))
    }
}

/// Bills for the call but returns no rationales.
struct MuteJudge;

#[async_trait]
impl JudgeService for MuteJudge {
    fn name(&self) -> &str {
        "mute"
    }

    async fn explain(&self, _: &[JudgeRequest]) -> Result<JudgeResponse, JudgeServiceError> {
        Ok(JudgeResponse {
            rationales: vec![],
            cost: 0.4,
        })
    }
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

#[test]
fn ssn_in_output_fails_pii_scenario_with_critical_severity() {
    let catalog = catalog();
    let results = evaluate(&ssn_trace("t1"), catalog.scenarios_for(FINANCE).unwrap()).unwrap();

    let pii = results
        .iter()
        .find(|r| r.scenario_id == "fin-pii-exposure")
        .expect("pii scenario evaluated");
    assert!(!pii.passed);
    assert_eq!(pii.severity, Severity::Critical);
    assert!(pii.matched_indicators[0].evidence.contains("123-45-6789"));

    let assessment = flywheel_core::score(&results).unwrap();
    assert_eq!(assessment.violations.critical, 1);
    assert_eq!(assessment.risk_level, RiskLevel::High);
}

#[test]
fn search_term_against_query_is_parameter_name_mismatch() {
    let catalog = catalog();
    let trace = NormalizedTrace::new("t2")
        .with_tool(ToolSignature::new("search").param("query", ParamType::String, true))
        .with_step(TraceStep::tool_call(
            "search",
            json!({"search_term": "mortgage rates"}),
            json!([]),
        ));
    let results = evaluate(&trace, catalog.scenarios_for(SECURITY).unwrap()).unwrap();

    let mismatch = results
        .iter()
        .find(|r| r.scenario_id == "sec-tool-schema-mismatch")
        .unwrap();
    assert!(!mismatch.passed);
    assert!(mismatch
        .mismatch_kinds()
        .contains(&SchemaMismatchKind::ParameterNameMismatch));
    assert_eq!(
        mismatch.matched_indicators[0].mismatch.unwrap().as_str(),
        "parameter_name_mismatch"
    );
}

#[test]
fn any_single_indicator_fails_the_scenario() {
    let catalog = catalog();
    let trace = NormalizedTrace::new("t")
        .with_step(TraceStep::text("Sure, we can split the transfer into smaller parts."));
    let results = evaluate(&trace, catalog.scenarios_for(FINANCE).unwrap()).unwrap();
    let failed: Vec<_> = results.iter().filter(|r| !r.passed).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].scenario_id, "fin-aml-structuring");
}

#[test]
fn same_pair_evaluates_identically() {
    let catalog = catalog();
    let scenarios = catalog.scenarios_for(FINANCE).unwrap();
    let trace = ssn_trace("t3");
    let first = evaluate(&trace, scenarios).unwrap();
    let second = evaluate(&trace, scenarios).unwrap();
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

#[test]
fn step_without_kind_is_malformed() {
    let catalog = catalog();
    let mut step = TraceStep::text("hi");
    step.kind = None;
    let trace = NormalizedTrace::new("bad").with_step(step);
    let err = evaluate(&trace, catalog.scenarios_for(FINANCE).unwrap()).unwrap_err();
    assert!(matches!(
        err,
        FlywheelError::MalformedTrace { ref field, .. } if field == "kind"
    ));
}

// ---------------------------------------------------------------------------
// Batches and judge
// ---------------------------------------------------------------------------

#[tokio::test]
async fn batch_results_follow_trace_order() {
    let catalog = catalog();
    let scenarios = catalog.scenarios_for(FINANCE).unwrap();
    let traces: Vec<_> = (0..20)
        .map(|i| {
            if i % 3 == 0 {
                ssn_trace(&format!("t{i:02}"))
            } else {
                clean_trace(&format!("t{i:02}"))
            }
        })
        .collect();
    let config = EvaluatorConfig {
        max_concurrency: 4,
        ..Default::default()
    };
    let batch = Evaluator::new(config).evaluate_batch(&traces, scenarios).await;

    assert_eq!(batch.results.len(), traces.len() * scenarios.len());
    let trace_order: Vec<_> = batch
        .results
        .chunks(scenarios.len())
        .map(|c| c[0].trace_id.clone())
        .collect();
    let expected: Vec<_> = traces.iter().map(|t| t.trace_id.clone()).collect();
    assert_eq!(trace_order, expected);
    assert_eq!(batch.judge_cost, 0.0);
}

#[tokio::test]
async fn batched_and_unbatched_modes_produce_identical_results() {
    let catalog = catalog();
    let scenarios = catalog.scenarios_for(FINANCE).unwrap();
    let traces = vec![
        ssn_trace("a"),
        NormalizedTrace::new("b")
            .with_step(TraceStep::text("SSN: 987-65-4321, guaranteed returns!")),
        clean_trace("c"),
    ];

    let unbatched_judge = Arc::new(CountingJudge::default());
    let unbatched = Evaluator::new(EvaluatorConfig {
        batch_threshold: 100,
        ..Default::default()
    })
    .with_judge(unbatched_judge.clone())
    .evaluate_batch(&traces, scenarios)
    .await;

    let batched_judge = Arc::new(CountingJudge::default());
    let batched = Evaluator::new(EvaluatorConfig {
        batch_threshold: 1,
        ..Default::default()
    })
    .with_judge(batched_judge.clone())
    .evaluate_batch(&traces, scenarios)
    .await;

    assert!(!unbatched.batched);
    assert!(batched.batched);
    assert_eq!(unbatched.results, batched.results);
    assert_eq!(unbatched.judge_cost, batched.judge_cost);

    // three failed results across two traces
    assert_eq!(unbatched_judge.calls.load(Ordering::SeqCst), 3);
    assert_eq!(batched_judge.calls.load(Ordering::SeqCst), 2);
    assert_eq!(batched_judge.requests.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn judge_only_supplies_rationale() {
    let catalog = catalog();
    let scenarios = catalog.scenarios_for(FINANCE).unwrap();
    let traces = vec![ssn_trace("a")];

    let plain = Evaluator::new(EvaluatorConfig::default())
        .evaluate_batch(&traces, scenarios)
        .await;
    let judged = Evaluator::new(EvaluatorConfig::default())
        .with_judge(Arc::new(CountingJudge::default()))
        .evaluate_batch(&traces, scenarios)
        .await;

    for (p, j) in plain.results.iter().zip(&judged.results) {
        assert_eq!(p.passed, j.passed);
        assert_eq!(p.matched_indicators, j.matched_indicators);
    }
    let pii = judged
        .results
        .iter()
        .find(|r| r.scenario_id == "fin-pii-exposure")
        .unwrap();
    assert_eq!(pii.rationale, "fin-pii-exposure failed on a");
    assert_eq!(judged.judge_cost, 0.25);
}

#[tokio::test(start_paused = true)]
async fn judge_failure_marks_result_indeterminate_not_passed() {
    let catalog = catalog();
    let scenarios = catalog.scenarios_for(FINANCE).unwrap();
    let config = EvaluatorConfig {
        judge_retry: JudgeRetryConfig {
            max_attempts: 2,
            initial_backoff_ms: 10,
            max_backoff_ms: 10,
        },
        ..Default::default()
    };
    let batch = Evaluator::new(config)
        .with_judge(Arc::new(DownJudge))
        .evaluate_batch(&[ssn_trace("a")], scenarios)
        .await;

    let pii = batch
        .results
        .iter()
        .find(|r| r.scenario_id == "fin-pii-exposure")
        .unwrap();
    assert_eq!(pii.status, EvaluationStatus::Indeterminate);
    assert!(!pii.passed);
    assert!(pii.rationale.contains("judge unavailable"));

    let assessment = flywheel_core::score(&batch.results).unwrap();
    assert_eq!(assessment.indeterminate, 1);
    assert_eq!(assessment.violations.critical, 1);
}

#[tokio::test]
async fn rejected_judge_reply_is_still_billed() {
    let catalog = catalog();
    let scenarios = catalog.scenarios_for(FINANCE).unwrap();
    let batch = Evaluator::new(EvaluatorConfig::default())
        .with_judge(Arc::new(MuteJudge))
        .evaluate_batch(&[ssn_trace("a")], scenarios)
        .await;

    let pii = batch
        .results
        .iter()
        .find(|r| r.scenario_id == "fin-pii-exposure")
        .unwrap();
    assert_eq!(pii.status, EvaluationStatus::Indeterminate);
    assert!(pii.rationale.contains("expected 1 rationales, got 0"));
    // wrong-count replies are not retried, so exactly one bill
    assert_eq!(batch.judge_cost, 0.4);
}

// ---------------------------------------------------------------------------
// Calibration
// ---------------------------------------------------------------------------

#[tokio::test]
async fn five_runs_have_variance_below_limit() {
    let catalog = catalog();
    let scenarios = catalog.scenarios_for(FINANCE).unwrap();
    let traces = vec![ssn_trace("a"), clean_trace("b")];
    let evaluator = Evaluator::new(EvaluatorConfig::default())
        .with_judge(Arc::new(CountingJudge::default()));

    let report = calibrate(&evaluator, &traces, scenarios, 5, 0.1).await.unwrap();
    assert_eq!(report.assessments.len(), 5);
    assert!(report.variance < 0.1);
}

#[tokio::test]
async fn calibration_limit_is_enforced() {
    let catalog = catalog();
    let scenarios = catalog.scenarios_for(FINANCE).unwrap();
    let evaluator = Evaluator::new(EvaluatorConfig::default());
    let err = calibrate(&evaluator, &[ssn_trace("a")], scenarios, 3, 0.0)
        .await
        .unwrap_err();
    assert!(matches!(err, FlywheelError::Calibration { .. }));
}
