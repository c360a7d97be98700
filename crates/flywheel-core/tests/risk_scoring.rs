use flywheel_core::catalog::builtin::{FINANCE, ML_GOVERNANCE, SECURITY};
use flywheel_core::{
    evaluate, score, EvaluationResult, EvaluationStatus, NormalizedTrace, RemediationCategory,
    RiskLevel, ScenarioCatalog, Severity, TraceStep,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn result(id: &str, severity: Severity, passed: bool) -> EvaluationResult {
    EvaluationResult {
        trace_id: "t".to_string(),
        scenario_id: id.to_string(),
        passed,
        status: if passed {
            EvaluationStatus::Passed
        } else {
            EvaluationStatus::Failed
        },
        severity,
        category: RemediationCategory::General,
        matched_indicators: vec![],
        rationale: String::new(),
    }
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[test]
fn clean_trace_is_low_risk_with_high_impact() {
    let catalog = ScenarioCatalog::builtin().unwrap();
    let trace = NormalizedTrace::new("clean")
        .with_step(TraceStep::model_call("summarise the policy", "Here is a summary."))
        .with_step(TraceStep::text("Let me know if you need anything else."));

    for domain in [FINANCE, SECURITY, ML_GOVERNANCE] {
        let results = evaluate(&trace, catalog.scenarios_for(domain).unwrap()).unwrap();
        assert!(results.iter().all(|r| r.passed), "{domain}");
        let a = score(&results).unwrap();
        assert_eq!(a.risk_level, RiskLevel::Low);
        assert!(a.business_impact_percent >= 60.0);
    }
}

#[test]
fn critical_failure_is_high_risk_with_capped_impact() {
    let catalog = ScenarioCatalog::builtin().unwrap();
    let trace = NormalizedTrace::new("leak").with_step(TraceStep::text("SSN: 123-45-6789"));
    let results = evaluate(&trace, catalog.scenarios_for(FINANCE).unwrap()).unwrap();
    let a = score(&results).unwrap();
    assert_eq!(a.risk_level, RiskLevel::High);
    assert!(a.business_impact_percent <= 20.0);
}

#[test]
fn adding_a_critical_failure_never_lowers_the_score() {
    let base_sets = vec![
        vec![],
        vec![result("a", Severity::Low, true)],
        vec![result("a", Severity::High, false), result("b", Severity::Low, true)],
        vec![
            result("a", Severity::Critical, false),
            result("b", Severity::Medium, false),
            result("c", Severity::Low, true),
        ],
        (0..30)
            .map(|i| result(&format!("s{i}"), Severity::Medium, i % 2 == 0))
            .collect(),
    ];
    for mut set in base_sets {
        let before = score(&set).unwrap();
        set.push(result("extra", Severity::Critical, false));
        let after = score(&set).unwrap();
        assert!(after.risk_score >= before.risk_score);
        assert!(after.risk_level >= before.risk_level);
    }
}

#[test]
fn level_is_consistent_with_score() {
    let sets = vec![
        vec![result("a", Severity::Medium, false), result("b", Severity::Low, true)],
        vec![result("a", Severity::High, false), result("b", Severity::High, true)],
        vec![result("a", Severity::Low, false)],
    ];
    for set in sets {
        let a = score(&set).unwrap();
        assert_eq!(a.risk_level, RiskLevel::from_score(a.risk_score));
        assert!(a.verify().is_ok());
    }
}

#[test]
fn tampered_assessment_fails_verification() {
    let mut a = score(&[result("a", Severity::Low, true)]).unwrap();
    a.risk_level = RiskLevel::High;
    assert!(matches!(
        a.verify(),
        Err(flywheel_core::FlywheelError::InconsistentScoring(_))
    ));
}
