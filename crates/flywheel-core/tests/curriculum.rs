use chrono::Utc;

use flywheel_core::catalog::builtin::FINANCE;
use flywheel_core::{
    next_curriculum, score, CurriculumConfig, CurriculumPhase, IterationRecord,
    RemediationCategory, ScenarioCatalog, ScenarioOutcome, Severity,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn outcome(id: &str, attempts: usize, failures: usize) -> ScenarioOutcome {
    let catalog = ScenarioCatalog::builtin().unwrap();
    let s = catalog.scenario_by_id(FINANCE, id).unwrap();
    ScenarioOutcome {
        scenario_id: id.to_string(),
        severity: s.severity,
        category: s.category,
        attempts,
        failures,
    }
}

fn record(iteration: usize, outcomes: Vec<ScenarioOutcome>) -> IterationRecord {
    IterationRecord {
        iteration,
        targeted_scenarios: outcomes.iter().map(|o| o.scenario_id.clone()).collect(),
        full_sweep: true,
        assessment: score(&[]).unwrap(),
        outcomes,
        skipped_traces: 0,
        remediation: None,
        cumulative_cost: 0.0,
        recorded_at: Utc::now(),
    }
}

fn config(early: usize, middle: usize, max: usize) -> CurriculumConfig {
    CurriculumConfig {
        early_iterations: early,
        middle_iterations: middle,
        max_scenarios_per_iteration: max,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn empty_history_targets_most_severe_scenarios() {
    let catalog = ScenarioCatalog::builtin().unwrap();
    let c = next_curriculum(&[], &catalog, FINANCE, &config(2, 5, 3)).unwrap();
    assert_eq!(c.iteration, 0);
    assert_eq!(
        c.scenario_ids,
        vec!["fin-pii-exposure", "fin-unauthorized-trade", "fin-aml-structuring"]
    );
}

#[test]
fn weakness_targeting_picks_worst_cumulative_category() {
    let catalog = ScenarioCatalog::builtin().unwrap();
    let history = vec![
        record(
            0,
            vec![
                outcome("fin-aml-structuring", 4, 3),
                outcome("fin-pii-exposure", 4, 1),
            ],
        ),
        record(
            1,
            vec![
                outcome("fin-aml-structuring", 4, 1),
                outcome("fin-pii-exposure", 4, 1),
            ],
        ),
    ];
    let c = next_curriculum(&history, &catalog, FINANCE, &config(1, 3, 5)).unwrap();
    assert_eq!(c.phase, CurriculumPhase::WeaknessTargeting);
    assert_eq!(c.category, Some(RemediationCategory::Aml));
    assert_eq!(c.scenario_ids, vec!["fin-aml-structuring"]);
    assert_eq!(c.ranking[0].score, 4.0);
    assert_eq!(c.strategy(), Some("aml_compliance"));
}

#[test]
fn weakness_targeting_ignores_resolved_categories() {
    let catalog = ScenarioCatalog::builtin().unwrap();
    let history = vec![
        record(0, vec![outcome("fin-aml-structuring", 4, 4)]),
        record(
            1,
            vec![
                outcome("fin-aml-structuring", 4, 0),
                outcome("fin-pii-exposure", 4, 1),
            ],
        ),
    ];
    let c = next_curriculum(&history, &catalog, FINANCE, &config(1, 3, 5)).unwrap();
    assert_eq!(c.category, Some(RemediationCategory::Pii));
    assert_eq!(c.scenario_ids, vec!["fin-pii-exposure"]);
}

#[test]
fn mastery_balancing_allocates_toward_weak_categories() {
    let catalog = ScenarioCatalog::builtin().unwrap();
    let history = vec![record(
        0,
        vec![
            outcome("fin-pii-exposure", 10, 9),
            outcome("fin-aml-structuring", 10, 0),
            outcome("fin-sox-audit-trail", 10, 5),
        ],
    )];
    let c = next_curriculum(&history, &catalog, FINANCE, &config(0, 0, 4)).unwrap();
    assert_eq!(c.phase, CurriculumPhase::MasteryBalancing);
    assert_eq!(c.category, Some(RemediationCategory::Pii));
    assert_eq!(c.scenario_ids, vec!["fin-pii-exposure", "fin-sox-audit-trail"]);
    assert!(!c.scenario_ids.contains(&"fin-aml-structuring".to_string()));
    assert!(!c.scenario_ids.contains(&"fin-unsuitable-advice".to_string()));

    let one = next_curriculum(&history, &catalog, FINANCE, &config(0, 0, 1)).unwrap();
    assert_eq!(one.scenario_ids, vec!["fin-pii-exposure"]);
}

#[test]
fn mastery_balancing_targets_the_only_failing_category() {
    let catalog = ScenarioCatalog::builtin().unwrap();
    // pii was weak for a long time but is now clean; aml just started failing
    let history = vec![
        record(0, vec![outcome("fin-pii-exposure", 20, 20)]),
        record(
            1,
            vec![
                outcome("fin-pii-exposure", 1, 0),
                outcome("fin-aml-structuring", 1, 1),
            ],
        ),
    ];
    let c = next_curriculum(&history, &catalog, FINANCE, &config(0, 0, 1)).unwrap();
    assert_eq!(c.phase, CurriculumPhase::MasteryBalancing);
    assert_eq!(c.category, Some(RemediationCategory::Aml));
    assert_eq!(c.scenario_ids, vec!["fin-aml-structuring"]);
}

#[test]
fn scenario_driven_bounded_by_max() {
    let catalog = ScenarioCatalog::builtin().unwrap();
    let history = vec![record(
        0,
        vec![
            outcome("fin-pii-exposure", 1, 1),
            outcome("fin-aml-structuring", 1, 1),
            outcome("fin-sox-audit-trail", 1, 1),
            outcome("fin-unsuitable-advice", 1, 1),
        ],
    )];
    let c = next_curriculum(&history, &catalog, FINANCE, &config(2, 5, 2)).unwrap();
    assert_eq!(c.phase, CurriculumPhase::ScenarioDriven);
    assert_eq!(c.scenario_ids.len(), 2);
    let severities: Vec<Severity> = c
        .scenario_ids
        .iter()
        .map(|id| catalog.scenario_by_id(FINANCE, id).unwrap().severity)
        .collect();
    assert_eq!(severities, vec![Severity::Critical, Severity::High]);
}

#[test]
fn curriculum_is_a_pure_function_of_history() {
    let catalog = ScenarioCatalog::builtin().unwrap();
    let history = vec![
        record(0, vec![outcome("fin-pii-exposure", 2, 2)]),
        record(1, vec![outcome("fin-sox-audit-trail", 2, 1)]),
        record(2, vec![outcome("fin-sox-audit-trail", 2, 1)]),
    ];
    for cfg in [config(5, 9, 3), config(1, 9, 3), config(0, 0, 3)] {
        let a = next_curriculum(&history, &catalog, FINANCE, &cfg).unwrap();
        let b = next_curriculum(&history, &catalog, FINANCE, &cfg).unwrap();
        assert_eq!(a, b);
        assert!(!a.is_empty());
        for id in &a.scenario_ids {
            assert!(catalog.scenario_by_id(FINANCE, id).is_ok());
        }
    }
}

#[test]
fn converged_history_yields_empty_curriculum() {
    let catalog = ScenarioCatalog::builtin().unwrap();
    let history = vec![
        record(0, vec![outcome("fin-pii-exposure", 2, 2)]),
        record(1, vec![outcome("fin-pii-exposure", 2, 0)]),
    ];
    let c = next_curriculum(&history, &catalog, FINANCE, &config(1, 3, 5)).unwrap();
    assert!(c.is_empty());
    assert_eq!(c.strategy(), None);
}
