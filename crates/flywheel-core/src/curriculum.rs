//! Self-improvement curriculum generator.
//!
//! [`next_curriculum`] is a pure function of the iteration history and the
//! catalog. The phase is chosen by [`CurriculumPhase::for_iteration`] from
//! the index of the latest record, and each phase has its own selector:
//!
//! - [`scenario_driven`]: failing scenarios of the latest round, highest
//!   severity first, then most failures.
//! - [`weakness_targeting`]: the category with the most cumulative failures
//!   across all history (among categories still failing), and its scenarios.
//! - [`mastery_balancing`]: slots split across categories still failing, in
//!   proportion to `1 - mastery`, where mastery is the Laplace-smoothed success rate
//!   `(successes + 1) / (attempts + 2)`.
//!
//! When the latest round has no failures the curriculum is empty, which the
//! controller reads as convergence.

use std::collections::BTreeMap;

use crate::catalog::ScenarioCatalog;
use crate::config::CurriculumConfig;
use crate::domain::{
    Curriculum, CurriculumPhase, IterationRecord, RemediationCategory, Result, Scenario,
    WeaknessRank,
};

impl CurriculumPhase {
    /// Phase for the round whose latest record has index `iteration`.
    pub fn for_iteration(iteration: usize, config: &CurriculumConfig) -> Self {
        if iteration < config.early_iterations {
            Self::ScenarioDriven
        } else if iteration < config.middle_iterations {
            Self::WeaknessTargeting
        } else {
            Self::MasteryBalancing
        }
    }
}

/// Per-category totals across history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategoryStats {
    pub attempts: usize,
    pub failures: usize,
}

impl CategoryStats {
    pub fn successes(&self) -> usize {
        self.attempts - self.failures.min(self.attempts)
    }

    /// Laplace-smoothed success rate.
    pub fn mastery(&self) -> f64 {
        (self.successes() as f64 + 1.0) / (self.attempts as f64 + 2.0)
    }
}

/// Accumulate attempts and failures per category over every record.
pub fn category_stats(history: &[IterationRecord]) -> BTreeMap<RemediationCategory, CategoryStats> {
    let mut stats: BTreeMap<RemediationCategory, CategoryStats> = BTreeMap::new();
    for record in history {
        for outcome in &record.outcomes {
            let entry = stats.entry(outcome.category).or_default();
            entry.attempts += outcome.attempts;
            entry.failures += outcome.failures;
        }
    }
    stats
}

/// Build the next curriculum for `domain`.
pub fn next_curriculum(
    history: &[IterationRecord],
    catalog: &ScenarioCatalog,
    domain: &str,
    config: &CurriculumConfig,
) -> Result<Curriculum> {
    let scenarios = catalog.scenarios_for(domain)?;
    let max = config.max_scenarios_per_iteration.max(1);

    let Some(latest) = history.last() else {
        return Ok(bootstrap(scenarios, max));
    };

    for outcome in &latest.outcomes {
        catalog.scenario_by_id(domain, &outcome.scenario_id)?;
    }

    let iteration = history.len();
    let phase = CurriculumPhase::for_iteration(latest.iteration, config);
    if !latest.has_failures() {
        return Ok(Curriculum {
            iteration,
            phase,
            scenario_ids: Vec::new(),
            category: None,
            ranking: Vec::new(),
            rationale: format!(
                "iteration {} recorded no failing scenarios; nothing left to target",
                latest.iteration
            ),
        });
    }

    let mut curriculum = match phase {
        CurriculumPhase::ScenarioDriven => scenario_driven(latest, scenarios, max),
        CurriculumPhase::WeaknessTargeting => weakness_targeting(history, scenarios, max),
        CurriculumPhase::MasteryBalancing => mastery_balancing(history, scenarios, max),
    };
    curriculum.iteration = iteration;
    Ok(curriculum)
}

fn bootstrap(scenarios: &[Scenario], max: usize) -> Curriculum {
    let mut ordered: Vec<&Scenario> = scenarios.iter().collect();
    ordered.sort_by(|a, b| b.severity.cmp(&a.severity).then_with(|| a.id.cmp(&b.id)));
    ordered.truncate(max);
    Curriculum {
        iteration: 0,
        phase: CurriculumPhase::ScenarioDriven,
        category: ordered.first().map(|s| s.category),
        scenario_ids: ordered.iter().map(|s| s.id.clone()).collect(),
        ranking: Vec::new(),
        rationale: "no history yet; targeting the most severe catalog scenarios".to_string(),
    }
}

/// Phase 1: the latest round's failing scenarios.
pub fn scenario_driven(latest: &IterationRecord, scenarios: &[Scenario], max: usize) -> Curriculum {
    let mut failing: Vec<_> = latest.failing_outcomes().collect();
    failing.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| b.failures.cmp(&a.failures))
            .then_with(|| a.scenario_id.cmp(&b.scenario_id))
    });
    failing.truncate(max);

    let mut by_category: BTreeMap<RemediationCategory, usize> = BTreeMap::new();
    for o in latest.failing_outcomes() {
        *by_category.entry(o.category).or_default() += o.failures;
    }
    let ranking = rank_desc(by_category.into_iter().map(|(c, n)| (c, n as f64)));

    let category = failing.first().map(|o| o.category);
    let scenario_ids: Vec<String> = failing
        .iter()
        .filter(|o| scenarios.iter().any(|s| s.id == o.scenario_id))
        .map(|o| o.scenario_id.clone())
        .collect();

    Curriculum {
        iteration: 0,
        phase: CurriculumPhase::ScenarioDriven,
        rationale: format!(
            "targeting {} failing scenario(s) from iteration {} by severity then failure count",
            scenario_ids.len(),
            latest.iteration
        ),
        scenario_ids,
        category,
        ranking,
    }
}

/// Phase 2: the worst category by cumulative failure count.
pub fn weakness_targeting(
    history: &[IterationRecord],
    scenarios: &[Scenario],
    max: usize,
) -> Curriculum {
    let failing_now: Vec<&str> = history
        .last()
        .map(|r| r.failing_outcomes().map(|o| o.scenario_id.as_str()).collect())
        .unwrap_or_default();
    let still_failing = |c: RemediationCategory| {
        scenarios
            .iter()
            .any(|s| s.category == c && failing_now.contains(&s.id.as_str()))
    };

    let ranking = rank_desc(
        category_stats(history)
            .into_iter()
            .filter(|(c, _)| still_failing(*c))
            .map(|(c, st)| (c, st.failures as f64)),
    );

    let Some(worst) = ranking.first().map(|r| r.category) else {
        return Curriculum {
            iteration: 0,
            phase: CurriculumPhase::WeaknessTargeting,
            scenario_ids: Vec::new(),
            category: None,
            ranking,
            rationale: "no failing category found in the catalog".to_string(),
        };
    };

    let scenario_ids = pick_from_category(scenarios, worst, &failing_now, max);
    Curriculum {
        iteration: 0,
        phase: CurriculumPhase::WeaknessTargeting,
        rationale: format!(
            "category '{}' has the highest cumulative failure count ({}); targeting {} of its scenario(s)",
            worst,
            ranking[0].score,
            scenario_ids.len()
        ),
        scenario_ids,
        category: Some(worst),
        ranking,
    }
}

/// Phase 3: slots allocated in proportion to per-category weakness, among
/// categories that still have a failing scenario.
pub fn mastery_balancing(
    history: &[IterationRecord],
    scenarios: &[Scenario],
    max: usize,
) -> Curriculum {
    let failing_now: Vec<&str> = history
        .last()
        .map(|r| r.failing_outcomes().map(|o| o.scenario_id.as_str()).collect())
        .unwrap_or_default();
    let stats = category_stats(history);

    let failing: Vec<&Scenario> = scenarios
        .iter()
        .filter(|s| failing_now.contains(&s.id.as_str()))
        .collect();

    let mut capacity: BTreeMap<RemediationCategory, usize> = BTreeMap::new();
    for s in &failing {
        *capacity.entry(s.category).or_default() += 1;
    }

    let ranking = rank_desc(capacity.keys().map(|&c| {
        let mastery = stats.get(&c).copied().unwrap_or_default().mastery();
        (c, 1.0 - mastery)
    }));

    let slots = max.min(failing.len());
    let allocation = highest_averages(&ranking, &capacity, slots);

    let mut scenario_ids = Vec::with_capacity(slots);
    for rank in &ranking {
        if let Some(&n) = allocation.get(&rank.category) {
            let picked = pick_from_category(failing.iter().copied(), rank.category, &failing_now, n);
            scenario_ids.extend(picked);
        }
    }

    let summary = ranking
        .iter()
        .filter_map(|r| allocation.get(&r.category).map(|n| format!("{}={n}", r.category)))
        .collect::<Vec<_>>()
        .join(", ");
    Curriculum {
        iteration: 0,
        phase: CurriculumPhase::MasteryBalancing,
        category: ranking.first().map(|r| r.category),
        rationale: format!("slots allocated by smoothed weakness: {summary}"),
        scenario_ids,
        ranking,
    }
}

/// Distribute `slots` one at a time to the category with the largest
/// `weight / (allocated + 1)`, skipping categories at capacity. Ties go to
/// the earlier ranked category.
fn highest_averages(
    ranking: &[WeaknessRank],
    capacity: &BTreeMap<RemediationCategory, usize>,
    slots: usize,
) -> BTreeMap<RemediationCategory, usize> {
    let mut allocated: BTreeMap<RemediationCategory, usize> = BTreeMap::new();
    for _ in 0..slots {
        let mut best: Option<(RemediationCategory, f64)> = None;
        for r in ranking {
            let used = allocated.get(&r.category).copied().unwrap_or(0);
            if used >= capacity.get(&r.category).copied().unwrap_or(0) {
                continue;
            }
            let quotient = r.score / (used as f64 + 1.0);
            if best.map_or(true, |(_, q)| quotient > q) {
                best = Some((r.category, quotient));
            }
        }
        match best {
            Some((c, _)) => *allocated.entry(c).or_default() += 1,
            None => break,
        }
    }
    allocated
}

/// Scenarios of `category`: currently failing first, then by severity
/// (highest first), then id.
fn pick_from_category<'a>(
    scenarios: impl IntoIterator<Item = &'a Scenario>,
    category: RemediationCategory,
    failing_now: &[&str],
    n: usize,
) -> Vec<String> {
    let mut members: Vec<&Scenario> = scenarios
        .into_iter()
        .filter(|s| s.category == category)
        .collect();
    members.sort_by(|a, b| {
        let fa = failing_now.contains(&a.id.as_str());
        let fb = failing_now.contains(&b.id.as_str());
        fb.cmp(&fa)
            .then_with(|| b.severity.cmp(&a.severity))
            .then_with(|| a.id.cmp(&b.id))
    });
    members.into_iter().take(n).map(|s| s.id.clone()).collect()
}

fn rank_desc(scores: impl Iterator<Item = (RemediationCategory, f64)>) -> Vec<WeaknessRank> {
    let mut ranking: Vec<WeaknessRank> = scores
        .map(|(category, score)| WeaknessRank { category, score })
        .collect();
    ranking.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.category.cmp(&b.category))
    });
    ranking
}
