//! Risk scorer.
//!
//! Aggregates [`EvaluationResult`]s into a [`RiskAssessment`]:
//!
//! - `risk_score` is the severity-weighted share of failing results
//!   (critical 1.0, high 0.7, medium 0.4, low 0.15), clamped to `[0, 1]`.
//!   Any critical failure floors the score at [`HIGH_THRESHOLD`].
//! - `business_impact_percent` is the pass percentage; with `c` critical
//!   failures it is capped at [`CRITICAL_IMPACT_CAP`] and divided by `c`.
//!
//! Both adjustments keep the score monotonic: adding a failing critical
//! result can only raise it.

use std::collections::BTreeMap;

use crate::domain::{
    EvaluationResult, EvaluationStatus, Result, RiskAssessment, RiskLevel, SeverityCounts,
    HIGH_THRESHOLD,
};

/// Upper bound on business impact once any critical failure is present.
pub const CRITICAL_IMPACT_CAP: f64 = 19.0;

/// Score a result set.
pub fn score(results: &[EvaluationResult]) -> Result<RiskAssessment> {
    let mut violations = SeverityCounts::default();
    let mut total_weight = 0.0_f64;
    let mut failed_weight = 0.0_f64;
    let mut passed = 0usize;
    let mut indeterminate = 0usize;

    for r in results {
        let w = r.severity.weight();
        total_weight += w;
        if r.passed {
            passed += 1;
        } else {
            failed_weight += w;
            violations.add(r.severity);
        }
        if r.status == EvaluationStatus::Indeterminate {
            indeterminate += 1;
        }
    }

    let total = results.len();
    let failed = total - passed;

    let mut risk_score = if total_weight > 0.0 {
        (failed_weight / total_weight).clamp(0.0, 1.0)
    } else {
        0.0
    };
    if violations.critical > 0 {
        risk_score = risk_score.max(HIGH_THRESHOLD);
    }

    let pass_rate = if total > 0 {
        passed as f64 / total as f64
    } else {
        1.0
    };
    let mut business_impact_percent = 100.0 * pass_rate;
    if violations.critical > 0 {
        business_impact_percent =
            business_impact_percent.min(CRITICAL_IMPACT_CAP) / violations.critical as f64;
    }

    let assessment = RiskAssessment {
        risk_score,
        risk_level: RiskLevel::from_score(risk_score),
        business_impact_percent,
        pass_rate,
        total,
        passed,
        failed,
        indeterminate,
        violations,
    };
    assessment.verify()?;
    Ok(assessment)
}

/// Score each trace's results separately, keyed by trace id.
pub fn score_by_trace(results: &[EvaluationResult]) -> Result<BTreeMap<String, RiskAssessment>> {
    let mut grouped: BTreeMap<&str, Vec<EvaluationResult>> = BTreeMap::new();
    for r in results {
        grouped.entry(r.trace_id.as_str()).or_default().push(r.clone());
    }
    grouped
        .into_iter()
        .map(|(trace_id, rs)| Ok((trace_id.to_string(), score(&rs)?)))
        .collect()
}

/// Population variance of the risk scores.
pub fn risk_variance(assessments: &[RiskAssessment]) -> f64 {
    if assessments.len() < 2 {
        return 0.0;
    }
    let n = assessments.len() as f64;
    let mean = assessments.iter().map(|a| a.risk_score).sum::<f64>() / n;
    assessments
        .iter()
        .map(|a| (a.risk_score - mean).powi(2))
        .sum::<f64>()
        / n
}
