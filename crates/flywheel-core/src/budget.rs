//! Iteration and cost budget tracking.

use serde::{Deserialize, Serialize};

use crate::domain::IterationRecord;

/// Why a run stopped without converging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum BudgetReason {
    /// `max_iterations` rounds completed.
    Iterations,
    /// Judge and remediation spend reached the cost ceiling.
    Cost,
    /// The remediation step failed twice in a row.
    RemediationFailed { error: String },
}

impl std::fmt::Display for BudgetReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Iterations => write!(f, "iteration limit reached"),
            Self::Cost => write!(f, "cost budget exhausted"),
            Self::RemediationFailed { error } => write!(f, "remediation failed: {error}"),
        }
    }
}

/// Counts iterations and spend against the configured ceilings.
///
/// Spend is charged only by the controller, after each batch returns its
/// total, so concurrent evaluation never races on the budget.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetTracker {
    max_iterations: usize,
    cost_ceiling: f64,
    iterations_used: usize,
    spent: f64,
}

impl BudgetTracker {
    pub fn new(max_iterations: usize, cost_ceiling: f64) -> Self {
        Self {
            max_iterations,
            cost_ceiling,
            iterations_used: 0,
            spent: 0.0,
        }
    }

    /// Rebuild usage from persisted history.
    pub fn resume(max_iterations: usize, cost_ceiling: f64, history: &[IterationRecord]) -> Self {
        let mut tracker = Self::new(max_iterations, cost_ceiling);
        tracker.iterations_used = history.len();
        tracker.spent = history.last().map_or(0.0, |r| r.cumulative_cost);
        tracker
    }

    pub fn charge(&mut self, cost: f64) {
        if cost.is_finite() && cost > 0.0 {
            self.spent += cost;
        }
    }

    pub fn record_iteration(&mut self) {
        self.iterations_used += 1;
    }

    pub fn spent(&self) -> f64 {
        self.spent
    }

    pub fn iterations_used(&self) -> usize {
        self.iterations_used
    }

    pub fn remaining_cost(&self) -> f64 {
        (self.cost_ceiling - self.spent).max(0.0)
    }

    /// First exhausted limit, if any. Iterations are checked before cost.
    /// A zero ceiling tolerates free work and stops at the first paid call.
    pub fn check(&self) -> Option<BudgetReason> {
        if self.iterations_used >= self.max_iterations {
            Some(BudgetReason::Iterations)
        } else if self.spent > 0.0 && self.spent >= self.cost_ceiling {
            Some(BudgetReason::Cost)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iterations_exhaust_first() {
        let mut t = BudgetTracker::new(2, 10.0);
        assert_eq!(t.check(), None);
        t.record_iteration();
        t.charge(20.0);
        assert_eq!(t.check(), Some(BudgetReason::Cost));
        t.record_iteration();
        assert_eq!(t.check(), Some(BudgetReason::Iterations));
    }

    #[test]
    fn test_ignores_negative_and_nan_charges() {
        let mut t = BudgetTracker::new(5, 1.0);
        t.charge(-3.0);
        t.charge(f64::NAN);
        assert_eq!(t.spent(), 0.0);
        assert_eq!(t.remaining_cost(), 1.0);
    }

    #[test]
    fn test_zero_cost_budget_stops_at_first_paid_call() {
        let mut t = BudgetTracker::new(5, 0.0);
        t.charge(0.0);
        assert_eq!(t.check(), None);
        t.charge(0.01);
        assert_eq!(t.check(), Some(BudgetReason::Cost));
    }

    #[test]
    fn test_reason_display() {
        let r = BudgetReason::RemediationFailed {
            error: "stage missing".into(),
        };
        assert_eq!(r.to_string(), "remediation failed: stage missing");
    }
}
