//! Global atomic counters for flywheel observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a flywheel run).
//!
//! These counters are for reporting only. Budget accounting lives in
//! [`crate::budget::BudgetTracker`].

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters; no allocations, no locking.
pub struct Metrics {
    evaluations: AtomicU64,
    traces_skipped: AtomicU64,
    judge_calls: AtomicU64,
    judge_failures: AtomicU64,
    iterations: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            evaluations: AtomicU64::new(0),
            traces_skipped: AtomicU64::new(0),
            judge_calls: AtomicU64::new(0),
            judge_failures: AtomicU64::new(0),
            iterations: AtomicU64::new(0),
        }
    }

    /// Add `n` (trace, scenario) evaluations.
    pub fn add_evaluations(&self, n: u64) {
        self.evaluations.fetch_add(n, Ordering::Relaxed);
        tracing::trace!(metric = "evaluations", by = n, "counter incremented");
    }

    pub fn inc_traces_skipped(&self) {
        self.traces_skipped.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "traces_skipped", "counter incremented");
    }

    pub fn inc_judge_calls(&self) {
        self.judge_calls.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "judge_calls", "counter incremented");
    }

    pub fn inc_judge_failures(&self) {
        self.judge_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "judge_failures", "counter incremented");
    }

    pub fn inc_iterations(&self) {
        self.iterations.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "iterations", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            evaluations = self.evaluations(),
            traces_skipped = self.traces_skipped(),
            judge_calls = self.judge_calls(),
            judge_failures = self.judge_failures(),
            iterations = self.iterations(),
        );
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations.load(Ordering::Relaxed)
    }

    pub fn traces_skipped(&self) -> u64 {
        self.traces_skipped.load(Ordering::Relaxed)
    }

    pub fn judge_calls(&self) -> u64 {
        self.judge_calls.load(Ordering::Relaxed)
    }

    pub fn judge_failures(&self) -> u64 {
        self.judge_failures.load(Ordering::Relaxed)
    }

    pub fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.evaluations.store(0, Ordering::Relaxed);
        self.traces_skipped.store(0, Ordering::Relaxed);
        self.judge_calls.store(0, Ordering::Relaxed);
        self.judge_failures.store(0, Ordering::Relaxed);
        self.iterations.store(0, Ordering::Relaxed);
    }
}
