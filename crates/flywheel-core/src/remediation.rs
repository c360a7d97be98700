//! Remediation collaborator boundary.
//!
//! The controller hands each [`Curriculum`] to a [`Remediator`], which
//! returns an improved trace set for the next evaluation pass. How the agent
//! is actually retrained is outside this crate.

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use tracing::debug;

use crate::adapters::normalize_all;
use crate::domain::{Curriculum, NormalizedTrace};

/// Improved traces plus the spend incurred producing them.
#[derive(Debug, Clone, PartialEq)]
pub struct RemediationOutcome {
    pub traces: Vec<NormalizedTrace>,
    pub cost: f64,
}

/// External collaborator that applies a curriculum.
#[async_trait]
pub trait Remediator: Send + Sync {
    fn name(&self) -> &str;

    async fn apply(
        &self,
        curriculum: &Curriculum,
        traces: &[NormalizedTrace],
    ) -> anyhow::Result<RemediationOutcome>;
}

/// Reads pre-staged trace sets from `<dir>/iteration-<n>.json`, where `n` is
/// the curriculum's iteration. Used for offline runs and CI.
#[derive(Debug, Clone)]
pub struct StagedTraceRemediator {
    dir: PathBuf,
    cost_per_stage: f64,
}

impl StagedTraceRemediator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cost_per_stage: 0.0,
        }
    }

    pub fn with_cost_per_stage(mut self, cost: f64) -> Self {
        self.cost_per_stage = cost;
        self
    }

    pub fn stage_path(&self, iteration: usize) -> PathBuf {
        self.dir.join(format!("iteration-{iteration}.json"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl Remediator for StagedTraceRemediator {
    fn name(&self) -> &str {
        "staged"
    }

    async fn apply(
        &self,
        curriculum: &Curriculum,
        _traces: &[NormalizedTrace],
    ) -> anyhow::Result<RemediationOutcome> {
        let path = self.stage_path(curriculum.iteration);
        let text = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading staged traces {}", path.display()))?;
        let raw: serde_json::Value = serde_json::from_str(&text)
            .with_context(|| format!("parsing staged traces {}", path.display()))?;

        let (traces, skipped) = normalize_all(raw);
        if traces.is_empty() {
            anyhow::bail!(
                "{} contains no usable traces ({} skipped)",
                path.display(),
                skipped.len()
            );
        }
        debug!(
            path = %path.display(),
            traces = traces.len(),
            skipped = skipped.len(),
            "loaded staged traces"
        );
        Ok(RemediationOutcome {
            traces,
            cost: self.cost_per_stage,
        })
    }
}
