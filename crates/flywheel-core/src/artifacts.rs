//! Persisted flywheel history.
//!
//! Layout: `<dir>/<run_id>/history.json` plus `<dir>/<run_id>/history.digest`
//! holding the SHA-256 hex digest of the JSON bytes. Reads verify the digest
//! and then re-verify every stored assessment, so a hand-edited risk level
//! surfaces as `InconsistentScoring`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::{FlywheelError, IterationRecord, Result};
use crate::flywheel::{FlywheelOutcome, FlywheelReport};

/// On-disk history of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryArtifact {
    pub run_id: String,
    pub domain: String,
    pub catalog_version: String,
    pub outcome: Option<FlywheelOutcome>,
    pub history: Vec<IterationRecord>,
    pub written_at: DateTime<Utc>,
}

impl HistoryArtifact {
    pub fn from_report(report: &FlywheelReport) -> Self {
        Self {
            run_id: report.run_id.clone(),
            domain: report.domain.clone(),
            catalog_version: report.catalog_version.clone(),
            outcome: Some(report.outcome.clone()),
            history: report.history.clone(),
            written_at: Utc::now(),
        }
    }
}

fn content_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Persist `<dir>/<run_id>/history.json` and its digest.
pub fn write_history_artifact(artifact: &HistoryArtifact, dir: &Path) -> Result<PathBuf> {
    let run_dir = dir.join(&artifact.run_id);
    std::fs::create_dir_all(&run_dir)?;

    let artifact_path = run_dir.join("history.json");
    let digest_path = run_dir.join("history.digest");
    let json = serde_json::to_vec_pretty(artifact)?;

    std::fs::write(&artifact_path, &json)?;
    std::fs::write(&digest_path, content_digest(&json).as_bytes())?;

    Ok(artifact_path)
}

/// Read and verify `<dir>/<run_id>/history.json`.
pub fn read_history_artifact(run_id: &str, dir: &Path) -> Result<HistoryArtifact> {
    let run_dir = dir.join(run_id);
    let json = std::fs::read(run_dir.join("history.json"))?;
    let digest = std::fs::read_to_string(run_dir.join("history.digest"))?;

    let actual = content_digest(&json);
    if digest.trim() != actual {
        return Err(FlywheelError::DigestMismatch {
            expected: digest.trim().to_string(),
            actual,
        });
    }

    let artifact: HistoryArtifact = serde_json::from_slice(&json)?;
    for record in &artifact.history {
        record.assessment.verify()?;
    }
    Ok(artifact)
}
