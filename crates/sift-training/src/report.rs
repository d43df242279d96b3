use crate::error::{TrainingError, TrainingResult};
use crate::layout::{atomic_write, RunLayout};
use crate::stage::{Method, TrainingStage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Identifier for a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageOutcome {
    Completed {
        epochs_run: u32,
        #[serde(default)]
        final_loss: Option<f64>,
    },
    Acquired {
        rounds: usize,
        selected: usize,
    },
    Skipped {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: TrainingStage,
    #[serde(flatten)]
    pub outcome: StageOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionSummary {
    pub key: String,
    pub selected: usize,
    pub requested: usize,
    pub reused: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Checkpoint,
    Selection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunArtifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub run_id: RunId,
    pub created_at: DateTime<Utc>,
    pub method: Method,
    pub backbone: String,
    pub dataset: String,
    pub stages: Vec<StageReport>,
    #[serde(default)]
    pub selection: Option<SelectionSummary>,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub artifacts: Vec<RunArtifact>,
}

impl PipelineReport {
    #[must_use]
    pub fn stage(&self, stage: TrainingStage) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    pub fn write(&self, layout: &RunLayout) -> TrainingResult<PathBuf> {
        let path = layout.report_path(&self.run_id);
        atomic_write(&path, serde_json::to_string_pretty(self)?.as_bytes())?;
        Ok(path)
    }
}

pub fn sha256_file(path: &Path) -> TrainingResult<String> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

pub fn make_artifact(kind: ArtifactKind, path: PathBuf) -> TrainingResult<RunArtifact> {
    if !path.exists() {
        return Err(TrainingError::Other(anyhow::anyhow!(
            "artifact path does not exist: {}",
            path.display()
        )));
    }

    let hash = sha256_file(&path)?;
    Ok(RunArtifact { kind, path, sha256: hash })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_report_serializes_outcomes() {
        let report = PipelineReport {
            run_id: RunId("run-1".to_string()),
            created_at: Utc::now(),
            method: Method::Prototype,
            backbone: "prototype".to_string(),
            dataset: "cifar10".to_string(),
            stages: vec![
                StageReport {
                    stage: TrainingStage::BasePretrain,
                    outcome: StageOutcome::Skipped { reason: "checkpoint".to_string() },
                },
                StageReport {
                    stage: TrainingStage::TargetPretrain,
                    outcome: StageOutcome::Completed { epochs_run: 2, final_loss: Some(0.5) },
                },
            ],
            selection: None,
            accuracy: Some(0.75),
            artifacts: vec![],
        };

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["stages"][0]["status"], "skipped");
        assert_eq!(value["stages"][1]["epochs_run"], 2);

        let temp = TempDir::new().unwrap();
        let layout = RunLayout::for_workspace_root(temp.path());
        let path = report.write(&layout).unwrap();
        let back: PipelineReport = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn test_make_artifact_requires_file() {
        let temp = TempDir::new().unwrap();
        assert!(make_artifact(ArtifactKind::Selection, temp.path().join("missing")).is_err());

        let path = temp.path().join("sel.jsonl");
        std::fs::write(&path, "x").unwrap();
        let artifact = make_artifact(ArtifactKind::Selection, path).unwrap();
        assert_eq!(artifact.sha256.len(), 64);
    }
}
