use crate::stage::{PretrainLevel, TrainingStage};
use sift_abstraction::CollaboratorError;
use thiserror::Error;

pub type TrainingResult<T> = std::result::Result<T, TrainingError>;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("empty dataset: {stage} loader yielded no batches")]
    EmptyDataset { stage: String },

    #[error("corrupt checkpoint for pretrain level {level}: {reason}")]
    CheckpointCorrupt { level: PretrainLevel, reason: String },

    #[error("acquisition budget error in round {round}: requested {requested}, {available} available")]
    AcquisitionBudget { round: usize, requested: i64, available: usize },

    #[error("{stage} cancelled at epoch boundary")]
    Cancelled { stage: TrainingStage },

    #[error("collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TrainingError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn empty_dataset(stage: impl std::fmt::Display) -> Self {
        Self::EmptyDataset { stage: stage.to_string() }
    }
}
