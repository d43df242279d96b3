use crate::error::TrainingResult;
use crate::params::StageParameters;
use serde::{Deserialize, Serialize};
use sift_abstraction::{ClassifierHead, Dataset, Encoder, Optimizer};
use std::fmt;
use std::sync::Arc;

/// Which data a stage asks the backend for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetRole {
    BasePool,
    TargetPool,
    ClassifierTrain,
    ClassifierVal,
}

impl fmt::Display for DatasetRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BasePool => "base pool",
            Self::TargetPool => "target pool",
            Self::ClassifierTrain => "classifier train split",
            Self::ClassifierVal => "classifier validation split",
        };
        f.write_str(name)
    }
}

/// Produces the collaborators a pipeline run needs.
///
/// The orchestrator owns no model, optimizer or data format of its own; a
/// backend supplies all of them.
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    /// Fresh encoder for `backbone`, initialized from `seed`.
    fn encoder(&self, backbone: &str, seed: u64) -> TrainingResult<Box<dyn Encoder>>;

    /// Optimizer selected by `params.optimizer_kind`, sized for `parameter_count` parameters.
    fn optimizer(&self, params: &StageParameters, parameter_count: usize) -> TrainingResult<Box<dyn Optimizer>>;

    fn dataset(&self, role: DatasetRole) -> TrainingResult<Arc<dyn Dataset>>;

    fn classifier_head(&self, feature_dim: usize, class_count: usize) -> TrainingResult<Box<dyn ClassifierHead>>;
}
