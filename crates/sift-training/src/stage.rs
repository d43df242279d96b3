use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline stage. Declaration order is the orchestrator's total order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingStage {
    BasePretrain,
    BaseActiveLearning,
    ActiveLearning,
    TargetPretrain,
    LinearClassifier,
}

impl TrainingStage {
    pub const ALL: [Self; 5] = [
        Self::BasePretrain,
        Self::BaseActiveLearning,
        Self::ActiveLearning,
        Self::TargetPretrain,
        Self::LinearClassifier,
    ];

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::BasePretrain => "Base",
            Self::BaseActiveLearning => "Base AL",
            Self::ActiveLearning => "Active Learning",
            Self::TargetPretrain => "Target",
            Self::LinearClassifier => "Linear Classifier",
        }
    }

    /// Parses a stage by its configuration table name, e.g. `target` or `base_active_learning`.
    #[must_use]
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "base" | "base_pretrain" => Some(Self::BasePretrain),
            "base_active_learning" | "base_al" => Some(Self::BaseActiveLearning),
            "active_learning" | "al" => Some(Self::ActiveLearning),
            "target" | "target_pretrain" => Some(Self::TargetPretrain),
            "linear_classifier" | "lc" => Some(Self::LinearClassifier),
            _ => None,
        }
    }

    /// Checkpoint level written by pretraining stages.
    #[must_use]
    pub fn pretrain_level(self) -> Option<PretrainLevel> {
        match self {
            Self::BasePretrain => Some(PretrainLevel::Base),
            Self::TargetPretrain => Some(PretrainLevel::Target),
            _ => None,
        }
    }
}

impl fmt::Display for TrainingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Key of the checkpoint store: "1" for the base stage, "2" for the target stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PretrainLevel {
    #[serde(rename = "1")]
    Base,
    #[serde(rename = "2")]
    Target,
}

impl PretrainLevel {
    pub const ALL: [Self; 2] = [Self::Base, Self::Target];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Base => "1",
            Self::Target => "2",
        }
    }

    #[must_use]
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim() {
            "1" | "base" => Some(Self::Base),
            "2" | "target" => Some(Self::Target),
            _ => None,
        }
    }
}

impl fmt::Display for PretrainLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pretext objective family, selected by the `run.method` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Simclr,
    Dcl,
    Myow,
    Swav,
    Prototype,
}

impl Method {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Simclr => "simclr",
            Self::Dcl => "dcl",
            Self::Myow => "myow",
            Self::Swav => "swav",
            Self::Prototype => "prototype",
        }
    }

    /// SwAV manages its own learning rate; every other method steps the epoch scheduler.
    #[must_use]
    pub fn uses_lr_scheduler(self) -> bool {
        !matches!(self, Self::Swav)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    Sgd,
    Adam,
    Lars,
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sgd => "sgd",
            Self::Adam => "adam",
            Self::Lars => "lars",
        };
        f.write_str(name)
    }
}
