//! Pipeline configuration file support.
//!
//! Provides the configuration structure and loading for a pipeline run.

use crate::error::{TrainingError, TrainingResult};
use crate::params::{resolve, StageSection};
use crate::schedule::BudgetSchedule;
use crate::selection_store::check_key;
use crate::stage::{Method, TrainingStage};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Full pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Run-wide settings
    #[serde(default)]
    pub run: RunSection,

    /// Dataset identifiers
    pub datasets: DatasetSection,

    /// Active-learning branch
    #[serde(default)]
    pub active_learning: ActiveLearningSection,

    /// Per-stage hyperparameters
    #[serde(default)]
    pub stages: StageTable,

    /// Settings read by the bundled reference backend
    #[serde(default)]
    pub reference: ReferenceSection,
}

/// Run-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSection {
    /// Pretext objective tag
    #[serde(default = "default_method")]
    pub method: Method,

    /// Backbone identifier handed to the backend
    #[serde(default = "default_backbone")]
    pub backbone: String,

    /// Seed for encoder initialization
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Log a progress line every `log_step` batches
    #[serde(default = "default_log_step")]
    pub log_step: usize,

    /// Save a mid-stage checkpoint every N epochs (default: half the stage)
    #[serde(default)]
    pub checkpoint_interval: Option<u32>,

    /// Run the second pretraining stage
    #[serde(default = "default_true")]
    pub target_pretrain: bool,
}

fn default_method() -> Method {
    Method::Prototype
}

fn default_backbone() -> String {
    "prototype".to_string()
}

fn default_seed() -> u64 {
    42
}

fn default_log_step() -> usize {
    50
}

fn default_true() -> bool {
    true
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            method: default_method(),
            backbone: default_backbone(),
            seed: default_seed(),
            log_step: default_log_step(),
            checkpoint_interval: None,
            target_pretrain: true,
        }
    }
}

/// Dataset identifiers. Base, target and linear-classifier datasets must agree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSection {
    /// Directory holding one folder per dataset
    pub root: PathBuf,

    pub base: String,
    pub target: String,
    pub linear_classifier: String,

    /// Prefix of the base pool folder, e.g. `generated_` for a generated copy
    #[serde(default)]
    pub base_prefix: String,
}

impl DatasetSection {
    /// Folder holding the base pool.
    #[must_use]
    pub fn base_dir(&self) -> PathBuf {
        self.root.join(format!("{}{}", self.base_prefix, self.base)).join("train")
    }

    /// Folder holding the target pool.
    #[must_use]
    pub fn target_dir(&self) -> PathBuf {
        self.root.join(&self.target).join("train")
    }

    #[must_use]
    pub fn classifier_train_dir(&self) -> PathBuf {
        self.root.join(&self.linear_classifier).join("train")
    }

    #[must_use]
    pub fn classifier_val_dir(&self) -> PathBuf {
        self.root.join(&self.linear_classifier).join("val")
    }
}

/// Which pool the selector draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionPool {
    Base,
    #[default]
    Target,
}

impl AcquisitionPool {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Base => "base",
            Self::Target => "target",
        }
    }
}

/// Active-learning branch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveLearningSection {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub pool: AcquisitionPool,

    /// Per-round budgets, e.g. `[800, 400]`
    #[serde(default)]
    pub budget_schedule: Vec<i64>,

    /// Fine-tuning epochs between rounds
    #[serde(default)]
    pub finetune_epochs: u32,

    /// Fraction of the accumulated selection used for fine-tuning
    #[serde(default = "default_finetune_ratio")]
    pub finetune_ratio: f64,
}

fn default_finetune_ratio() -> f64 {
    1.0
}

impl Default for ActiveLearningSection {
    fn default() -> Self {
        Self {
            enabled: false,
            pool: AcquisitionPool::Target,
            budget_schedule: Vec::new(),
            finetune_epochs: 0,
            finetune_ratio: default_finetune_ratio(),
        }
    }
}

/// `[stages.*]` tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageTable {
    #[serde(default)]
    pub base: Option<StageSection>,
    #[serde(default)]
    pub base_active_learning: Option<StageSection>,
    #[serde(default)]
    pub active_learning: Option<StageSection>,
    #[serde(default)]
    pub target: Option<StageSection>,
    #[serde(default)]
    pub linear_classifier: Option<StageSection>,
}

/// Reference backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceSection {
    /// Width of the byte-histogram feature vector
    #[serde(default = "default_feature_dim")]
    pub feature_dim: usize,
}

fn default_feature_dim() -> usize {
    32
}

impl Default for ReferenceSection {
    fn default() -> Self {
        Self { feature_dim: default_feature_dim() }
    }
}

impl PipelineConfig {
    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> TrainingResult<Self> {
        toml::from_str(content).map_err(|e| TrainingError::config(format!("failed to parse configuration: {e}")))
    }

    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> TrainingResult<Self> {
        if !path.exists() {
            return Err(TrainingError::config(format!("configuration file not found: {}", path.display())));
        }

        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| TrainingError::config(format!("{}: {}", path.display(), e)))
    }

    /// Get default global configuration file path.
    #[must_use]
    pub fn default_global_path() -> PathBuf {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(".sift")
            .join("config.toml")
    }

    /// Get default local configuration file path.
    #[must_use]
    pub fn default_local_path() -> PathBuf {
        PathBuf::from("sift.toml")
    }

    /// Discover and load a configuration file.
    ///
    /// Tries, in order:
    /// 1. The explicit path, if given
    /// 2. Local config (./sift.toml)
    /// 3. Global config (~/.sift/config.toml)
    pub fn discover(explicit: Option<&Path>) -> TrainingResult<(Self, PathBuf)> {
        if let Some(path) = explicit {
            return Ok((Self::load_from_file(path)?, path.to_path_buf()));
        }

        for path in [Self::default_local_path(), Self::default_global_path()] {
            if path.exists() {
                return Ok((Self::load_from_file(&path)?, path));
            }
        }

        Err(TrainingError::config(
            "no configuration found (pass --config, or create ./sift.toml or ~/.sift/config.toml)",
        ))
    }

    /// Makes a relative `datasets.root` relative to `base` (usually the
    /// directory holding the configuration file).
    pub fn rebase_paths(&mut self, base: &Path) {
        if self.datasets.root.is_relative() {
            self.datasets.root = base.join(&self.datasets.root);
        }
    }

    /// Stage under which acquisition rounds run.
    #[must_use]
    pub fn acquisition_stage(&self) -> TrainingStage {
        match self.active_learning.pool {
            AcquisitionPool::Base => TrainingStage::BaseActiveLearning,
            AcquisitionPool::Target => TrainingStage::ActiveLearning,
        }
    }

    /// Dataset identifier of the acquisition pool.
    #[must_use]
    pub fn acquisition_dataset(&self) -> String {
        match self.active_learning.pool {
            AcquisitionPool::Base => format!("{}{}", self.datasets.base_prefix, self.datasets.base),
            AcquisitionPool::Target => self.datasets.target.clone(),
        }
    }

    pub fn budget_schedule(&self) -> TrainingResult<BudgetSchedule> {
        BudgetSchedule::new(&self.active_learning.budget_schedule)
    }

    /// Key of the persisted selection for this configuration: dataset, pool and schedule.
    pub fn selection_key(&self) -> TrainingResult<String> {
        let schedule = self.budget_schedule()?;
        Ok(format!(
            "{}_{}_{}",
            self.acquisition_dataset(),
            self.active_learning.pool.as_str(),
            schedule.key()
        ))
    }

    /// Stages this configuration will enter, in order.
    #[must_use]
    pub fn planned_stages(&self) -> Vec<TrainingStage> {
        let mut stages = vec![TrainingStage::BasePretrain];
        if self.active_learning.enabled {
            stages.push(self.acquisition_stage());
        }
        if self.run.target_pretrain {
            stages.push(TrainingStage::TargetPretrain);
        }
        stages.push(TrainingStage::LinearClassifier);
        stages
    }

    /// Validate the whole configuration before any training starts.
    pub fn validate(&self) -> TrainingResult<()> {
        let ds = &self.datasets;
        if ds.target != ds.linear_classifier {
            return Err(TrainingError::config(format!(
                "target dataset '{}' does not match linear classifier dataset '{}'",
                ds.target, ds.linear_classifier
            )));
        }
        if ds.base != ds.target {
            return Err(TrainingError::config(format!(
                "base dataset '{}' does not match target dataset '{}'",
                ds.base, ds.target
            )));
        }
        if ds.target.trim().is_empty() {
            return Err(TrainingError::config("datasets.target is required"));
        }

        if self.run.backbone.trim().is_empty() {
            return Err(TrainingError::config("run.backbone is required"));
        }
        if self.run.log_step == 0 {
            return Err(TrainingError::config("run.log_step must be >= 1"));
        }
        if self.run.checkpoint_interval == Some(0) {
            return Err(TrainingError::config("run.checkpoint_interval must be >= 1"));
        }
        if self.reference.feature_dim == 0 {
            return Err(TrainingError::config("reference.feature_dim must be >= 1"));
        }

        if self.active_learning.enabled {
            let schedule = self.budget_schedule()?;
            if schedule.is_empty() {
                return Err(TrainingError::config("active_learning.budget_schedule must not be empty"));
            }
            check_key(&self.selection_key()?)?;
            let ratio = self.active_learning.finetune_ratio;
            if !ratio.is_finite() || ratio <= 0.0 || ratio > 1.0 {
                return Err(TrainingError::config("active_learning.finetune_ratio must be in (0, 1]"));
            }
        }

        for stage in self.planned_stages() {
            resolve(self, stage)?;
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE: &str = r#"
[run]
method = "prototype"
backbone = "prototype"
seed = 7
log_step = 10
target_pretrain = true

[datasets]
root = "data"
base = "cifar10"
target = "cifar10"
linear_classifier = "cifar10"
base_prefix = "generated_"

[active_learning]
enabled = true
budget_schedule = [800, 400]
finetune_epochs = 1

[stages.base]
batch_size = 64
image_size = 32
learning_rate = 0.01
epochs = 4
optimizer = "adam"
weight_decay = 0.0001

[stages.active_learning]
batch_size = 32
image_size = 32
learning_rate = 0.005
epochs = 1
optimizer = "sgd"

[stages.target]
batch_size = 64
image_size = 32
learning_rate = 0.01
epochs = 3
optimizer = "adam"

[stages.linear_classifier]
batch_size = 128
image_size = 32
learning_rate = 0.1
epochs = 5
optimizer = "sgd"
"#;

    pub(crate) fn sample_config() -> PipelineConfig {
        PipelineConfig::from_toml_str(SAMPLE).unwrap()
    }

    #[test]
    fn test_sample_config_validates() {
        let config = sample_config();
        config.validate().unwrap();
        assert_eq!(config.run.seed, 7);
        assert_eq!(config.active_learning.budget_schedule, vec![800, 400]);
        assert_eq!(config.reference.feature_dim, 32);
    }

    #[test]
    fn test_inconsistent_datasets_rejected() {
        let mut config = sample_config();
        config.datasets.linear_classifier = "stl10".to_string();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, TrainingError::Configuration(_)));

        let mut config = sample_config();
        config.datasets.base = "imagenet".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_positive_budget_rejected() {
        let mut config = sample_config();
        config.active_learning.budget_schedule = vec![800, 0];
        assert!(config.validate().is_err());

        config.active_learning.budget_schedule = vec![-5];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_disabled_active_learning_ignores_schedule() {
        let mut config = sample_config();
        config.active_learning.enabled = false;
        config.active_learning.budget_schedule = vec![];
        config.stages.active_learning = None;
        config.validate().unwrap();
    }

    #[test]
    fn test_planned_stages_follow_flags() {
        let mut config = sample_config();
        assert_eq!(
            config.planned_stages(),
            vec![
                TrainingStage::BasePretrain,
                TrainingStage::ActiveLearning,
                TrainingStage::TargetPretrain,
                TrainingStage::LinearClassifier,
            ]
        );

        config.active_learning.pool = AcquisitionPool::Base;
        config.run.target_pretrain = false;
        assert_eq!(
            config.planned_stages(),
            vec![
                TrainingStage::BasePretrain,
                TrainingStage::BaseActiveLearning,
                TrainingStage::LinearClassifier,
            ]
        );
    }

    #[test]
    fn test_selection_key_includes_dataset_and_schedule() {
        let mut config = sample_config();
        assert_eq!(config.selection_key().unwrap(), "cifar10_target_800-400");

        config.active_learning.pool = AcquisitionPool::Base;
        assert_eq!(config.selection_key().unwrap(), "generated_cifar10_base_800-400");
    }

    #[test]
    fn test_dataset_id_with_separator_rejected() {
        let mut config = sample_config();
        for field in ["../cifar10", "nested/cifar10"] {
            config.datasets.base = field.to_string();
            config.datasets.target = field.to_string();
            config.datasets.linear_classifier = field.to_string();
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("invalid selection key"), "{err}");
        }
    }

    #[test]
    fn test_dataset_dirs() {
        let config = sample_config();
        assert_eq!(config.datasets.base_dir(), PathBuf::from("data/generated_cifar10/train"));
        assert_eq!(config.datasets.classifier_val_dir(), PathBuf::from("data/cifar10/val"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = PipelineConfig::load_from_file(Path::new("/nonexistent/sift.toml")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_rebase_paths_only_touches_relative_root() {
        let mut config = sample_config();
        config.rebase_paths(Path::new("/srv/sift"));
        assert_eq!(config.datasets.root, PathBuf::from("/srv/sift/data"));

        config.rebase_paths(Path::new("/elsewhere"));
        assert_eq!(config.datasets.root, PathBuf::from("/srv/sift/data"));
    }
}
