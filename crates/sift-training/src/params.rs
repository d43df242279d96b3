//! Stage parameter resolution.
//!
//! Every stage reads its hyperparameters from its own `[stages.*]` table.
//! `resolve` is a pure projection of the configuration: it never touches the
//! filesystem and returns equal values for equal inputs.

use crate::config::PipelineConfig;
use crate::error::{TrainingError, TrainingResult};
use crate::stage::{OptimizerKind, TrainingStage};
use serde::{Deserialize, Serialize};

/// Raw `[stages.<name>]` table as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSection {
    pub batch_size: usize,
    pub image_size: usize,
    pub learning_rate: f64,
    pub epochs: u32,
    pub optimizer: OptimizerKind,
    #[serde(default)]
    pub weight_decay: f64,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

fn default_temperature() -> f64 {
    0.5
}

/// Hyperparameters for one stage, resolved from the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StageParameters {
    pub batch_size: usize,
    pub image_size: usize,
    pub learning_rate: f64,
    pub epoch_count: u32,
    pub optimizer_kind: OptimizerKind,
    pub weight_decay: f64,
    /// Contrastive-loss scale. Some objectives ignore it.
    pub temperature: f64,
}

impl StageSection {
    fn to_parameters(&self, stage: TrainingStage) -> TrainingResult<StageParameters> {
        let invalid = |what: &str| TrainingError::config(format!("[{}] {what}", section_name(stage)));

        if self.batch_size == 0 {
            return Err(invalid("batch_size must be >= 1"));
        }
        if self.image_size == 0 {
            return Err(invalid("image_size must be >= 1"));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(invalid("learning_rate must be > 0"));
        }
        if !self.weight_decay.is_finite() || self.weight_decay < 0.0 {
            return Err(invalid("weight_decay must be >= 0"));
        }
        if !self.temperature.is_finite() || self.temperature <= 0.0 {
            return Err(invalid("temperature must be > 0"));
        }

        Ok(StageParameters {
            batch_size: self.batch_size,
            image_size: self.image_size,
            learning_rate: self.learning_rate,
            epoch_count: self.epochs,
            optimizer_kind: self.optimizer,
            weight_decay: self.weight_decay,
            temperature: self.temperature,
        })
    }
}

/// Name of the configuration table a stage reads from.
#[must_use]
pub fn section_name(stage: TrainingStage) -> &'static str {
    match stage {
        TrainingStage::BasePretrain => "stages.base",
        TrainingStage::BaseActiveLearning => "stages.base_active_learning",
        TrainingStage::ActiveLearning => "stages.active_learning",
        TrainingStage::TargetPretrain => "stages.target",
        TrainingStage::LinearClassifier => "stages.linear_classifier",
    }
}

/// Resolves the parameters of `stage` from `config`.
///
/// `BaseActiveLearning` falls back to `[stages.active_learning]` when it has no
/// table of its own. A missing or invalid table is a configuration error.
pub fn resolve(config: &PipelineConfig, stage: TrainingStage) -> TrainingResult<StageParameters> {
    let stages = &config.stages;
    let section = match stage {
        TrainingStage::BasePretrain => stages.base.as_ref(),
        TrainingStage::BaseActiveLearning => {
            stages.base_active_learning.as_ref().or(stages.active_learning.as_ref())
        }
        TrainingStage::ActiveLearning => stages.active_learning.as_ref(),
        TrainingStage::TargetPretrain => stages.target.as_ref(),
        TrainingStage::LinearClassifier => stages.linear_classifier.as_ref(),
    };

    let section = section.ok_or_else(|| {
        TrainingError::config(format!("missing [{}] table for {stage} stage", section_name(stage)))
    })?;
    section.to_parameters(stage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_config;

    #[test]
    fn test_resolve_is_pure() {
        let config = sample_config();
        for stage in TrainingStage::ALL {
            let a = resolve(&config, stage).unwrap();
            let b = resolve(&config, stage).unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_resolve_reads_stage_tables() {
        let config = sample_config();
        let base = resolve(&config, TrainingStage::BasePretrain).unwrap();
        let target = resolve(&config, TrainingStage::TargetPretrain).unwrap();
        assert_eq!(base.epoch_count, 4);
        assert_eq!(target.epoch_count, 3);
        assert_eq!(base.optimizer_kind, OptimizerKind::Adam);
    }

    #[test]
    fn test_base_active_learning_falls_back() {
        let mut config = sample_config();
        config.stages.base_active_learning = None;
        let fallback = resolve(&config, TrainingStage::BaseActiveLearning).unwrap();
        let al = resolve(&config, TrainingStage::ActiveLearning).unwrap();
        assert_eq!(fallback, al);
    }

    #[test]
    fn test_missing_table_is_configuration_error() {
        let mut config = sample_config();
        config.stages.linear_classifier = None;
        let err = resolve(&config, TrainingStage::LinearClassifier).unwrap_err();
        assert!(matches!(err, TrainingError::Configuration(_)));
        assert!(err.to_string().contains("stages.linear_classifier"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = sample_config();
        if let Some(base) = config.stages.base.as_mut() {
            base.learning_rate = 0.0;
        }
        assert!(resolve(&config, TrainingStage::BasePretrain).is_err());

        let mut config = sample_config();
        if let Some(target) = config.stages.target.as_mut() {
            target.batch_size = 0;
        }
        assert!(resolve(&config, TrainingStage::TargetPretrain).is_err());
    }
}
