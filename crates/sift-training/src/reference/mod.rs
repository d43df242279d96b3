//! Bundled reference backend.
//!
//! A small, dependency-light backend that runs the whole pipeline end to end
//! on class-folder datasets: byte-histogram features, a single-prototype
//! encoder, a prototype distance objective and a softmax linear head. It is
//! a working default and a test fixture, not a representation learner.

mod dataset;
mod model;
mod optim;

pub use dataset::{byte_histogram, FolderDataset, FolderLoader, LabelIndex};
pub use model::{PrototypeEncoder, PrototypeObjective, SoftmaxHead};
pub use optim::{Adam, Lars, Sgd};

use crate::backend::{Backend, DatasetRole};
use crate::config::{DatasetSection, PipelineConfig};
use crate::error::{TrainingError, TrainingResult};
use crate::params::StageParameters;
use crate::registry::TrainerRegistry;
use crate::stage::{Method, OptimizerKind};
use crate::trainer::ObjectiveTrainer;
use sift_abstraction::{ClassifierHead, Dataset, Encoder, Optimizer};
use std::sync::Arc;

/// Backbone identifier served by [`ReferenceBackend`].
pub const PROTOTYPE_BACKBONE: &str = "prototype";

#[derive(Debug, Clone)]
pub struct ReferenceBackend {
    datasets: DatasetSection,
    feature_dim: usize,
}

impl ReferenceBackend {
    #[must_use]
    pub fn new(datasets: DatasetSection, feature_dim: usize) -> Self {
        Self { datasets, feature_dim }
    }

    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.datasets.clone(), config.reference.feature_dim)
    }
}

impl Backend for ReferenceBackend {
    fn name(&self) -> &str {
        "reference"
    }

    fn encoder(&self, backbone: &str, seed: u64) -> TrainingResult<Box<dyn Encoder>> {
        if backbone != PROTOTYPE_BACKBONE {
            return Err(TrainingError::config(format!(
                "backbone '{backbone}' is not available in the reference backend (expected '{PROTOTYPE_BACKBONE}')"
            )));
        }
        Ok(Box::new(PrototypeEncoder::new(backbone, self.feature_dim, seed)))
    }

    fn optimizer(&self, params: &StageParameters, parameter_count: usize) -> TrainingResult<Box<dyn Optimizer>> {
        let lr = params.learning_rate;
        let wd = params.weight_decay;
        Ok(match params.optimizer_kind {
            OptimizerKind::Sgd => Box::new(Sgd::new(lr, wd, parameter_count)),
            OptimizerKind::Adam => Box::new(Adam::new(lr, wd, parameter_count)),
            OptimizerKind::Lars => Box::new(Lars::new(lr, wd, parameter_count)),
        })
    }

    /// The validation split is labelled with the training split's class table.
    fn dataset(&self, role: DatasetRole) -> TrainingResult<Arc<dyn Dataset>> {
        let ds = &self.datasets;
        let dataset = match role {
            DatasetRole::BasePool => {
                FolderDataset::scan(format!("{}{}", ds.base_prefix, ds.base), &ds.base_dir(), self.feature_dim)?
            }
            DatasetRole::TargetPool => FolderDataset::scan(&ds.target, &ds.target_dir(), self.feature_dim)?,
            DatasetRole::ClassifierTrain => {
                FolderDataset::scan(&ds.linear_classifier, &ds.classifier_train_dir(), self.feature_dim)?
            }
            DatasetRole::ClassifierVal => {
                let train = FolderDataset::scan(&ds.linear_classifier, &ds.classifier_train_dir(), self.feature_dim)?;
                FolderDataset::scan_with_labels(
                    &ds.linear_classifier,
                    &ds.classifier_val_dir(),
                    self.feature_dim,
                    train.labels().clone(),
                )?
            }
        };
        Ok(Arc::new(dataset))
    }

    fn classifier_head(&self, feature_dim: usize, class_count: usize) -> TrainingResult<Box<dyn ClassifierHead>> {
        if class_count == 0 {
            return Err(TrainingError::config("linear classifier needs at least one class"));
        }
        Ok(Box::new(SoftmaxHead::new(feature_dim, class_count)))
    }
}

/// Registers the reference trainer under the `prototype` method tag.
pub fn register_defaults(registry: &mut TrainerRegistry) {
    registry.register(Method::Prototype, |spec| {
        Ok(Arc::new(ObjectiveTrainer::new(spec.method, Arc::new(PrototypeObjective::new()), spec.log_step)))
    });
}

/// Registry holding the reference trainers.
#[must_use]
pub fn default_registry() -> TrainerRegistry {
    let mut registry = TrainerRegistry::new();
    register_defaults(&mut registry);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_config;
    use crate::params::resolve;
    use crate::stage::TrainingStage;

    #[test]
    fn test_optimizer_follows_stage_kind() {
        let config = sample_config();
        let backend = ReferenceBackend::from_config(&config);

        let params = resolve(&config, TrainingStage::BasePretrain).unwrap();
        let optimizer = backend.optimizer(&params, 4).unwrap();
        assert!((optimizer.learning_rate() - params.learning_rate).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unknown_backbone_rejected() {
        let backend = ReferenceBackend::from_config(&sample_config());
        assert!(backend.encoder("resnet50", 1).is_err());
        assert_eq!(backend.encoder(PROTOTYPE_BACKBONE, 1).unwrap().parameters().len(), 32);
    }

    #[test]
    fn test_val_split_uses_train_labels() {
        let temp = tempfile::TempDir::new().unwrap();
        for (split, classes) in [("train", ["a", "b", "c"].as_slice()), ("val", ["b", "c"].as_slice())] {
            for class in classes {
                let dir = temp.path().join("toy").join(split).join(class);
                std::fs::create_dir_all(&dir).unwrap();
                std::fs::write(dir.join("item.bin"), class.as_bytes()).unwrap();
            }
        }
        let mut config = sample_config();
        config.datasets.root = temp.path().to_path_buf();
        config.datasets.linear_classifier = "toy".to_string();
        let backend = ReferenceBackend::from_config(&config);

        let val = backend.dataset(DatasetRole::ClassifierVal).unwrap();
        assert_eq!(val.class_count(), 3);
        let batch = val.loader(None, 4).unwrap().batches().next().unwrap().unwrap();
        let labels: Vec<Option<usize>> = batch.items.iter().map(|i| i.label).collect();
        assert_eq!(labels, vec![Some(1), Some(2)]);
    }

    #[test]
    fn test_default_registry() {
        let registry = default_registry();
        assert!(registry.contains(Method::Prototype));
        assert!(!registry.contains(Method::Swav));
    }
}
