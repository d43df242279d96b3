//! Shared fixtures for pipeline and selector integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use sift_abstraction::{Batch, BatchIter, CollaboratorError, CollaboratorResult, DataLoader, Dataset, Encoder, Item, Optimizer};
use sift_training::reference::PrototypeObjective;
use sift_training::{
    Method, ObjectiveTrainer, PipelineConfig, PretextTrainer, ProgressEvent, ProgressSink, SampleRecord,
    StageParameters, TrainerRegistry, TrainingResult, TrainingStage,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const PIPELINE_CONFIG: &str = r#"
[run]
method = "prototype"
backbone = "prototype"
seed = 3
log_step = 1

[datasets]
root = "data"
base = "toy"
target = "toy"
linear_classifier = "toy"

[active_learning]
enabled = true
budget_schedule = [4, 2]
finetune_epochs = 1

[reference]
feature_dim = 8

[stages.base]
batch_size = 4
image_size = 8
learning_rate = 0.05
epochs = 4
optimizer = "sgd"

[stages.active_learning]
batch_size = 4
image_size = 8
learning_rate = 0.01
epochs = 1
optimizer = "adam"

[stages.target]
batch_size = 4
image_size = 8
learning_rate = 0.05
epochs = 3
optimizer = "sgd"

[stages.linear_classifier]
batch_size = 4
image_size = 8
learning_rate = 0.5
epochs = 5
optimizer = "sgd"
"#;

/// Writes a two-class `toy` dataset (train and val splits) under `<root>/data`.
pub fn write_dataset(root: &Path) {
    for (split, count) in [("train", 6), ("val", 3)] {
        for (class, byte) in [("dark", 5_u8), ("bright", 235_u8)] {
            let dir = root.join("data").join("toy").join(split).join(class);
            std::fs::create_dir_all(&dir).unwrap();
            for i in 0..count {
                let content: Vec<u8> = (0..48).map(|j| byte.wrapping_add(((i * 3 + j) % 16) as u8)).collect();
                std::fs::write(dir.join(format!("{i:02}.bin")), content).unwrap();
            }
        }
    }
}

/// Pipeline configuration with its dataset root inside `root`.
pub fn pipeline_config(root: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::from_toml_str(PIPELINE_CONFIG).unwrap();
    config.rebase_paths(root);
    config
}

/// Call counters shared between a test and the trainers its registry creates.
#[derive(Debug, Default)]
pub struct CallCounts {
    pub epochs: AtomicUsize,
    pub scores: AtomicUsize,
}

impl CallCounts {
    pub fn epochs(&self) -> usize {
        self.epochs.load(Ordering::SeqCst)
    }

    pub fn scores(&self) -> usize {
        self.scores.load(Ordering::SeqCst)
    }
}

/// Reference trainer that counts how often it is asked to train or score.
pub struct SpyTrainer {
    inner: ObjectiveTrainer,
    counts: Arc<CallCounts>,
}

#[async_trait]
impl PretextTrainer for SpyTrainer {
    fn method(&self) -> Method {
        self.inner.method()
    }

    async fn run_epoch(
        &self,
        stage: TrainingStage,
        encoder: &mut dyn Encoder,
        optimizer: &mut dyn Optimizer,
        loader: &dyn DataLoader,
        params: &StageParameters,
    ) -> TrainingResult<f64> {
        self.counts.epochs.fetch_add(1, Ordering::SeqCst);
        self.inner.run_epoch(stage, encoder, optimizer, loader, params).await
    }

    async fn score_pool(&self, encoder: &dyn Encoder, loader: &dyn DataLoader) -> TrainingResult<Vec<SampleRecord>> {
        self.counts.scores.fetch_add(1, Ordering::SeqCst);
        self.inner.score_pool(encoder, loader).await
    }
}

/// Registry whose `prototype` trainers report into the returned counters.
pub fn spy_registry() -> (TrainerRegistry, Arc<CallCounts>) {
    let counts = Arc::new(CallCounts::default());
    let shared = Arc::clone(&counts);
    let mut registry = TrainerRegistry::new();
    registry.register(Method::Prototype, move |spec| {
        Ok(Arc::new(SpyTrainer {
            inner: ObjectiveTrainer::new(spec.method, Arc::new(PrototypeObjective::new()), spec.log_step),
            counts: Arc::clone(&shared),
        }))
    });
    (registry, counts)
}

/// Records every progress event; optionally runs a hook on each one.
#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<ProgressEvent>>,
    hook: Option<Box<dyn Fn(&ProgressEvent) + Send + Sync>>,
}

impl RecordingSink {
    pub fn with_hook(hook: impl Fn(&ProgressEvent) + Send + Sync + 'static) -> Self {
        Self { events: Mutex::new(Vec::new()), hook: Some(Box::new(hook)) }
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingSink {
    fn on_event(&self, event: ProgressEvent) {
        if let Some(hook) = &self.hook {
            hook(&event);
        }
        self.events.lock().unwrap().push(event);
    }
}

/// In-memory pool of one-feature items named `item-00`, `item-01`, ...
pub struct MemoryDataset {
    items: Vec<Item>,
}

impl MemoryDataset {
    pub fn new(values: &[f32]) -> Self {
        let items = values
            .iter()
            .enumerate()
            .map(|(i, v)| Item { path: format!("item-{i:02}"), input: vec![*v], label: None })
            .collect();
        Self { items }
    }
}

impl Dataset for MemoryDataset {
    fn id(&self) -> &str {
        "memory"
    }

    fn paths(&self) -> Vec<String> {
        self.items.iter().map(|i| i.path.clone()).collect()
    }

    fn loader(&self, subset: Option<&[String]>, batch_size: usize) -> CollaboratorResult<Box<dyn DataLoader>> {
        let items = match subset {
            None => self.items.clone(),
            Some(paths) => {
                let by_path: HashMap<&str, &Item> = self.items.iter().map(|i| (i.path.as_str(), i)).collect();
                paths
                    .iter()
                    .map(|p| {
                        by_path
                            .get(p.as_str())
                            .map(|i| (*i).clone())
                            .ok_or_else(|| CollaboratorError::Data(format!("unknown item {p}")))
                    })
                    .collect::<CollaboratorResult<Vec<_>>>()?
            }
        };
        Ok(Box::new(MemoryLoader { items, batch_size }))
    }
}

struct MemoryLoader {
    items: Vec<Item>,
    batch_size: usize,
}

impl DataLoader for MemoryLoader {
    fn batches(&self) -> BatchIter<'_> {
        Box::new(self.items.chunks(self.batch_size.max(1)).map(|chunk| Ok(Batch::new(chunk.to_vec()))))
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.items.len())
    }
}
