//! Sift Training
//!
//! Orchestration core for an active-learning representation-learning pipeline:
//! - Resolving per-stage hyperparameters from a pipeline configuration
//! - Persisting and restoring pretraining checkpoints
//! - Running pretext epochs and scoring unlabeled pools (`PretextTrainer`)
//! - Loss-ranked acquisition over a budget schedule
//! - Sequencing the stages (`Pipeline`)

pub mod backend;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod layout;
pub mod orchestrator;
pub mod params;
pub mod progress;
pub mod reference;
pub mod registry;
pub mod report;
pub mod sample;
pub mod schedule;
pub mod scheduler;
pub mod selection_store;
pub mod selector;
pub mod stage;
pub mod trainer;

pub use backend::{Backend, DatasetRole};
pub use checkpoint::{CheckpointRecord, CheckpointStore, CheckpointSummary};
pub use config::{AcquisitionPool, PipelineConfig};
pub use error::{TrainingError, TrainingResult};
pub use layout::RunLayout;
pub use orchestrator::Pipeline;
pub use params::{resolve, StageParameters};
pub use progress::{ProgressEvent, ProgressSink, TracingProgressSink};
pub use reference::{default_registry, ReferenceBackend};
pub use registry::{TrainerRegistry, TrainerSpec};
pub use report::{PipelineReport, RunId, StageOutcome, StageReport};
pub use sample::{SampleRecord, Selection};
pub use schedule::BudgetSchedule;
pub use scheduler::{CosineAnnealing, LrScheduler};
pub use selection_store::{SelectionStore, StoredSelection};
pub use selector::{rank_round, ActiveLearningSelector, FinetunePlan, SelectionOutcome};
pub use stage::{Method, OptimizerKind, PretrainLevel, TrainingStage};
pub use trainer::{LossMeter, ObjectiveTrainer, PretextTrainer};
