//! Stage state machine.
//!
//! A run walks the stages in their fixed order:
//! base pretraining, optional acquisition, optional target pretraining and
//! the linear classifier. The checkpoint store is consulted on entry to each
//! pretraining stage: a loadable level "1" record skips base pretraining, and
//! a level "2" record either skips target pretraining (complete) or resumes it.

use crate::backend::{Backend, DatasetRole};
use crate::checkpoint::{CheckpointRecord, CheckpointStore};
use crate::config::{AcquisitionPool, PipelineConfig};
use crate::error::{TrainingError, TrainingResult};
use crate::layout::RunLayout;
use crate::params::{resolve, StageParameters};
use crate::progress::{ProgressEvent, ProgressSink, TracingProgressSink};
use crate::registry::{TrainerRegistry, TrainerSpec};
use crate::report::{
    make_artifact, ArtifactKind, PipelineReport, RunArtifact, RunId, SelectionSummary, StageOutcome, StageReport,
};
use crate::scheduler::{CosineAnnealing, LrScheduler};
use crate::selection_store::SelectionStore;
use crate::selector::{ActiveLearningSelector, FinetunePlan};
use crate::stage::{PretrainLevel, TrainingStage};
use crate::trainer::{LossMeter, PretextTrainer};
use chrono::Utc;
use sift_abstraction::{ClassifierHead, CollaboratorError, DataLoader, Dataset, Encoder, Optimizer};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Selection feeding the target stage.
struct Acquisition {
    dataset: Arc<dyn Dataset>,
    paths: Vec<String>,
    file: PathBuf,
    summary: SelectionSummary,
    report: StageReport,
}

/// One pipeline run over a validated configuration.
pub struct Pipeline {
    config: PipelineConfig,
    backend: Arc<dyn Backend>,
    registry: TrainerRegistry,
    layout: RunLayout,
    checkpoints: CheckpointStore,
    selections: SelectionStore,
    progress: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
    run_id: RunId,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("run_id", &self.run_id)
            .field("backend", &self.backend.name())
            .field("method", &self.config.run.method)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Validates `config` and checks that its method has a registered trainer.
    ///
    /// Nothing is trained or written until [`Pipeline::run`].
    pub fn new(
        config: PipelineConfig,
        backend: Arc<dyn Backend>,
        registry: TrainerRegistry,
        layout: RunLayout,
    ) -> TrainingResult<Self> {
        config.validate()?;
        if !registry.contains(config.run.method) {
            return Err(TrainingError::config(format!(
                "no trainer registered for method '{}'",
                config.run.method
            )));
        }

        Ok(Self {
            checkpoints: CheckpointStore::new(layout.clone()),
            selections: SelectionStore::new(layout.clone()),
            config,
            backend,
            registry,
            layout,
            progress: Arc::new(TracingProgressSink),
            cancel: CancellationToken::new(),
            run_id: RunId::new(),
        })
    }

    #[must_use]
    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    #[must_use]
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[must_use]
    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    /// Token that stops the run at the next epoch or round boundary.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn emit(&self, event: ProgressEvent) {
        self.progress.on_event(event);
    }

    fn check_cancelled(&self, stage: TrainingStage) -> TrainingResult<()> {
        if self.cancel.is_cancelled() {
            return Err(TrainingError::Cancelled { stage });
        }
        Ok(())
    }

    fn trainer_for(&self, stage: TrainingStage) -> TrainingResult<Arc<dyn PretextTrainer>> {
        self.registry.create(&TrainerSpec {
            method: self.config.run.method,
            stage,
            log_step: self.config.run.log_step,
        })
    }

    fn skipped(&self, stage: TrainingStage, reason: String) -> StageReport {
        self.emit(ProgressEvent::StageSkipped { run_id: self.run_id.clone(), stage, reason: reason.clone() });
        StageReport { stage, outcome: StageOutcome::Skipped { reason } }
    }

    fn checkpoint_interval(&self, params: &StageParameters) -> u32 {
        self.config.run.checkpoint_interval.unwrap_or(params.epoch_count / 2).max(1)
    }

    fn save_checkpoint(
        &self,
        level: PretrainLevel,
        encoder: &dyn Encoder,
        optimizer: &dyn Optimizer,
        epoch: u32,
    ) -> TrainingResult<()> {
        self.checkpoints.save(level, &encoder.state_dict()?, &optimizer.state()?, epoch)
    }

    /// Runs every stage and writes the run report.
    pub async fn run(&self) -> TrainingResult<PipelineReport> {
        let config = &self.config;
        self.layout.ensure_dirs()?;
        self.emit(ProgressEvent::Started { run_id: self.run_id.clone() });
        info!(
            run_id = %self.run_id,
            backend = self.backend.name(),
            method = %config.run.method,
            backbone = %config.run.backbone,
            stages = ?config.planned_stages(),
            "Starting pipeline"
        );

        let mut encoder = self.backend.encoder(&config.run.backbone, config.run.seed)?;
        let mut stages = Vec::new();
        let mut artifacts: Vec<RunArtifact> = Vec::new();

        let stage = TrainingStage::BasePretrain;
        self.check_cancelled(stage)?;
        match self.checkpoints.load(PretrainLevel::Base)? {
            Some(record) => {
                encoder.load_state_dict(&record.model_state)?;
                stages.push(self.skipped(stage, format!("level 1 checkpoint found (epoch {})", record.epoch)));
            }
            None => {
                let dataset = self.backend.dataset(DatasetRole::BasePool)?;
                let outcome = self.pretrain(stage, encoder.as_mut(), dataset.as_ref(), None, None).await?;
                stages.push(StageReport { stage, outcome });
                artifacts.push(make_artifact(
                    ArtifactKind::Checkpoint,
                    self.layout.checkpoint_path(PretrainLevel::Base),
                )?);
            }
        }

        let acquisition = if config.active_learning.enabled {
            let acquisition = self.acquire(encoder.as_mut()).await?;
            artifacts.push(make_artifact(ArtifactKind::Selection, acquisition.file.clone())?);
            stages.push(acquisition.report.clone());
            Some(acquisition)
        } else {
            None
        };

        if config.run.target_pretrain {
            let stage = TrainingStage::TargetPretrain;
            self.check_cancelled(stage)?;
            let params = resolve(config, stage)?;

            match self.checkpoints.load(PretrainLevel::Target)? {
                Some(record) if record.epoch >= params.epoch_count => {
                    encoder.load_state_dict(&record.model_state)?;
                    stages.push(self.skipped(stage, format!("level 2 checkpoint complete (epoch {})", record.epoch)));
                }
                resume => {
                    let (dataset, subset) = match &acquisition {
                        Some(acq) => (Arc::clone(&acq.dataset), Some(acq.paths.as_slice())),
                        None => (self.backend.dataset(DatasetRole::TargetPool)?, None),
                    };
                    let outcome = self.pretrain(stage, encoder.as_mut(), dataset.as_ref(), subset, resume).await?;
                    stages.push(StageReport { stage, outcome });
                    artifacts.push(make_artifact(
                        ArtifactKind::Checkpoint,
                        self.layout.checkpoint_path(PretrainLevel::Target),
                    )?);
                }
            }
        }

        let (outcome, accuracy) = self.linear_classifier(encoder.as_mut()).await?;
        stages.push(StageReport { stage: TrainingStage::LinearClassifier, outcome });

        let report = PipelineReport {
            run_id: self.run_id.clone(),
            created_at: Utc::now(),
            method: config.run.method,
            backbone: config.run.backbone.clone(),
            dataset: config.datasets.target.clone(),
            stages,
            selection: acquisition.map(|acq| acq.summary),
            accuracy: Some(accuracy),
            artifacts,
        };
        let path = report.write(&self.layout)?;

        info!(run_id = %self.run_id, accuracy, report = %path.display(), "Pipeline finished");
        self.emit(ProgressEvent::Finished { run_id: self.run_id.clone() });
        Ok(report)
    }

    /// Epoch loop of a pretraining stage, from `resume`'s epoch marker or from zero.
    async fn pretrain(
        &self,
        stage: TrainingStage,
        encoder: &mut dyn Encoder,
        dataset: &dyn Dataset,
        subset: Option<&[String]>,
        resume: Option<CheckpointRecord>,
    ) -> TrainingResult<StageOutcome> {
        let level = stage
            .pretrain_level()
            .ok_or_else(|| TrainingError::config(format!("{stage} is not a pretraining stage")))?;
        let params = resolve(&self.config, stage)?;
        let trainer = self.trainer_for(stage)?;
        let mut optimizer = self.backend.optimizer(&params, encoder.parameters().len())?;

        let mut start = 0;
        if let Some(record) = resume {
            encoder.load_state_dict(&record.model_state)?;
            optimizer.load_state(&record.optimizer_state)?;
            start = record.epoch.min(params.epoch_count);
            info!(stage = %stage, epoch = start, total = params.epoch_count, "Resuming from checkpoint");
        }

        self.emit(ProgressEvent::StageStarted { run_id: self.run_id.clone(), stage });
        let loader = dataset.loader(subset, params.batch_size)?;

        let mut scheduler = self
            .config
            .run
            .method
            .uses_lr_scheduler()
            .then(|| CosineAnnealing::new(params.learning_rate, params.epoch_count).starting_at(start));
        if let Some(scheduler) = &scheduler {
            scheduler.apply(optimizer.as_mut());
        }

        let interval = self.checkpoint_interval(&params);
        let mut final_loss = None;

        for epoch in start..params.epoch_count {
            self.check_cancelled(stage)?;

            let loss = trainer.run_epoch(stage, &mut *encoder, optimizer.as_mut(), loader.as_ref(), &params).await?;
            final_loss = Some(loss);
            self.emit(ProgressEvent::Epoch {
                run_id: self.run_id.clone(),
                stage,
                epoch,
                total: params.epoch_count,
                loss,
            });

            if let Some(scheduler) = scheduler.as_mut() {
                scheduler.step();
                scheduler.apply(optimizer.as_mut());
            }

            let completed = epoch + 1;
            if completed < params.epoch_count && completed % interval == 0 {
                self.save_checkpoint(level, &*encoder, optimizer.as_ref(), completed)?;
            }
        }

        self.save_checkpoint(level, &*encoder, optimizer.as_ref(), params.epoch_count)?;
        Ok(StageOutcome::Completed { epochs_run: params.epoch_count - start, final_loss })
    }

    /// Acquisition branch. A selection stored under the same key is reused as
    /// is, together with the encoder state acquisition left behind.
    async fn acquire(&self, encoder: &mut dyn Encoder) -> TrainingResult<Acquisition> {
        let config = &self.config;
        let stage = config.acquisition_stage();
        self.check_cancelled(stage)?;

        let schedule = config.budget_schedule()?;
        let key = config.selection_key()?;
        let role = match config.active_learning.pool {
            AcquisitionPool::Base => DatasetRole::BasePool,
            AcquisitionPool::Target => DatasetRole::TargetPool,
        };
        let dataset = self.backend.dataset(role)?;

        if let Some(records) = self.selections.load(&key)? {
            info!(key = %key, count = records.len(), "Reusing stored selection");
            match self.selections.load_encoder_state(&key)? {
                Some(state) => encoder.load_state_dict(&state)?,
                None => warn!(key = %key, "No encoder state stored with selection, continuing from the current encoder"),
            }
            return Ok(Acquisition {
                dataset,
                paths: records.iter().map(|r| r.path.clone()).collect(),
                file: self.layout.selection_path(&key),
                summary: SelectionSummary {
                    key: key.clone(),
                    selected: records.len(),
                    requested: schedule.total(),
                    reused: true,
                },
                report: self.skipped(stage, format!("reusing stored selection '{key}'")),
            });
        }

        self.emit(ProgressEvent::StageStarted { run_id: self.run_id.clone(), stage });
        let params = resolve(config, stage)?;
        let mut optimizer = self.backend.optimizer(&params, encoder.parameters().len())?;
        let selector = ActiveLearningSelector::new(self.trainer_for(stage)?, stage, params)
            .with_finetune(FinetunePlan {
                epochs: config.active_learning.finetune_epochs,
                ratio: config.active_learning.finetune_ratio,
            })
            .with_progress(self.run_id.clone(), Arc::clone(&self.progress))
            .with_cancellation(self.cancel.clone());

        let outcome = selector.select(&schedule, dataset.as_ref(), encoder, optimizer.as_mut()).await?;
        let records = outcome.selection.into_records();
        // the selection file marks acquisition as done, so it is written last
        self.selections.save_encoder_state(&key, &encoder.state_dict()?)?;
        let file = self.selections.save(&key, &records)?;

        Ok(Acquisition {
            dataset,
            paths: records.iter().map(|r| r.path.clone()).collect(),
            file,
            summary: SelectionSummary { key, selected: records.len(), requested: schedule.total(), reused: false },
            report: StageReport {
                stage,
                outcome: StageOutcome::Acquired { rounds: outcome.rounds_completed, selected: records.len() },
            },
        })
    }

    /// Trains a head on frozen encoder features and returns validation accuracy.
    async fn linear_classifier(&self, encoder: &mut dyn Encoder) -> TrainingResult<(StageOutcome, f64)> {
        let stage = TrainingStage::LinearClassifier;
        self.check_cancelled(stage)?;

        let level = if self.config.run.target_pretrain { PretrainLevel::Target } else { PretrainLevel::Base };
        let record = self.checkpoints.load(level)?.ok_or_else(|| {
            TrainingError::Other(anyhow::anyhow!("no level {level} checkpoint to build the classifier on"))
        })?;
        encoder.load_state_dict(&record.model_state)?;
        debug!(level = %level, epoch = record.epoch, "Loaded encoder for linear classifier");

        self.emit(ProgressEvent::StageStarted { run_id: self.run_id.clone(), stage });
        let params = resolve(&self.config, stage)?;
        let train = self.backend.dataset(DatasetRole::ClassifierTrain)?;
        let val = self.backend.dataset(DatasetRole::ClassifierVal)?;

        let (features, labels) = extract_features(&*encoder, train.loader(None, params.batch_size)?.as_ref())?;
        let Some(dim) = features.first().map(Vec::len) else {
            return Err(TrainingError::empty_dataset(stage));
        };
        let classes = train.class_count().max(labels.iter().max().map_or(0, |m| m + 1));
        let mut head = self.backend.classifier_head(dim, classes)?;

        let mut scheduler = CosineAnnealing::new(params.learning_rate, params.epoch_count);
        let mut final_loss = None;
        for epoch in 0..params.epoch_count {
            self.check_cancelled(stage)?;

            let mut meter = LossMeter::default();
            let lr = scheduler.learning_rate();
            for (x, y) in features.chunks(params.batch_size).zip(labels.chunks(params.batch_size)) {
                meter.update(head.fit_batch(x, y, lr, params.weight_decay)?, x.len());
            }
            let loss = meter.average().unwrap_or(meter.last);
            final_loss = Some(loss);
            self.emit(ProgressEvent::Epoch { run_id: self.run_id.clone(), stage, epoch, total: params.epoch_count, loss });
            scheduler.step();
        }

        let accuracy = evaluate(&*encoder, head.as_ref(), val.loader(None, params.batch_size)?.as_ref(), stage)?;
        info!(stage = %stage, accuracy, classes, "Linear classifier evaluated");

        Ok((StageOutcome::Completed { epochs_run: params.epoch_count, final_loss }, accuracy))
    }
}

/// Embeds every labelled item of `loader` with the frozen encoder.
fn extract_features(encoder: &dyn Encoder, loader: &dyn DataLoader) -> TrainingResult<(Vec<Vec<f32>>, Vec<usize>)> {
    let mut features = Vec::with_capacity(loader.len_hint().unwrap_or(0));
    let mut labels = Vec::with_capacity(features.capacity());

    for batch in loader.batches() {
        for item in batch?.items {
            let label = item
                .label
                .ok_or_else(|| CollaboratorError::Data(format!("{} has no label", item.path)))?;
            features.push(encoder.embed(&item.input)?);
            labels.push(label);
        }
    }
    Ok((features, labels))
}

fn evaluate(
    encoder: &dyn Encoder,
    head: &dyn ClassifierHead,
    loader: &dyn DataLoader,
    stage: TrainingStage,
) -> TrainingResult<f64> {
    let (features, labels) = extract_features(encoder, loader)?;
    if features.is_empty() {
        return Err(TrainingError::empty_dataset(stage));
    }

    let correct = features.iter().zip(&labels).filter(|(x, y)| head.predict(x) == **y).count();
    Ok(correct as f64 / features.len() as f64)
}
