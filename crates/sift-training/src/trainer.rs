use crate::error::{TrainingError, TrainingResult};
use crate::params::StageParameters;
use crate::sample::SampleRecord;
use crate::stage::{Method, TrainingStage};
use async_trait::async_trait;
use sift_abstraction::{CollaboratorError, DataLoader, Encoder, Objective, Optimizer};
use std::sync::Arc;
use tracing::{debug, info};

/// Runs pretext training for one stage.
///
/// `run_epoch` trains (mutates the encoder); `score_pool` only reads it.
#[async_trait]
pub trait PretextTrainer: Send + Sync {
    fn method(&self) -> Method;

    /// One full pass over `loader`. Returns the batch-size-weighted mean loss.
    ///
    /// Fails with [`TrainingError::EmptyDataset`] if the loader yields no items.
    async fn run_epoch(
        &self,
        stage: TrainingStage,
        encoder: &mut dyn Encoder,
        optimizer: &mut dyn Optimizer,
        loader: &dyn DataLoader,
        params: &StageParameters,
    ) -> TrainingResult<f64>;

    /// One record per item in `loader`. Order is unspecified.
    async fn score_pool(
        &self,
        encoder: &dyn Encoder,
        loader: &dyn DataLoader,
    ) -> TrainingResult<Vec<SampleRecord>>;
}

/// Running mean of per-batch losses weighted by batch size.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LossMeter {
    pub last: f64,
    sum: f64,
    count: usize,
}

impl LossMeter {
    pub fn update(&mut self, loss: f64, n: usize) {
        self.last = loss;
        self.sum += loss * n as f64;
        self.count += n;
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }

    /// `None` until at least one item has been recorded.
    #[must_use]
    pub fn average(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// Losses must be finite and non-negative.
fn check_loss(loss: f64) -> TrainingResult<f64> {
    if !loss.is_finite() || loss < 0.0 {
        return Err(CollaboratorError::Objective(format!("objective produced an invalid loss: {loss}")).into());
    }
    Ok(loss)
}

/// Trainer that delegates the loss to an [`Objective`].
pub struct ObjectiveTrainer {
    method: Method,
    objective: Arc<dyn Objective>,
    log_step: usize,
}

impl ObjectiveTrainer {
    #[must_use]
    pub fn new(method: Method, objective: Arc<dyn Objective>, log_step: usize) -> Self {
        Self { method, objective, log_step: log_step.max(1) }
    }
}

impl std::fmt::Debug for ObjectiveTrainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectiveTrainer")
            .field("method", &self.method)
            .field("objective", &self.objective.name())
            .field("log_step", &self.log_step)
            .finish()
    }
}

#[async_trait]
impl PretextTrainer for ObjectiveTrainer {
    fn method(&self) -> Method {
        self.method
    }

    async fn run_epoch(
        &self,
        stage: TrainingStage,
        encoder: &mut dyn Encoder,
        optimizer: &mut dyn Optimizer,
        loader: &dyn DataLoader,
        params: &StageParameters,
    ) -> TrainingResult<f64> {
        let mut meter = LossMeter::default();

        for (step, batch) in loader.batches().enumerate() {
            let batch = batch?;
            if batch.is_empty() {
                continue;
            }

            optimizer.zero_grad();
            let (loss, gradient) = self.objective.loss_and_gradient(&*encoder, &batch)?;
            let loss = check_loss(loss)?;
            optimizer.accumulate(&gradient)?;
            optimizer.step(encoder.parameters_mut())?;

            meter.update(loss, batch.len());

            if step % self.log_step == 0 {
                info!(
                    stage = %stage,
                    step,
                    batch_size = params.batch_size,
                    "loss {:.4} ({:.4}) lr {:.6}",
                    meter.last,
                    meter.average().unwrap_or(meter.last),
                    optimizer.learning_rate()
                );
            }
        }

        meter.average().ok_or_else(|| TrainingError::empty_dataset(stage))
    }

    async fn score_pool(
        &self,
        encoder: &dyn Encoder,
        loader: &dyn DataLoader,
    ) -> TrainingResult<Vec<SampleRecord>> {
        let mut records = Vec::with_capacity(loader.len_hint().unwrap_or(0));

        for batch in loader.batches() {
            let batch = batch?;
            let losses = self.objective.item_losses(encoder, &batch)?;
            if losses.len() != batch.len() {
                return Err(CollaboratorError::ShapeMismatch { expected: batch.len(), actual: losses.len() }.into());
            }
            for (item, loss) in batch.items.into_iter().zip(losses) {
                records.push(SampleRecord { path: item.path, loss: check_loss(loss)? });
            }
        }

        debug!(objective = self.objective.name(), count = records.len(), "Scored pool");
        Ok(records)
    }
}
