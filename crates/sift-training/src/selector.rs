//! Loss-ranked acquisition over a budget schedule.
//!
//! Each round scores the remaining pool with the current encoder, keeps the
//! highest-loss items up to the round's budget, removes them from the pool
//! and appends them to the accumulated [`Selection`]. Between rounds the
//! encoder may be fine-tuned on what has been selected so far.

use crate::error::{TrainingError, TrainingResult};
use crate::params::StageParameters;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::report::RunId;
use crate::sample::{SampleRecord, Selection};
use crate::schedule::BudgetSchedule;
use crate::stage::TrainingStage;
use crate::trainer::PretextTrainer;
use sift_abstraction::{Dataset, Encoder, Optimizer};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Ranks one round's scores against the pool and returns at most `budget` records.
///
/// Ordering is by loss, descending. Equal losses keep the order of `pool`.
/// When a path was scored more than once the last score wins. Records for
/// paths outside `pool` are ignored and unscored pool paths are not eligible.
#[must_use]
pub fn rank_round(pool: &[String], records: Vec<SampleRecord>, budget: usize) -> Vec<SampleRecord> {
    let mut scores: HashMap<String, f64> = HashMap::with_capacity(records.len());
    for record in records {
        scores.insert(record.path, record.loss);
    }

    let mut ranked: Vec<SampleRecord> = pool
        .iter()
        .filter_map(|path| scores.get(path).map(|loss| SampleRecord::new(path.clone(), *loss)))
        .collect();

    // sort_by is stable, so ties stay in pool order
    ranked.sort_by(|a, b| b.loss.total_cmp(&a.loss));
    ranked.truncate(budget);
    ranked
}

/// Records of `selection` used for between-round fine-tuning: the
/// highest-loss `ratio` share, at least one record.
#[must_use]
pub fn finetune_subset(selection: &Selection, ratio: f64) -> Vec<String> {
    if selection.is_empty() {
        return Vec::new();
    }

    let mut records: Vec<&SampleRecord> = selection.records().iter().collect();
    records.sort_by(|a, b| b.loss.total_cmp(&a.loss));

    let wanted = (selection.len() as f64 * ratio.clamp(0.0, 1.0)).ceil() as usize;
    records.into_iter().take(wanted.max(1)).map(|r| r.path.clone()).collect()
}

/// Result of a full acquisition run.
#[derive(Debug, Clone, Default)]
pub struct SelectionOutcome {
    pub selection: Selection,
    /// Rounds that selected from the pool before the schedule ended or stopped.
    pub rounds_completed: usize,
}

/// Fine-tuning between acquisition rounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FinetunePlan {
    pub epochs: u32,
    pub ratio: f64,
}

impl Default for FinetunePlan {
    fn default() -> Self {
        Self { epochs: 0, ratio: 1.0 }
    }
}

pub struct ActiveLearningSelector {
    trainer: Arc<dyn PretextTrainer>,
    stage: TrainingStage,
    params: StageParameters,
    finetune: FinetunePlan,
    run_id: RunId,
    progress: Option<Arc<dyn ProgressSink>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ActiveLearningSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveLearningSelector")
            .field("method", &self.trainer.method())
            .field("stage", &self.stage)
            .field("finetune", &self.finetune)
            .finish_non_exhaustive()
    }
}

impl ActiveLearningSelector {
    #[must_use]
    pub fn new(trainer: Arc<dyn PretextTrainer>, stage: TrainingStage, params: StageParameters) -> Self {
        Self {
            trainer,
            stage,
            params,
            finetune: FinetunePlan::default(),
            run_id: RunId::new(),
            progress: None,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_finetune(mut self, plan: FinetunePlan) -> Self {
        self.finetune = plan;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, run_id: RunId, sink: Arc<dyn ProgressSink>) -> Self {
        self.run_id = run_id;
        self.progress = Some(sink);
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(sink) = &self.progress {
            sink.on_event(event);
        }
    }

    fn check_cancelled(&self) -> TrainingResult<()> {
        if self.cancel.is_cancelled() {
            return Err(TrainingError::Cancelled { stage: self.stage });
        }
        Ok(())
    }

    /// Runs every round of `schedule` over `dataset` and returns the accumulated selection.
    ///
    /// The encoder is only read while scoring. It is trained only when a
    /// fine-tuning plan is set, between rounds.
    ///
    /// A non-positive budget or an exhausted pool ends acquisition early with a
    /// warning; whatever was accumulated up to that point is returned.
    pub async fn select(
        &self,
        schedule: &BudgetSchedule,
        dataset: &dyn Dataset,
        encoder: &mut dyn Encoder,
        optimizer: &mut dyn Optimizer,
    ) -> TrainingResult<SelectionOutcome> {
        let mut remaining = dataset.paths();
        let mut selection = Selection::new();
        let mut rounds_completed = 0;
        let rounds = schedule.rounds();

        info!(
            stage = %self.stage,
            dataset = dataset.id(),
            pool = remaining.len(),
            rounds = rounds.len(),
            "Starting acquisition"
        );

        for (round, &requested) in rounds.iter().enumerate() {
            self.check_cancelled()?;

            if requested <= 0 || remaining.is_empty() {
                let err = TrainingError::AcquisitionBudget { round, requested, available: remaining.len() };
                warn!(stage = %self.stage, error = %err, "Stopping acquisition, remaining rounds select nothing");
                break;
            }

            let loader = dataset.loader(Some(remaining.as_slice()), self.params.batch_size)?;
            let records = self.trainer.score_pool(&*encoder, loader.as_ref()).await?;

            let budget = usize::try_from(requested).unwrap_or(usize::MAX).min(remaining.len());
            let chosen = rank_round(&remaining, records, budget);

            let chosen_paths: HashSet<String> = chosen.iter().map(|r| r.path.clone()).collect();
            remaining.retain(|path| !chosen_paths.contains(path));

            let mut admitted = 0;
            for record in chosen {
                if selection.push(record) {
                    admitted += 1;
                }
            }

            rounds_completed += 1;
            self.emit(ProgressEvent::RoundSelected {
                run_id: self.run_id.clone(),
                round,
                requested,
                selected: admitted,
                remaining: remaining.len(),
            });

            if round + 1 < rounds.len() && self.finetune.epochs > 0 {
                self.finetune_on_selection(dataset, &selection, encoder, optimizer).await?;
            }
        }

        info!(stage = %self.stage, rounds = rounds_completed, selected = selection.len(), "Acquisition finished");
        Ok(SelectionOutcome { selection, rounds_completed })
    }

    async fn finetune_on_selection(
        &self,
        dataset: &dyn Dataset,
        selection: &Selection,
        encoder: &mut dyn Encoder,
        optimizer: &mut dyn Optimizer,
    ) -> TrainingResult<()> {
        let subset = finetune_subset(selection, self.finetune.ratio);
        if subset.is_empty() {
            return Ok(());
        }

        let loader = dataset.loader(Some(subset.as_slice()), self.params.batch_size)?;
        for epoch in 0..self.finetune.epochs {
            self.check_cancelled()?;
            let loss = self
                .trainer
                .run_epoch(self.stage, &mut *encoder, &mut *optimizer, loader.as_ref(), &self.params)
                .await?;
            debug!(stage = %self.stage, epoch, items = subset.len(), loss, "Fine-tuned on selection");
        }
        Ok(())
    }
}
