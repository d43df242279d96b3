use crate::report::RunId;
use crate::stage::TrainingStage;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started { run_id: RunId },
    StageStarted { run_id: RunId, stage: TrainingStage },
    StageSkipped { run_id: RunId, stage: TrainingStage, reason: String },
    Epoch { run_id: RunId, stage: TrainingStage, epoch: u32, total: u32, loss: f64 },
    RoundSelected { run_id: RunId, round: usize, requested: i64, selected: usize, remaining: usize },
    Finished { run_id: RunId },
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

/// Forwards progress events to `tracing`.
#[derive(Debug, Default)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { run_id } => info!(run_id = %run_id, "Pipeline started"),
            ProgressEvent::StageStarted { run_id, stage } => {
                info!(run_id = %run_id, stage = %stage, "Stage started");
            }
            ProgressEvent::StageSkipped { run_id, stage, reason } => {
                info!(run_id = %run_id, stage = %stage, reason = %reason, "Stage skipped");
            }
            ProgressEvent::Epoch { run_id, stage, epoch, total, loss } => {
                info!(run_id = %run_id, stage = %stage, "epoch {}/{} loss {:.4}", epoch + 1, total, loss);
            }
            ProgressEvent::RoundSelected { run_id, round, requested, selected, remaining } => {
                info!(run_id = %run_id, round, requested, selected, remaining, "Acquisition round complete");
            }
            ProgressEvent::Finished { run_id } => info!(run_id = %run_id, "Pipeline finished"),
        }
    }
}
