//! End-to-end tests for the stage state machine over the reference backend.

mod common;

use common::RecordingSink;
use sift_abstraction::{Encoder, Optimizer};
use sift_training::reference::{PrototypeEncoder, Sgd};
use sift_training::{
    CheckpointStore, Method, Pipeline, PretrainLevel, ProgressEvent, ReferenceBackend, RunLayout, SelectionStore,
    StageOutcome, TrainingError, TrainingStage,
};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn layout(temp: &TempDir) -> RunLayout {
    RunLayout::for_workspace_root(temp.path())
}

fn pipeline(temp: &TempDir, config: sift_training::PipelineConfig) -> (Pipeline, Arc<common::CallCounts>) {
    let (registry, counts) = common::spy_registry();
    let backend = Arc::new(ReferenceBackend::from_config(&config));
    (Pipeline::new(config, backend, registry, layout(temp)).unwrap(), counts)
}

fn fixture() -> TempDir {
    let temp = TempDir::new().unwrap();
    common::write_dataset(temp.path());
    temp
}

#[tokio::test]
async fn test_full_run_writes_state() {
    let temp = fixture();
    let (pipeline, counts) = pipeline(&temp, common::pipeline_config(temp.path()));
    let sink = Arc::new(RecordingSink::default());
    let pipeline = pipeline.with_progress(sink.clone());

    let report = pipeline.run().await.unwrap();

    // base 4, one fine-tuning epoch between the two rounds, target 3
    assert_eq!(counts.epochs(), 8);
    assert_eq!(counts.scores(), 2);

    let stages: Vec<TrainingStage> = report.stages.iter().map(|s| s.stage).collect();
    assert_eq!(
        stages,
        vec![
            TrainingStage::BasePretrain,
            TrainingStage::ActiveLearning,
            TrainingStage::TargetPretrain,
            TrainingStage::LinearClassifier,
        ]
    );
    assert!(matches!(
        report.stage(TrainingStage::ActiveLearning).unwrap().outcome,
        StageOutcome::Acquired { rounds: 2, selected: 6 }
    ));
    let accuracy = report.accuracy.unwrap();
    assert!((0.0..=1.0).contains(&accuracy));

    let store = CheckpointStore::new(layout(&temp));
    assert_eq!(store.load(PretrainLevel::Base).unwrap().unwrap().epoch, 4);
    assert_eq!(store.load(PretrainLevel::Target).unwrap().unwrap().epoch, 3);

    let selection = SelectionStore::new(layout(&temp)).load("toy_target_4-2").unwrap().unwrap();
    assert_eq!(selection.len(), 6);
    assert!(layout(&temp).report_path(&report.run_id).exists());
    assert_eq!(report.artifacts.len(), 3);

    let events = sink.events();
    assert!(matches!(events.first(), Some(ProgressEvent::Started { .. })));
    assert!(matches!(events.last(), Some(ProgressEvent::Finished { .. })));
    let rounds = events.iter().filter(|e| matches!(e, ProgressEvent::RoundSelected { .. })).count();
    assert_eq!(rounds, 2);
}

#[tokio::test]
async fn test_rerun_trains_nothing() {
    let temp = fixture();
    let (first, _) = pipeline(&temp, common::pipeline_config(temp.path()));
    first.run().await.unwrap();

    let (second, counts) = pipeline(&temp, common::pipeline_config(temp.path()));
    let report = second.run().await.unwrap();

    assert_eq!(counts.epochs(), 0);
    assert_eq!(counts.scores(), 0);
    let selection = report.selection.as_ref().unwrap();
    assert!(selection.reused);
    assert_eq!(selection.selected, 6);
    for stage in [TrainingStage::BasePretrain, TrainingStage::ActiveLearning, TrainingStage::TargetPretrain] {
        assert!(matches!(report.stage(stage).unwrap().outcome, StageOutcome::Skipped { .. }), "{stage}");
    }
}

#[tokio::test]
async fn test_retraining_target_after_clear_reproduces_model() {
    let temp = fixture();
    let (first, _) = pipeline(&temp, common::pipeline_config(temp.path()));
    first.run().await.unwrap();

    let store = CheckpointStore::new(layout(&temp));
    let before = store.load(PretrainLevel::Target).unwrap().unwrap();
    assert!(layout(&temp).selection_encoder_path("toy_target_4-2").exists());
    assert!(store.clear(PretrainLevel::Target).unwrap());

    let (second, counts) = pipeline(&temp, common::pipeline_config(temp.path()));
    let report = second.run().await.unwrap();

    // only the target stage trains again; the selection and its encoder state are reused
    assert_eq!(counts.epochs(), 3);
    assert_eq!(counts.scores(), 0);
    assert!(report.selection.unwrap().reused);
    let after = store.load(PretrainLevel::Target).unwrap().unwrap();
    assert_eq!(after.epoch, before.epoch);
    assert_eq!(after.model_state, before.model_state);
    assert_eq!(after.optimizer_state, before.optimizer_state);
}

#[tokio::test]
async fn test_existing_base_checkpoint_skips_base() {
    let temp = fixture();
    let mut config = common::pipeline_config(temp.path());
    config.active_learning.enabled = false;
    config.run.target_pretrain = false;

    let encoder = PrototypeEncoder::new("prototype", 8, 99);
    let optimizer = Sgd::new(0.05, 0.0, 8);
    let store = CheckpointStore::new(layout(&temp));
    store.save(PretrainLevel::Base, &encoder.state_dict().unwrap(), &optimizer.state().unwrap(), 4).unwrap();

    let (pipeline, counts) = pipeline(&temp, config);
    let report = pipeline.run().await.unwrap();

    assert_eq!(counts.epochs(), 0);
    assert_eq!(report.stages.len(), 2);
    assert!(matches!(report.stages[0].outcome, StageOutcome::Skipped { .. }));
    assert!(report.selection.is_none());
    assert!(store.load(PretrainLevel::Target).unwrap().is_none());
}

#[tokio::test]
async fn test_partial_target_checkpoint_resumes() {
    let temp = fixture();
    let (first, _) = pipeline(&temp, common::pipeline_config(temp.path()));
    first.run().await.unwrap();

    let store = CheckpointStore::new(layout(&temp));
    let record = store.load(PretrainLevel::Target).unwrap().unwrap();
    store.save(PretrainLevel::Target, &record.model_state, &record.optimizer_state, 1).unwrap();

    let (second, counts) = pipeline(&temp, common::pipeline_config(temp.path()));
    let report = second.run().await.unwrap();

    assert_eq!(counts.epochs(), 2);
    assert!(matches!(
        report.stage(TrainingStage::TargetPretrain).unwrap().outcome,
        StageOutcome::Completed { epochs_run: 2, .. }
    ));
    assert_eq!(store.load(PretrainLevel::Target).unwrap().unwrap().epoch, 3);
}

#[tokio::test]
async fn test_cancel_stops_at_epoch_boundary() {
    let temp = fixture();
    let token = CancellationToken::new();
    let trigger = token.clone();
    let sink = Arc::new(RecordingSink::with_hook(move |event| {
        if let ProgressEvent::Epoch { stage: TrainingStage::BasePretrain, epoch: 1, .. } = event {
            trigger.cancel();
        }
    }));

    let (pipeline, counts) = pipeline(&temp, common::pipeline_config(temp.path()));
    let pipeline = pipeline.with_progress(sink).with_cancellation(token);

    let err = pipeline.run().await.unwrap_err();

    assert!(matches!(err, TrainingError::Cancelled { stage: TrainingStage::BasePretrain }));
    assert_eq!(counts.epochs(), 2);
    // the mid-stage checkpoint after epoch 2 was still written
    let record = CheckpointStore::new(layout(&temp)).load(PretrainLevel::Base).unwrap().unwrap();
    assert_eq!(record.epoch, 2);
}

#[tokio::test]
async fn test_unregistered_method_rejected() {
    let temp = fixture();
    let mut config = common::pipeline_config(temp.path());
    config.run.method = Method::Swav;

    let (registry, _) = common::spy_registry();
    let backend = Arc::new(ReferenceBackend::from_config(&config));
    let err = Pipeline::new(config, backend, registry, layout(&temp)).unwrap_err();

    assert!(matches!(err, TrainingError::Configuration(_)));
    assert!(!temp.path().join(".sift").exists());
}

#[tokio::test]
async fn test_missing_dataset_fails_before_writing_checkpoints() {
    let temp = TempDir::new().unwrap();
    let (pipeline, _) = pipeline(&temp, common::pipeline_config(temp.path()));

    let err = pipeline.run().await.unwrap_err();

    assert!(matches!(err, TrainingError::Configuration(_)), "{err}");
    assert!(CheckpointStore::new(layout(&temp)).list().unwrap().is_empty());
}
