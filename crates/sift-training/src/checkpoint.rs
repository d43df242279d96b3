//! Checkpoint persistence keyed by pretrain level.
//!
//! Each level owns one JSON envelope holding base64 model/optimizer blobs, the
//! epoch marker and a SHA-256 digest over all of them. Saves go through a
//! temp-file-then-rename so a crash never leaves a half-written envelope in
//! place of a good one.
//!
//! A file that does not even parse (typically a truncated write from an
//! older, non-atomic writer) is reported as absent with a warning. A file that
//! parses but fails its digest is surfaced as [`TrainingError::CheckpointCorrupt`]
//! so an operator decides whether to delete it and retrain.

use crate::error::{TrainingError, TrainingResult};
use crate::layout::{atomic_write, RunLayout};
use crate::stage::PretrainLevel;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

const FORMAT_VERSION: u32 = 1;

/// Model and optimizer state for one pretrain level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRecord {
    pub pretrain_level: PretrainLevel,
    pub model_state: Vec<u8>,
    pub optimizer_state: Vec<u8>,
    /// Number of completed epochs when the record was written.
    pub epoch: u32,
}

/// Metadata of a stored checkpoint, without the blobs.
#[derive(Debug, Clone, Serialize)]
pub struct CheckpointSummary {
    pub pretrain_level: PretrainLevel,
    pub epoch: u32,
    pub saved_at: DateTime<Utc>,
    pub path: PathBuf,
    pub bytes: u64,
    /// Why the file failed verification, if it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub problem: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    format: u32,
    pretrain_level: PretrainLevel,
    epoch: u32,
    saved_at: DateTime<Utc>,
    sha256: String,
    model_state: String,
    optimizer_state: String,
}

fn digest(level: PretrainLevel, epoch: u32, model: &[u8], optimizer: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(level.as_str().as_bytes());
    hasher.update(epoch.to_le_bytes());
    hasher.update((model.len() as u64).to_le_bytes());
    hasher.update(model);
    hasher.update((optimizer.len() as u64).to_le_bytes());
    hasher.update(optimizer);
    hex::encode(hasher.finalize())
}

/// File-backed checkpoint store.
#[derive(Debug)]
pub struct CheckpointStore {
    layout: RunLayout,
    write_lock: Mutex<()>,
}

impl CheckpointStore {
    #[must_use]
    pub fn new(layout: RunLayout) -> Self {
        Self { layout, write_lock: Mutex::new(()) }
    }

    #[must_use]
    pub fn layout(&self) -> &RunLayout {
        &self.layout
    }

    fn read_envelope(&self, level: PretrainLevel) -> TrainingResult<Option<Envelope>> {
        let path = self.layout.checkpoint_path(level);
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice(&bytes) {
            Ok(env) => Ok(Some(env)),
            Err(e) => {
                warn!(
                    level = %level,
                    path = %path.display(),
                    error = %e,
                    "Unreadable checkpoint treated as absent"
                );
                Ok(None)
            }
        }
    }

    fn verify(level: PretrainLevel, envelope: Envelope) -> TrainingResult<CheckpointRecord> {
        let corrupt = |reason: String| TrainingError::CheckpointCorrupt { level, reason };

        if envelope.format != FORMAT_VERSION {
            return Err(corrupt(format!("unsupported format version {}", envelope.format)));
        }
        if envelope.pretrain_level != level {
            return Err(corrupt(format!("file holds level {} state", envelope.pretrain_level)));
        }

        let model_state = BASE64
            .decode(envelope.model_state.as_bytes())
            .map_err(|e| corrupt(format!("model state is not valid base64: {e}")))?;
        let optimizer_state = BASE64
            .decode(envelope.optimizer_state.as_bytes())
            .map_err(|e| corrupt(format!("optimizer state is not valid base64: {e}")))?;

        if digest(level, envelope.epoch, &model_state, &optimizer_state) != envelope.sha256 {
            return Err(corrupt("digest mismatch".to_string()));
        }

        Ok(CheckpointRecord { pretrain_level: level, model_state, optimizer_state, epoch: envelope.epoch })
    }

    /// Load the record for `level`. `Ok(None)` means no usable checkpoint exists.
    pub fn load(&self, level: PretrainLevel) -> TrainingResult<Option<CheckpointRecord>> {
        let Some(envelope) = self.read_envelope(level)? else {
            return Ok(None);
        };
        let record = Self::verify(level, envelope)?;
        debug!(level = %level, epoch = record.epoch, "Loaded checkpoint");
        Ok(Some(record))
    }

    /// Save (overwrite) the record for `level`.
    pub fn save(
        &self,
        level: PretrainLevel,
        model_state: &[u8],
        optimizer_state: &[u8],
        epoch: u32,
    ) -> TrainingResult<()> {
        let envelope = Envelope {
            format: FORMAT_VERSION,
            pretrain_level: level,
            epoch,
            saved_at: Utc::now(),
            sha256: digest(level, epoch, model_state, optimizer_state),
            model_state: BASE64.encode(model_state),
            optimizer_state: BASE64.encode(optimizer_state),
        };
        let json = serde_json::to_vec(&envelope)?;

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        atomic_write(&self.layout.checkpoint_path(level), &json)?;

        debug!(level = %level, epoch, bytes = json.len(), "Saved checkpoint");
        Ok(())
    }

    /// Summaries of every stored checkpoint. A level that fails verification
    /// is still listed, with the reason in `problem`.
    pub fn list(&self) -> TrainingResult<Vec<CheckpointSummary>> {
        let mut out = Vec::new();
        for level in PretrainLevel::ALL {
            let Some(envelope) = self.read_envelope(level)? else {
                continue;
            };
            let saved_at = envelope.saved_at;
            let epoch = envelope.epoch;
            let problem = Self::verify(level, envelope).err().map(|e| e.to_string());
            if let Some(reason) = &problem {
                warn!(level = %level, reason = %reason, "Checkpoint failed verification");
            }

            let path = self.layout.checkpoint_path(level);
            let bytes = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            out.push(CheckpointSummary { pretrain_level: level, epoch, saved_at, path, bytes, problem });
        }
        Ok(out)
    }

    /// Remove the record for `level`. Returns whether a file was removed.
    pub fn clear(&self, level: PretrainLevel) -> TrainingResult<bool> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        match std::fs::remove_file(self.layout.checkpoint_path(level)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
