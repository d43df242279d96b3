use crate::error::{TrainingError, TrainingResult};
use crate::layout::{atomic_write, RunLayout};
use crate::sample::{records_from_jsonl, records_to_jsonl, SampleRecord};
use std::path::PathBuf;
use tracing::debug;

/// Rejects keys that could leave the selections directory: empty keys, keys
/// with a path separator and keys starting with a dot.
pub fn check_key(key: &str) -> TrainingResult<()> {
    if key.is_empty() || key.starts_with('.') || key.contains(['/', '\\', '\0']) {
        return Err(TrainingError::config(format!("invalid selection key '{key}'")));
    }
    Ok(())
}

/// Persisted acquisition results, one JSONL file per configuration key.
///
/// Next to each selection the store keeps the encoder state acquisition
/// finished with, so a reused selection continues from the same encoder.
#[derive(Debug, Clone)]
pub struct SelectionStore {
    layout: RunLayout,
}

/// A stored selection file.
#[derive(Debug, Clone)]
pub struct StoredSelection {
    pub key: String,
    pub path: PathBuf,
    pub records: Vec<SampleRecord>,
}

impl SelectionStore {
    #[must_use]
    pub fn new(layout: RunLayout) -> Self {
        Self { layout }
    }

    pub fn load(&self, key: &str) -> TrainingResult<Option<Vec<SampleRecord>>> {
        check_key(key)?;
        let path = self.layout.selection_path(key);
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let records = records_from_jsonl(&contents)?;
        debug!(key, count = records.len(), "Loaded stored selection");
        Ok(Some(records))
    }

    pub fn save(&self, key: &str, records: &[SampleRecord]) -> TrainingResult<PathBuf> {
        check_key(key)?;
        let path = self.layout.selection_path(key);
        atomic_write(&path, records_to_jsonl(records)?.as_bytes())?;
        debug!(key, count = records.len(), "Saved selection");
        Ok(path)
    }

    pub fn load_encoder_state(&self, key: &str) -> TrainingResult<Option<Vec<u8>>> {
        check_key(key)?;
        match std::fs::read(self.layout.selection_encoder_path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save_encoder_state(&self, key: &str, state: &[u8]) -> TrainingResult<PathBuf> {
        check_key(key)?;
        let path = self.layout.selection_encoder_path(key);
        atomic_write(&path, state)?;
        debug!(key, bytes = state.len(), "Saved post-acquisition encoder state");
        Ok(path)
    }

    /// Every stored selection, sorted by key.
    pub fn list(&self) -> TrainingResult<Vec<StoredSelection>> {
        let mut out = Vec::new();

        let dir = match std::fs::read_dir(self.layout.selections_dir()) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };

        for entry in dir {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            let records = records_from_jsonl(&std::fs::read_to_string(&path)?)?;
            out.push(StoredSelection { key, path, records });
        }

        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }
}
