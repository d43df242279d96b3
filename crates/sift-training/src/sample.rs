use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A data item's path paired with the loss it produced in a scoring pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub path: String,
    pub loss: f64,
}

impl SampleRecord {
    #[must_use]
    pub fn new(path: impl Into<String>, loss: f64) -> Self {
        Self { path: path.into(), loss }
    }
}

/// Records accumulated across acquisition rounds, in selection order.
///
/// A path is only ever admitted once.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    records: Vec<SampleRecord>,
    seen: HashSet<String>,
}

impl Selection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a record. Returns `false` and drops it if the path is already selected.
    pub fn push(&mut self, record: SampleRecord) -> bool {
        if self.seen.contains(&record.path) {
            return false;
        }
        self.seen.insert(record.path.clone());
        self.records.push(record);
        true
    }

    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.seen.contains(path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn records(&self) -> &[SampleRecord] {
        &self.records
    }

    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        self.records.iter().map(|r| r.path.clone()).collect()
    }

    #[must_use]
    pub fn into_records(self) -> Vec<SampleRecord> {
        self.records
    }
}

impl FromIterator<SampleRecord> for Selection {
    fn from_iter<I: IntoIterator<Item = SampleRecord>>(iter: I) -> Self {
        let mut selection = Self::new();
        for record in iter {
            selection.push(record);
        }
        selection
    }
}

pub fn records_to_jsonl(records: &[SampleRecord]) -> TrainingResult<String> {
    let mut out = String::new();
    for record in records {
        out.push_str(&serde_json::to_string(record)?);
        out.push('\n');
    }
    Ok(out)
}

pub fn records_from_jsonl(contents: &str) -> TrainingResult<Vec<SampleRecord>> {
    let mut records = Vec::new();

    for (idx, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: SampleRecord = serde_json::from_str(line).map_err(|e| {
            TrainingError::Other(anyhow::anyhow!("failed to parse selection line {}: {}", idx + 1, e))
        })?;
        records.push(record);
    }

    Ok(records)
}
