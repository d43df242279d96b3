//! Class-folder datasets: `<dir>/<class>/<item>`.
//!
//! Items are decoded lazily, one batch at a time, into a normalized byte
//! histogram of `feature_dim` bins.

use crate::error::{TrainingError, TrainingResult};
use sift_abstraction::{Batch, BatchIter, CollaboratorError, CollaboratorResult, DataLoader, Dataset, Item};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Class name to class index, assigned in sorted name order.
///
/// Built once per dataset scan and owned by that dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelIndex {
    classes: BTreeMap<String, usize>,
}

impl LabelIndex {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut sorted: Vec<String> = names.into_iter().map(Into::into).collect();
        sorted.sort();
        sorted.dedup();
        let classes = sorted.into_iter().enumerate().map(|(idx, name)| (name, idx)).collect();
        Self { classes }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<usize> {
        self.classes.get(name).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Class names in index order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.classes.keys().map(String::as_str).collect()
    }
}

/// Normalized histogram of `bytes` over `dim` equal-width bins. Empty input
/// yields all zeros.
#[must_use]
pub fn byte_histogram(bytes: &[u8], dim: usize) -> Vec<f32> {
    let mut bins = vec![0.0_f32; dim];
    if dim == 0 || bytes.is_empty() {
        return bins;
    }
    for b in bytes {
        bins[usize::from(*b) * dim / 256] += 1.0;
    }
    let total = bytes.len() as f32;
    for v in &mut bins {
        *v /= total;
    }
    bins
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    path: String,
    label: usize,
}

/// A dataset backed by a class-folder tree.
#[derive(Debug, Clone)]
pub struct FolderDataset {
    id: String,
    root: PathBuf,
    entries: Vec<Entry>,
    labels: LabelIndex,
    feature_dim: usize,
}

/// Walks `root` two levels deep and returns `(item path, class folder)` pairs in
/// file-name order. Walk errors are returned, not skipped.
fn walk_classes(root: &Path) -> TrainingResult<Vec<(String, String)>> {
    if !root.is_dir() {
        return Err(TrainingError::config(format!("dataset directory not found: {}", root.display())));
    }

    let mut found = Vec::new();
    for entry in WalkDir::new(root).follow_links(true).min_depth(2).max_depth(2).sort_by_file_name() {
        let entry = entry.map_err(|e| TrainingError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(class) = entry
            .path()
            .parent()
            .and_then(Path::file_name)
            .and_then(|n| n.to_str())
            .map(str::to_string)
        else {
            continue;
        };
        found.push((entry.path().to_string_lossy().to_string(), class));
    }
    Ok(found)
}

impl FolderDataset {
    /// Scans `root`. Every file two levels down is an item labelled by its
    /// parent folder; anything else is ignored.
    pub fn scan(id: impl Into<String>, root: &Path, feature_dim: usize) -> TrainingResult<Self> {
        let found = walk_classes(root)?;
        let labels = LabelIndex::from_names(found.iter().map(|(_, class)| class.clone()));
        Ok(Self::build(id.into(), root, found, labels, feature_dim))
    }

    /// Scans `root` against a label table built from another split, so both
    /// splits agree on class indices. A class folder missing from `labels` is
    /// a configuration error.
    pub fn scan_with_labels(
        id: impl Into<String>,
        root: &Path,
        feature_dim: usize,
        labels: LabelIndex,
    ) -> TrainingResult<Self> {
        let found = walk_classes(root)?;
        if let Some((_, class)) = found.iter().find(|(_, class)| labels.get(class).is_none()) {
            return Err(TrainingError::config(format!(
                "class '{class}' in {} is not one of the known classes {:?}",
                root.display(),
                labels.names()
            )));
        }
        Ok(Self::build(id.into(), root, found, labels, feature_dim))
    }

    fn build(id: String, root: &Path, found: Vec<(String, String)>, labels: LabelIndex, feature_dim: usize) -> Self {
        let entries = found
            .into_iter()
            .filter_map(|(path, class)| labels.get(&class).map(|label| Entry { path, label }))
            .collect::<Vec<_>>();

        tracing::debug!(
            dataset = %root.display(),
            items = entries.len(),
            classes = labels.len(),
            "Scanned class-folder dataset"
        );

        Self { id, root: root.to_path_buf(), entries, labels, feature_dim }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn labels(&self) -> &LabelIndex {
        &self.labels
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Dataset for FolderDataset {
    fn id(&self) -> &str {
        &self.id
    }

    fn paths(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.path.clone()).collect()
    }

    fn class_count(&self) -> usize {
        self.labels.len()
    }

    fn loader(&self, subset: Option<&[String]>, batch_size: usize) -> CollaboratorResult<Box<dyn DataLoader>> {
        if batch_size == 0 {
            return Err(CollaboratorError::Data("batch size must be >= 1".to_string()));
        }

        let entries = match subset {
            None => self.entries.clone(),
            Some(paths) => {
                let by_path: HashMap<&str, &Entry> = self.entries.iter().map(|e| (e.path.as_str(), e)).collect();
                paths
                    .iter()
                    .map(|p| {
                        by_path.get(p.as_str()).map(|e| (*e).clone()).ok_or_else(|| {
                            CollaboratorError::Data(format!("{p} is not part of dataset '{}'", self.id))
                        })
                    })
                    .collect::<CollaboratorResult<Vec<_>>>()?
            }
        };

        Ok(Box::new(FolderLoader { entries, batch_size, feature_dim: self.feature_dim }))
    }
}

/// Restartable loader over a fixed list of class-folder items.
#[derive(Debug, Clone)]
pub struct FolderLoader {
    entries: Vec<Entry>,
    batch_size: usize,
    feature_dim: usize,
}

impl FolderLoader {
    fn read(&self, entry: &Entry) -> CollaboratorResult<Item> {
        let bytes = std::fs::read(&entry.path)
            .map_err(|e| CollaboratorError::Data(format!("failed to read {}: {e}", entry.path)))?;
        Ok(Item {
            path: entry.path.clone(),
            input: byte_histogram(&bytes, self.feature_dim),
            label: Some(entry.label),
        })
    }
}

impl DataLoader for FolderLoader {
    fn batches(&self) -> BatchIter<'_> {
        Box::new(self.entries.chunks(self.batch_size).map(move |chunk| {
            chunk.iter().map(|e| self.read(e)).collect::<CollaboratorResult<Vec<_>>>().map(Batch::new)
        }))
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.entries.len())
    }
}
