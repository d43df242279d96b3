use crate::error::TrainingResult;
use crate::report::RunId;
use crate::stage::PretrainLevel;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Filesystem layout for persisted pipeline state inside a workspace.
///
/// Default layout is under `<workspace>/.sift/{checkpoints,selections,reports}`.
#[derive(Debug, Clone)]
pub struct RunLayout {
    root: PathBuf,
}

impl RunLayout {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Create a layout rooted in a workspace directory.
    #[must_use]
    pub fn for_workspace_root(workspace_root: &Path) -> Self {
        Self::new(workspace_root.join(".sift"))
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn checkpoints_dir(&self) -> PathBuf {
        self.root.join("checkpoints")
    }

    #[must_use]
    pub fn checkpoint_path(&self, level: PretrainLevel) -> PathBuf {
        self.checkpoints_dir().join(format!("level-{}.ckpt.json", level.as_str()))
    }

    #[must_use]
    pub fn selections_dir(&self) -> PathBuf {
        self.root.join("selections")
    }

    #[must_use]
    pub fn selection_path(&self, key: &str) -> PathBuf {
        self.selections_dir().join(format!("{key}.jsonl"))
    }

    /// Encoder state stored next to the selection `key`.
    #[must_use]
    pub fn selection_encoder_path(&self, key: &str) -> PathBuf {
        self.selections_dir().join(format!("{key}.encoder"))
    }

    #[must_use]
    pub fn reports_dir(&self) -> PathBuf {
        self.root.join("reports")
    }

    #[must_use]
    pub fn report_path(&self, run_id: &RunId) -> PathBuf {
        self.reports_dir().join(format!("{}.json", run_id.0))
    }

    pub fn ensure_dirs(&self) -> TrainingResult<()> {
        fs::create_dir_all(self.checkpoints_dir())?;
        fs::create_dir_all(self.selections_dir())?;
        fs::create_dir_all(self.reports_dir())?;
        Ok(())
    }
}

/// Write `content` to a temporary sibling, then rename it over `path`.
///
/// A crash mid-write leaves at most a stray temporary file; `path` either keeps
/// its previous content or holds the complete new content.
pub(crate) fn atomic_write(path: &Path, content: &[u8]) -> TrainingResult<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let stem = path.file_name().and_then(|s| s.to_str()).unwrap_or("file");
    let temp_path = parent.join(format!(".{stem}.tmp.{}", Uuid::new_v4().simple()));

    let write = || -> std::io::Result<()> {
        use std::io::Write;
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
        fs::rename(&temp_path, path)
    };

    if let Err(e) = write() {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }
    Ok(())
}
