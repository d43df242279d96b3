//! Workspace and configuration discovery shared by the commands.

use anyhow::{Context, Result};
use sift_training::PipelineConfig;
use std::path::{Path, PathBuf};

/// Resolves the workspace root: `--workspace`, then `SIFT_WORKSPACE`, then the current directory.
pub fn workspace_root(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    if let Ok(path) = std::env::var("SIFT_WORKSPACE") {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    std::env::current_dir().context("Failed to determine current directory")
}

/// Loads the pipeline configuration and makes its dataset root relative to the file.
pub fn load_config(explicit: Option<&Path>) -> Result<(PipelineConfig, PathBuf)> {
    let (mut config, path) = PipelineConfig::discover(explicit).context("Failed to load pipeline configuration")?;
    if let Some(dir) = path.parent() {
        config.rebase_paths(dir);
    }
    Ok((config, path))
}
