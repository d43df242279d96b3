//! Validate command implementation.

use crate::context::load_config;
use anyhow::bail;
use colored::Colorize;
use sift_training::default_registry;
use std::path::Path;

/// Execute the validate command.
///
/// Fails on the first problem, exactly as a run would before training.
pub fn execute(config_path: Option<&Path>) -> anyhow::Result<()> {
    let (config, source) = load_config(config_path)?;

    println!("{}", "sift validate".bold().cyan());
    println!();
    println!("  Validating {}...", source.display());
    println!();

    config.validate()?;
    if !default_registry().contains(config.run.method) {
        bail!("no trainer registered for method '{}'", config.run.method);
    }

    println!("  {} Configuration valid", "✓".green());
    let stages: Vec<&str> = config.planned_stages().iter().map(|s| s.label()).collect();
    println!("  {} Stages: {}", "•".dimmed(), stages.join(" → "));
    if config.active_learning.enabled {
        println!("  {} Selection key: {}", "•".dimmed(), config.selection_key()?.cyan());
    }
    Ok(())
}
