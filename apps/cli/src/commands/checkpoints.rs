//! Checkpoint management commands.

use anyhow::{bail, Result};
use clap::Subcommand;
use colored::Colorize;
use sift_training::{CheckpointStore, PretrainLevel, RunLayout};
use std::path::Path;

/// Checkpoint subcommands
#[derive(Subcommand, Debug)]
pub enum CheckpointsCommand {
    /// List stored checkpoints
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove checkpoints so their stage runs again
    Clear {
        /// Pretrain level to remove (1, 2 or all)
        #[arg(long, default_value = "all")]
        level: String,
    },
}

/// Execute checkpoints command
pub fn execute(cmd: CheckpointsCommand, workspace: &Path) -> Result<()> {
    let store = CheckpointStore::new(RunLayout::for_workspace_root(workspace));

    match cmd {
        CheckpointsCommand::List { json } => list_command(&store, json),
        CheckpointsCommand::Clear { level } => clear_command(&store, &level),
    }
}

fn list_command(store: &CheckpointStore, json: bool) -> Result<()> {
    let checkpoints = store.list()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&checkpoints)?);
        return Ok(());
    }

    if checkpoints.is_empty() {
        println!("No checkpoints found.");
        return Ok(());
    }

    println!("{:<7} {:<7} {:<8} {:<20} {:>10}  {}", "Level", "Epoch", "Status", "Saved", "Size", "Path");
    println!("{}", "-".repeat(99));
    for checkpoint in &checkpoints {
        let status = if checkpoint.problem.is_some() { "corrupt".red() } else { "ok".green() };
        println!(
            "{:<7} {:<7} {:<8} {:<20} {:>10}  {}",
            checkpoint.pretrain_level.as_str(),
            checkpoint.epoch,
            status,
            checkpoint.saved_at.format("%Y-%m-%d %H:%M:%S"),
            format_bytes(checkpoint.bytes),
            checkpoint.path.display()
        );
    }
    for checkpoint in checkpoints.iter().filter(|c| c.problem.is_some()) {
        println!(
            "  {} level {}: {}",
            "!".red(),
            checkpoint.pretrain_level,
            checkpoint.problem.as_deref().unwrap_or_default()
        );
    }
    Ok(())
}

fn clear_command(store: &CheckpointStore, level: &str) -> Result<()> {
    let levels = if level.trim() == "all" {
        PretrainLevel::ALL.to_vec()
    } else {
        match PretrainLevel::parse(level) {
            Some(level) => vec![level],
            None => bail!("Unknown pretrain level '{}' (expected 1, 2 or all)", level),
        }
    };

    for level in levels {
        if store.clear(level)? {
            println!("  {} Removed level {} checkpoint", "✓".green(), level);
        } else {
            println!("  {} No level {} checkpoint", "•".dimmed(), level);
        }
    }
    Ok(())
}

/// Formats a byte count with a binary unit.
fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 { format!("{bytes} B") } else { format!("{value:.1} {}", UNITS[unit]) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KiB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MiB");
    }
}
