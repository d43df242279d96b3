//! Selection inspection commands.

use crate::context::load_config;
use anyhow::{bail, Result};
use clap::Subcommand;
use colored::Colorize;
use sift_training::{RunLayout, SelectionStore};
use std::path::Path;

/// Selection subcommands
#[derive(Subcommand, Debug)]
pub enum SelectionCommand {
    /// Show a stored selection, highest loss first
    Show {
        /// Selection key (defaults to the key of the current configuration)
        #[arg(long)]
        key: Option<String>,

        /// Maximum number of records to print
        #[arg(long, default_value = "20")]
        limit: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List stored selections
    List,
}

/// Execute selection command
pub fn execute(cmd: SelectionCommand, config_path: Option<&Path>, workspace: &Path) -> Result<()> {
    let store = SelectionStore::new(RunLayout::for_workspace_root(workspace));

    match cmd {
        SelectionCommand::Show { key, limit, json } => {
            let key = match key {
                Some(key) => key,
                None => load_config(config_path)?.0.selection_key()?,
            };
            show_command(&store, &key, limit, json)
        }
        SelectionCommand::List => list_command(&store),
    }
}

fn show_command(store: &SelectionStore, key: &str, limit: usize, json: bool) -> Result<()> {
    let Some(mut records) = store.load(key)? else {
        bail!("No stored selection for key '{}'", key);
    };
    let total = records.len();
    records.sort_by(|a, b| b.loss.total_cmp(&a.loss));
    records.truncate(limit);

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    println!("{} {}", "Selection".bold(), key.cyan());
    println!("  {} {} record(s), showing {}", "•".dimmed(), total, records.len());
    println!();
    println!("{:>10}  {}", "Loss", "Path");
    println!("{}", "-".repeat(72));
    for record in records {
        println!("{:>10.4}  {}", record.loss, record.path);
    }
    Ok(())
}

fn list_command(store: &SelectionStore) -> Result<()> {
    let selections = store.list()?;
    if selections.is_empty() {
        println!("No selections found.");
        return Ok(());
    }

    println!("{:<40} {:>8}", "Key", "Records");
    println!("{}", "-".repeat(50));
    for selection in selections {
        println!("{:<40} {:>8}", selection.key, selection.records.len());
    }
    Ok(())
}
