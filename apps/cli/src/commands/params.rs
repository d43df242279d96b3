//! Params command implementation.
//!
//! Prints the hyperparameters each stage resolves to.

use crate::context::load_config;
use anyhow::bail;
use colored::Colorize;
use sift_training::params::section_name;
use sift_training::{resolve, TrainingStage};
use std::path::Path;

/// Execute the params command.
pub fn execute(config_path: Option<&Path>, stage: Option<&str>, json: bool) -> anyhow::Result<()> {
    let (config, _) = load_config(config_path)?;

    let stages = match stage {
        Some(tag) => match TrainingStage::parse(tag) {
            Some(stage) => vec![stage],
            None => bail!("Unknown stage '{}'", tag),
        },
        None => config.planned_stages(),
    };

    let mut resolved = Vec::with_capacity(stages.len());
    for stage in stages {
        resolved.push((stage, resolve(&config, stage)?));
    }

    if json {
        let values: Vec<serde_json::Value> = resolved
            .iter()
            .map(|(stage, params)| {
                serde_json::json!({
                    "stage": stage,
                    "section": section_name(*stage),
                    "params": params,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&values)?);
        return Ok(());
    }

    println!("{}", "sift params".bold().cyan());
    println!();
    println!(
        "{:<20} {:>6} {:>6} {:>10} {:>7} {:<6} {:>8} {:>6}",
        "Stage", "Batch", "Image", "LR", "Epochs", "Optim", "WD", "Temp"
    );
    println!("{}", "-".repeat(78));
    for (stage, p) in resolved {
        println!(
            "{:<20} {:>6} {:>6} {:>10} {:>7} {:<6} {:>8} {:>6}",
            stage.label(),
            p.batch_size,
            p.image_size,
            p.learning_rate,
            p.epoch_count,
            p.optimizer_kind.to_string(),
            p.weight_decay,
            p.temperature
        );
    }
    Ok(())
}
