//! Run command implementation.
//!
//! Builds the reference backend from the configuration and runs the pipeline.
//! Ctrl-C stops the run at the next epoch or round boundary.

use crate::context::load_config;
use anyhow::Context;
use colored::Colorize;
use sift_training::{default_registry, Pipeline, PipelineReport, ReferenceBackend, RunLayout, StageOutcome};
use std::path::Path;
use std::sync::Arc;

/// Execute the run command.
pub async fn execute(config_path: Option<&Path>, workspace: &Path, json: bool) -> anyhow::Result<()> {
    let (config, source) = load_config(config_path)?;

    if !json {
        println!("{}", "sift run".bold().cyan());
        println!();
        println!("  {} Config: {}", "•".dimmed(), source.display().to_string().dimmed());
        println!("  {} Workspace: {}", "•".dimmed(), workspace.display().to_string().dimmed());
        println!("  {} Method: {}", "•".dimmed(), config.run.method.to_string().cyan());
        println!();
    }

    let backend = Arc::new(ReferenceBackend::from_config(&config));
    let layout = RunLayout::for_workspace_root(workspace);
    let pipeline = Pipeline::new(config, backend, default_registry(), layout)
        .context("Pipeline configuration rejected")?;

    let token = pipeline.cancellation_token();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping at the next epoch boundary");
            token.cancel();
        }
    });

    let result = pipeline.run().await;
    ctrl_c.abort();
    let report = result.context("Pipeline run failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &PipelineReport) {
    println!("{:<20} {:<10} {}", "Stage", "Status", "Detail");
    println!("{}", "-".repeat(60));
    for stage in &report.stages {
        let (status, detail) = match &stage.outcome {
            StageOutcome::Completed { epochs_run, final_loss } => (
                "done".green(),
                match final_loss {
                    Some(loss) => format!("{epochs_run} epoch(s), loss {loss:.4}"),
                    None => format!("{epochs_run} epoch(s)"),
                },
            ),
            StageOutcome::Acquired { rounds, selected } => {
                ("selected".green(), format!("{selected} sample(s) over {rounds} round(s)"))
            }
            StageOutcome::Skipped { reason } => ("skipped".yellow(), reason.clone()),
        };
        println!("{:<20} {:<10} {}", stage.stage.label(), status, detail);
    }
    println!();

    if let Some(selection) = &report.selection {
        let origin = if selection.reused { "reused" } else { "new" };
        println!(
            "  {} Selection: {} ({} of {} requested, {})",
            "•".dimmed(),
            selection.key.cyan(),
            selection.selected,
            selection.requested,
            origin
        );
    }
    if let Some(accuracy) = report.accuracy {
        println!("  {} Linear classifier accuracy: {}", "✓".green(), format!("{:.2}%", accuracy * 100.0).bold());
    }
    println!("  {} Run: {}", "•".dimmed(), report.run_id.to_string().dimmed());
}
