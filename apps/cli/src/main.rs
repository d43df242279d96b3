//! Sift CLI - Command-line interface for the Sift training pipeline
//!
//! This CLI provides a `sift` command for running the pretraining and
//! active-learning pipeline and for inspecting the state it persists.

mod commands;
mod context;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::checkpoints::CheckpointsCommand;
use commands::selection::SelectionCommand;
use commands::{checkpoints, params, run, selection, validate};

/// Sift - Active-learning representation-learning pipeline
///
/// Pretrains an encoder on a base pool, selects the highest-loss samples of a
/// pool over a budget schedule, pretrains on the selection and evaluates the
/// result with a linear classifier.
#[derive(Parser, Debug)]
#[command(name = "sift", author, version, about = "Sift - Active-learning pretraining pipeline")]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    /// Pipeline configuration file (defaults to ./sift.toml, then ~/.sift/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Workspace directory holding `.sift/` state (overrides SIFT_WORKSPACE)
    #[arg(short = 'w', long, global = true)]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full pipeline
    ///
    /// Skips stages whose checkpoints already exist and reuses a stored
    /// selection for the same dataset, pool and schedule.
    Run {
        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show resolved stage parameters
    Params {
        /// Only this stage (base, base_active_learning, active_learning, target, linear_classifier)
        #[arg(long)]
        stage: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate the configuration without training
    Validate,

    /// Inspect or remove pretraining checkpoints
    #[command(subcommand)]
    Checkpoints(CheckpointsCommand),

    /// Inspect stored acquisition selections
    #[command(subcommand)]
    Selection(SelectionCommand),
}

fn parse_level(level: &str) -> Level {
    match level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let level = parse_level(&args.log_level);
    match args.log_format {
        LogFormat::Text => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .without_time()
                .with_target(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogFormat::Json => {
            let subscriber =
                FmtSubscriber::builder().with_max_level(level).with_writer(std::io::stderr).json().finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    let workspace = context::workspace_root(args.workspace)?;
    let config = args.config.as_deref();

    match args.command {
        Command::Run { json } => run::execute(config, &workspace, json).await?,
        Command::Params { stage, json } => params::execute(config, stage.as_deref(), json)?,
        Command::Validate => validate::execute(config)?,
        Command::Checkpoints(cmd) => checkpoints::execute(cmd, &workspace)?,
        Command::Selection(cmd) => selection::execute(cmd, config, &workspace)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_are_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_level_defaults_to_info() {
        assert_eq!(parse_level("debug"), Level::DEBUG);
        assert_eq!(parse_level("verbose"), Level::INFO);
    }
}
