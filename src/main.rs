use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod cmd;

#[derive(Parser)]
#[command(name = "planner")]
#[command(version, about = "Phase-gated task orchestration engine")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Stop at phase boundaries instead of advancing automatically. Overrides planner.toml.
    #[arg(long, global = true)]
    pub no_auto_advance: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new planner project
    Init {
        /// Project name written to planner.toml
        #[arg(long)]
        name: Option<String>,
    },
    /// Insert a batch of tasks from a JSON or YAML file
    Plan { file: PathBuf },
    /// Run the orchestration loop until it stops or needs the operator
    Run {
        /// Maximum number of steps to run
        #[arg(long)]
        steps: Option<usize>,
    },
    /// Show phase, tasks, and pending escalations
    Status,
    /// Advance to the next phase once the current one is complete
    Advance,
    /// Return from review to building for another iteration
    Iterate,
    /// Force the active phase, bypassing readiness checks
    OverridePhase {
        phase: String,
        /// Why the override is needed (written to the journal)
        #[arg(long)]
        reason: String,
    },
    /// Answer a pending escalation
    Resolve {
        task: String,
        /// Accept an alternative approach and re-queue the task
        #[arg(long, conflicts_with_all = ["reset", "complete"])]
        accept: Option<String>,
        /// Reset the task to pending, discarding touched artifacts
        #[arg(long, conflicts_with = "complete")]
        reset: bool,
        /// Mark the task completed with these outputs (comma-separated)
        #[arg(long)]
        complete: Option<String>,
    },
    /// Record a project decision visible to every handler
    Decide { key: String, value: String },
    /// Show the checkpoint log
    Checkpoints,
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
}

fn init_logging(verbose: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_env("PLANNER_LOG").unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("planner=debug")
        } else {
            EnvFilter::new("planner=warn")
        }
    });

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "planner.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(EnvFilter::new("planner=info"));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .without_time()
                .with_writer(std::io::stderr)
                .with_filter(filter),
        )
        .with(file_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let log_dir = project_dir.join(planner::config::PLANNER_DIR).join("logs");
    let _guard = init_logging(cli.verbose, log_dir.is_dir().then_some(log_dir.as_path()));

    match &cli.command {
        Commands::Init { name } => cmd::cmd_init(&project_dir, name.as_deref())?,
        Commands::Plan { file } => cmd::cmd_plan(&cli, &project_dir, file)?,
        Commands::Run { steps } => cmd::cmd_run(&cli, &project_dir, *steps).await?,
        Commands::Status => cmd::cmd_status(&cli, &project_dir)?,
        Commands::Advance => cmd::cmd_advance(&cli, &project_dir)?,
        Commands::Iterate => cmd::cmd_iterate(&cli, &project_dir)?,
        Commands::OverridePhase { phase, reason } => {
            cmd::cmd_override_phase(&cli, &project_dir, phase, reason)?
        }
        Commands::Resolve {
            task,
            accept,
            reset,
            complete,
        } => cmd::cmd_resolve(
            &cli,
            &project_dir,
            task,
            accept.as_deref(),
            *reset,
            complete.as_deref(),
        )?,
        Commands::Decide { key, value } => cmd::cmd_decide(&cli, &project_dir, key, value)?,
        Commands::Checkpoints => cmd::cmd_checkpoints(&cli, &project_dir)?,
        Commands::Config { command } => cmd::cmd_config(&cli, &project_dir, command.clone())?,
    }

    Ok(())
}
