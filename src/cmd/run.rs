//! The orchestration loop behind `planner run`.

use anyhow::Result;
use console::style;
use std::path::Path;

use super::super::Cli;
use planner::config::Config;
use planner::journal::FileJournal;
use planner::operator::ConsoleOperator;
use planner::orchestrator::{Orchestrator, OrchestratorSettings, StepOutcome};
use planner::state::JsonStateStore;

/// Resolve configuration and make sure `planner init` ran.
pub fn load_config(cli: &Cli, project_dir: &Path) -> Result<Config> {
    let config = Config::new(project_dir.to_path_buf())?.with_cli_args(cli.no_auto_advance);
    if !config.is_initialized() {
        anyhow::bail!("Project not initialized. Run 'planner init' first.");
    }
    for warning in config.toml.validate() {
        tracing::warn!("{}", warning);
    }
    Ok(config)
}

/// Open the project: state store, journal, console operator, and configured skills.
pub fn open_orchestrator(config: &Config) -> Result<Orchestrator> {
    config.ensure_directories()?;
    let registry = config.toml.build_registry(&config.project_dir)?;
    let store = JsonStateStore::open(&config.planner_dir)?;
    let orchestrator = Orchestrator::new(
        registry,
        Box::new(store),
        Box::new(FileJournal::new(&config.journal_file)),
        Box::new(ConsoleOperator),
        OrchestratorSettings::from_config(config),
    )?;
    Ok(orchestrator)
}

pub async fn cmd_run(cli: &Cli, project_dir: &Path, steps: Option<usize>) -> Result<()> {
    let config = load_config(cli, project_dir)?;
    let mut orchestrator = open_orchestrator(&config)?;

    println!(
        "Running {} in phase {}",
        style(config.project_name()).bold(),
        style(orchestrator.phase()).cyan()
    );
    println!();

    let report = orchestrator.run(steps).await?;

    for outcome in &report.outcomes {
        print_outcome(outcome);
    }

    println!();
    let executed = report.execution_order();
    if executed.is_empty() {
        println!("No tasks delegated.");
    } else {
        println!(
            "{} step(s) delegated: {}",
            executed.len(),
            executed.join(" → ")
        );
    }
    if report.last().is_some_and(|o| !o.stops_run()) {
        println!("Step limit reached. Run 'planner run' again to continue.");
    }

    Ok(())
}

fn print_outcome(outcome: &StepOutcome) {
    match outcome {
        StepOutcome::Completed { task_id, outputs } => {
            let produced = if outputs.is_empty() {
                String::new()
            } else {
                format!(" ({})", outputs.join(", "))
            };
            println!("  {} {}{}", style("✓").green(), task_id, produced);
        }
        StepOutcome::Requeued {
            task_id,
            resolution,
        } => {
            println!(
                "  {} {} {} blocker: {}",
                style("↻").yellow(),
                task_id,
                resolution.kind,
                resolution.remediation
            );
        }
        StepOutcome::Escalated { escalation } => {
            println!(
                "  {} {} escalated: {}",
                style("!").red().bold(),
                escalation.task_id(),
                escalation.summary()
            );
        }
        StepOutcome::PhaseAdvanced { from, to } => {
            println!("  {} phase {} → {}", style("»").cyan(), from, to);
        }
        StepOutcome::PhaseComplete { phase } => {
            println!(
                "  Phase {} complete. Run 'planner advance' to continue.",
                style(phase).cyan()
            );
        }
        StepOutcome::Idle { phase, outstanding } => {
            println!(
                "  Nothing ready in {}; waiting on: {}",
                style(phase).cyan(),
                outstanding.join(", ")
            );
        }
        StepOutcome::Finished => {
            println!("  {} All phases finished.", style("✓").green().bold());
        }
    }
}
