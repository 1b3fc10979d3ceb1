//! Phase status and transition commands.

use anyhow::Result;
use console::style;
use std::path::Path;

use super::super::Cli;
use super::run::{load_config, open_orchestrator};
use planner::dag::TaskStatus;
use planner::phase::ProjectPhase;

pub fn cmd_status(cli: &Cli, project_dir: &Path) -> Result<()> {
    let config = load_config(cli, project_dir)?;
    let orchestrator = open_orchestrator(&config)?;
    let state = orchestrator.state();

    println!();
    println!(
        "Project: {}  Phase: {}  Revision: {}",
        style(config.project_name()).bold(),
        style(state.phase).cyan(),
        state.version
    );
    if let Some(checkpoint) = &state.checkpoint {
        println!("Last checkpoint: {}", checkpoint);
    }
    println!();

    let tasks = orchestrator.graph().tasks();
    if tasks.is_empty() {
        println!("No tasks planned. Run 'planner plan <file>' to insert tasks.");
    } else {
        println!(
            "{:<16} {:<10} {:<12} {:<14} Title",
            "Task", "Phase", "Status", "Capability"
        );
        println!(
            "{:<16} {:<10} {:<12} {:<14} -----",
            "----------------", "----------", "------------", "--------------"
        );
        for phase in ProjectPhase::ALL {
            for task in orchestrator.graph().tasks_in_phase(phase) {
                let status = format!("{:<12}", task.status.to_string());
                let status = match task.status {
                    TaskStatus::Completed => style(status).green(),
                    TaskStatus::Blocked => style(status).red(),
                    TaskStatus::InProgress => style(status).yellow(),
                    TaskStatus::Pending => style(status).dim(),
                };
                let capability = match state.degraded.get(&task.id) {
                    Some(fallback) => format!("{}→{}", task.capability, fallback),
                    None => task.capability.clone(),
                };
                println!(
                    "{:<16} {:<10} {} {:<14} {}",
                    task.id,
                    task.phase.to_string(),
                    status,
                    capability,
                    task.title
                );
                if let Some(reason) = &task.blocked_reason {
                    println!("{:<16} {}", "", style(reason).dim());
                }
            }
        }
    }

    if !state.missing_resources.is_empty() {
        println!();
        println!("Missing resources:");
        for resource in &state.missing_resources {
            println!("  - {}", resource);
        }
    }

    if !state.decisions.is_empty() {
        println!();
        println!("Decisions:");
        for (key, value) in &state.decisions {
            println!("  {} = {}", key, value);
        }
    }

    let escalations = orchestrator.escalations();
    if !escalations.is_empty() {
        println!();
        println!("{}", style("Pending escalations:").red().bold());
        for escalation in escalations {
            println!("  {}  {}", escalation.task_id(), escalation.summary());
        }
        println!();
        println!("Answer with 'planner resolve <task>'.");
    }
    println!();

    Ok(())
}

pub fn cmd_advance(cli: &Cli, project_dir: &Path) -> Result<()> {
    let config = load_config(cli, project_dir)?;
    let mut orchestrator = open_orchestrator(&config)?;

    let from = orchestrator.phase();
    let to = orchestrator.advance_phase()?;
    println!("Advanced {} → {}", from, style(to).cyan());
    Ok(())
}

pub fn cmd_iterate(cli: &Cli, project_dir: &Path) -> Result<()> {
    let config = load_config(cli, project_dir)?;
    let mut orchestrator = open_orchestrator(&config)?;

    let to = orchestrator.iterate()?;
    println!("Iterating: back to {}", style(to).cyan());
    Ok(())
}

pub fn cmd_override_phase(cli: &Cli, project_dir: &Path, phase: &str, reason: &str) -> Result<()> {
    let target: ProjectPhase = phase.parse()?;
    let config = load_config(cli, project_dir)?;
    let mut orchestrator = open_orchestrator(&config)?;

    let from = orchestrator.phase();
    orchestrator.override_phase(target, reason)?;
    println!(
        "{} phase {} → {} ({})",
        style("Overrode").yellow().bold(),
        from,
        style(target).cyan(),
        reason
    );
    Ok(())
}

pub fn cmd_checkpoints(cli: &Cli, project_dir: &Path) -> Result<()> {
    let config = load_config(cli, project_dir)?;
    let orchestrator = open_orchestrator(&config)?;

    let entries = orchestrator.checkpoints()?;
    if entries.is_empty() {
        println!("No checkpoints recorded.");
        return Ok(());
    }

    for entry in entries {
        println!(
            "{}  {}",
            style(entry.timestamp.format("%Y-%m-%d %H:%M:%S")).dim(),
            entry.label
        );
    }
    Ok(())
}
