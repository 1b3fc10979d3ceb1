//! Operator answers: `planner resolve` and `planner decide`.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;

use super::super::Cli;
use super::run::{load_config, open_orchestrator};
use planner::operator::OperatorDecision;

fn split_outputs(outputs: &str) -> Vec<String> {
    outputs
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn prompt_decision() -> Result<OperatorDecision> {
    use dialoguer::{Input, Select};

    let choices = [
        "Accept an alternative approach and re-queue",
        "Reset the task and discard touched artifacts",
        "Mark the task completed by hand",
    ];
    let choice = Select::new()
        .with_prompt("How should this escalation be resolved?")
        .items(&choices)
        .default(0)
        .interact()
        .context("Failed to read operator choice")?;

    let decision = match choice {
        0 => {
            let note: String = Input::new()
                .with_prompt("Alternative approach")
                .interact_text()
                .context("Failed to read alternative")?;
            OperatorDecision::AcceptAlternative { note }
        }
        1 => OperatorDecision::Reset,
        _ => {
            let outputs: String = Input::new()
                .with_prompt("Outputs (comma-separated)")
                .allow_empty(true)
                .interact_text()
                .context("Failed to read outputs")?;
            OperatorDecision::OverrideCompleted {
                outputs: split_outputs(&outputs),
            }
        }
    };
    Ok(decision)
}

pub fn cmd_resolve(
    cli: &Cli,
    project_dir: &Path,
    task_id: &str,
    accept: Option<&str>,
    reset: bool,
    complete: Option<&str>,
) -> Result<()> {
    let config = load_config(cli, project_dir)?;
    let mut orchestrator = open_orchestrator(&config)?;

    let Some(escalation) = orchestrator.state().escalation_for(task_id) else {
        anyhow::bail!("No pending escalation for task '{}'", task_id);
    };
    println!();
    println!(
        "{} {}",
        style(escalation.task_id()).bold(),
        escalation.summary()
    );
    println!();

    let decision = match (accept, reset, complete) {
        (Some(note), _, _) => OperatorDecision::AcceptAlternative {
            note: note.to_string(),
        },
        (None, true, _) => OperatorDecision::Reset,
        (None, false, Some(outputs)) => OperatorDecision::OverrideCompleted {
            outputs: split_outputs(outputs),
        },
        (None, false, None) => prompt_decision()?,
    };

    let label = decision.label();
    let discarded = orchestrator.apply_operator_decision(task_id, decision)?;

    println!("Applied '{}' to {}", label, style(task_id).bold());
    if !discarded.is_empty() {
        println!("Discarded artifacts:");
        for artifact in &discarded {
            println!("  - {}", artifact);
        }
    }
    println!("Run 'planner run' to continue.");
    Ok(())
}

pub fn cmd_decide(cli: &Cli, project_dir: &Path, key: &str, value: &str) -> Result<()> {
    let config = load_config(cli, project_dir)?;
    let mut orchestrator = open_orchestrator(&config)?;

    orchestrator.record_decision(key, value)?;
    println!("Recorded decision {} = {}", style(key).bold(), value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_outputs_trims_and_drops_empty() {
        assert_eq!(split_outputs(" a.rs, b.rs ,,"), vec!["a.rs", "b.rs"]);
        assert!(split_outputs("").is_empty());
    }
}
