//! Project initialization and planning commands.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use super::super::Cli;
use super::run::{load_config, open_orchestrator};
use planner::config::{Config, DEFAULT_PLANNER_TOML};
use planner::dag::Task;

pub fn cmd_init(project_dir: &Path, name: Option<&str>) -> Result<()> {
    let config = Config::new(project_dir.to_path_buf())?;
    let was_initialized = config.is_initialized();
    config.ensure_directories()?;

    if config.config_file.exists() {
        println!(
            "Planner project already initialized at {}",
            config.planner_dir.display()
        );
        println!("Directory structure verified.");
        return Ok(());
    }

    let content = match name {
        Some(name) => format!("[project]\nname = {:?}\n\n{}", name, DEFAULT_PLANNER_TOML),
        None => DEFAULT_PLANNER_TOML.to_string(),
    };
    std::fs::write(&config.config_file, content)
        .with_context(|| format!("Failed to write {}", config.config_file.display()))?;

    if was_initialized {
        println!(
            "Completed planner initialization at {}",
            config.planner_dir.display()
        );
        return Ok(());
    }

    println!(
        "Initialized planner project at {}",
        config.planner_dir.display()
    );
    println!();
    println!("Created directory structure:");
    println!("  .planner/");
    println!("  ├── planner.toml  # Skills, escape hatch thresholds, phase notes");
    println!("  ├── state.json    # Project state and task graph (written on first change)");
    println!("  ├── checkpoints   # Checkpoint log");
    println!("  ├── journal.log   # Human-readable journal");
    println!("  └── logs/         # Daily tracing logs");
    println!();
    println!("Next steps:");
    println!("  1. Register skills under [skills.<capability>] in planner.toml");
    println!("  2. Run `planner plan <tasks.yaml>` to insert tasks");
    println!("  3. Run `planner run` to start execution");

    Ok(())
}

/// Accepted shapes of a plan file.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PlanFile {
    Batch {
        tasks: Vec<Task>,
        #[serde(default)]
        deferred: Vec<Task>,
    },
    List(Vec<Task>),
}

impl PlanFile {
    fn parse(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan file: {}", path.display()))?;
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));

        if is_yaml {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML plan: {}", path.display()))
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON plan: {}", path.display()))
        }
    }

    fn into_parts(self) -> (Vec<Task>, Vec<Task>) {
        match self {
            PlanFile::Batch { tasks, deferred } => (tasks, deferred),
            PlanFile::List(tasks) => (tasks, Vec::new()),
        }
    }
}

pub fn cmd_plan(cli: &Cli, project_dir: &Path, file: &Path) -> Result<()> {
    let config = load_config(cli, project_dir)?;
    let (tasks, deferred) = PlanFile::parse(file)?.into_parts();
    let mut orchestrator = open_orchestrator(&config)?;

    let inserted = orchestrator.plan(tasks, deferred)?;

    println!("Inserted {} task(s):", inserted.len());
    for id in &inserted {
        if let Some(task) = orchestrator.graph().get(id) {
            println!(
                "  {:<16} {:<10} {:<14} {}",
                task.id,
                task.phase.to_string(),
                task.capability,
                task.title
            );
        }
    }
    let deferred = orchestrator.graph().deferred().len();
    if deferred > 0 {
        println!("{} deferred definition(s) held for synthesis", deferred);
    }

    Ok(())
}
