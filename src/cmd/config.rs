//! Configuration view and validation commands for `planner config`.

use anyhow::Result;
use std::path::Path;

use super::super::{Cli, ConfigCommands};
use planner::config::{Config, PlannerToml};

fn print_toml(toml: &PlannerToml) {
    if let Some(name) = &toml.project.name {
        println!("[project]");
        println!("  name = \"{}\"", name);
        println!();
    }

    println!("[defaults]");
    println!("  auto_advance = {}", toml.defaults.auto_advance);
    println!();

    println!("[delegation]");
    match toml.delegation.timeout_secs {
        Some(secs) => println!("  timeout_secs = {}", secs),
        None => println!("  timeout_secs = (none)"),
    }
    println!();

    println!("[escape]");
    println!("  max_retries = {}", toml.escape.max_retries);
    println!("  max_oscillations = {}", toml.escape.max_oscillations);
    println!("  growth_threshold = {}", toml.escape.growth_threshold);
    println!("  time_multiplier = {}", toml.escape.time_multiplier);
    println!();

    if !toml.phases.notes.is_empty() {
        println!("[phases.notes]");
        for (phase, note) in &toml.phases.notes {
            println!("  {} = \"{}\"", phase, note);
        }
        println!();
    }

    for (capability, skill) in &toml.skills {
        println!("[skills.{}]", capability);
        println!("  command = \"{}\"", skill.command);
        if !skill.args.is_empty() {
            println!("  args = {:?}", skill.args);
        }
        if !skill.required_inputs.is_empty() {
            println!("  required_inputs = {:?}", skill.required_inputs);
        }
        if let Some(fallback) = &skill.fallback {
            println!("  fallback = \"{}\"", fallback);
        }
        println!();
    }
}

pub fn cmd_config(cli: &Cli, project_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    let config = Config::new(project_dir.to_path_buf())?.with_cli_args(cli.no_auto_advance);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Planner Configuration");
            println!("=====================");
            println!();

            if config.config_file.exists() {
                println!("Config file: {}", config.config_file.display());
            } else {
                println!("No planner.toml found at {}", config.config_file.display());
                println!("Using default configuration.");
            }
            println!();
            print_toml(&config.toml);

            println!("Effective values (with env/CLI overrides):");
            println!("  auto_advance = {}", config.auto_advance());
            match config.toml.delegation_timeout() {
                Some(timeout) => println!("  delegation_timeout = {}s", timeout.as_secs()),
                None => println!("  delegation_timeout = (none)"),
            }
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config.config_file.exists() {
                println!("No planner.toml found. Using defaults (valid).");
                return Ok(());
            }

            let warnings = config.toml.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
    }

    Ok(())
}
