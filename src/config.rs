//! Configuration for the planner.
//!
//! Settings are read from `.planner/planner.toml` and layered:
//! file, then environment, then CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [project]
//! name = "storefront"
//!
//! [defaults]
//! auto_advance = true
//!
//! [delegation]
//! timeout_secs = 900
//!
//! [escape]
//! max_retries = 3
//! max_oscillations = 2
//! growth_threshold = 2000
//! time_multiplier = 5.0
//!
//! [phases.notes]
//! building = "Keep every endpoint behind the response envelope."
//!
//! [skills.api]
//! command = "./skills/api.sh"
//! required_inputs = ["schema.sql"]
//! fallback = "generic"
//!
//! [skills.generic]
//! command = "./skills/generic.sh"
//! args = ["--strict"]
//! ```

use crate::escape::EscapeConfig;
use crate::phase::ProjectPhase;
use crate::skills::{CommandHandler, SkillDescriptor, SkillRegistry};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Name of the project directory holding all planner files.
pub const PLANNER_DIR: &str = ".planner";

/// Project-level settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectSection {
    /// Project name (defaults to the directory name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

fn default_auto_advance() -> bool {
    true
}

/// Loop defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultsSection {
    /// Advance the phase automatically once all of its tasks completed
    #[serde(default = "default_auto_advance")]
    pub auto_advance: bool,
}

impl Default for DefaultsSection {
    fn default() -> Self {
        Self {
            auto_advance: default_auto_advance(),
        }
    }
}

/// Delegation settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DelegationSection {
    /// Per-call timeout; no timeout when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// Phase notes appended to every context bundle of that phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhasesSection {
    #[serde(default)]
    pub notes: BTreeMap<String, String>,
}

/// A capability backed by an external command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillSection {
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_inputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

/// The complete planner.toml structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlannerToml {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub defaults: DefaultsSection,
    #[serde(default)]
    pub delegation: DelegationSection,
    #[serde(default)]
    pub escape: EscapeConfig,
    #[serde(default)]
    pub phases: PhasesSection,
    /// Capability name -> handler command
    #[serde(default)]
    pub skills: BTreeMap<String, SkillSection>,
}

impl PlannerToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse planner.toml")
    }

    /// Load `planner.toml` from the planner directory, or defaults if absent.
    pub fn load_or_default(planner_dir: &Path) -> Result<Self> {
        let config_path = planner_dir.join("planner.toml");
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize planner.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Delegation timeout, with fallback to `PLANNER_DELEGATION_TIMEOUT`.
    pub fn delegation_timeout(&self) -> Option<Duration> {
        self.delegation
            .timeout_secs
            .or_else(|| {
                std::env::var("PLANNER_DELEGATION_TIMEOUT")
                    .ok()
                    .and_then(|v| v.trim().parse().ok())
            })
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Notes configured for a phase, keyed by phase name.
    pub fn phase_notes(&self) -> BTreeMap<ProjectPhase, String> {
        self.phases
            .notes
            .iter()
            .filter_map(|(key, note)| key.parse().ok().map(|phase| (phase, note.clone())))
            .collect()
    }

    /// Build the skill registry from the `[skills]` table.
    ///
    /// Every descriptor is validated at registration, and fallbacks must name
    /// another configured capability.
    pub fn build_registry(&self, working_dir: &Path) -> Result<SkillRegistry> {
        let mut registry = SkillRegistry::new();
        for (capability, skill) in &self.skills {
            let mut descriptor = SkillDescriptor::new(capability);
            descriptor.required_inputs = skill.required_inputs.clone();
            descriptor.fallback = skill.fallback.clone();

            let handler =
                CommandHandler::new(&skill.command, skill.args.clone(), working_dir.to_path_buf());
            registry
                .register(descriptor, Arc::new(handler))
                .with_context(|| format!("Invalid [skills.{}] entry", capability))?;
        }
        registry.validate().context("Invalid [skills] fallback")?;
        Ok(registry)
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        for key in self.phases.notes.keys() {
            if key.parse::<ProjectPhase>().is_err() {
                warnings.push(format!("Unknown phase '{}' in [phases.notes]", key));
            }
        }

        for (capability, skill) in &self.skills {
            if skill.command.trim().is_empty() {
                warnings.push(format!("[skills.{}] has an empty command", capability));
            }
            if let Some(fallback) = &skill.fallback
                && !self.skills.contains_key(fallback)
            {
                warnings.push(format!(
                    "[skills.{}] falls back to unknown capability '{}'",
                    capability, fallback
                ));
            }
        }

        if self.escape.time_multiplier <= 1.0 {
            warnings.push(format!(
                "escape.time_multiplier {} would flag every task as slow",
                self.escape.time_multiplier
            ));
        }

        warnings
    }
}

/// Template written by `planner init`.
pub const DEFAULT_PLANNER_TOML: &str = r#"# Planner configuration

[defaults]
auto_advance = true

[delegation]
# timeout_secs = 900

[escape]
max_retries = 3
max_oscillations = 2
growth_threshold = 2000
time_multiplier = 5.0

[phases.notes]
# building = "Notes handed to every building task"

# [skills.api]
# command = "./skills/api.sh"
# required_inputs = ["schema.sql"]
# fallback = "generic"
"#;

/// Runtime configuration: resolved paths plus the parsed file and CLI overrides.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub planner_dir: PathBuf,
    pub config_file: PathBuf,
    pub journal_file: PathBuf,
    pub log_dir: PathBuf,
    pub toml: PlannerToml,
    /// CLI override for `defaults.auto_advance`
    pub cli_auto_advance: Option<bool>,
}

impl Config {
    /// Resolve the planner directory and load `planner.toml`.
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let planner_dir = project_dir.join(PLANNER_DIR);
        let toml = PlannerToml::load_or_default(&planner_dir)?;

        Ok(Self {
            config_file: planner_dir.join("planner.toml"),
            journal_file: planner_dir.join("journal.log"),
            log_dir: planner_dir.join("logs"),
            project_dir,
            planner_dir,
            toml,
            cli_auto_advance: None,
        })
    }

    /// Apply CLI overrides on top of file and environment settings.
    pub fn with_cli_args(mut self, no_auto_advance: bool) -> Self {
        if no_auto_advance {
            self.cli_auto_advance = Some(false);
        }
        self
    }

    pub fn is_initialized(&self) -> bool {
        self.planner_dir.exists()
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.planner_dir)
            .context("Failed to create .planner directory")?;
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        Ok(())
    }

    pub fn auto_advance(&self) -> bool {
        self.cli_auto_advance
            .unwrap_or(self.toml.defaults.auto_advance)
    }

    pub fn project_name(&self) -> String {
        self.toml.project.name.clone().unwrap_or_else(|| {
            self.project_dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "project".to_string())
        })
    }
}
