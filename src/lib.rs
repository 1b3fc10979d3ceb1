pub mod blocker;
pub mod config;
pub mod context;
pub mod dag;
pub mod errors;
pub mod escape;
pub mod journal;
pub mod operator;
pub mod orchestrator;
pub mod phase;
pub mod skills;
pub mod state;

pub use errors::{BlockerKind, PlannerError, Result};
pub use orchestrator::{Orchestrator, OrchestratorSettings, RunReport, StepOutcome};
pub use phase::ProjectPhase;
