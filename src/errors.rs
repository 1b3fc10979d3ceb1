//! Typed error hierarchy for the planner.
//!
//! `PlannerError` covers structural failures of the orchestration core
//! (phase gating, task transitions, graph validation, bundling, registry and
//! storage). Runtime blockers are not errors: they are classified into a
//! [`BlockerKind`] and routed through the blocker resolver.

use crate::dag::TaskStatus;
use crate::phase::ProjectPhase;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from the orchestration core.
#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("Phase {phase} is not ready to advance: outstanding tasks {outstanding:?}")]
    PhaseNotReady {
        phase: ProjectPhase,
        outstanding: Vec<String>,
    },

    #[error("Phase transition {from} -> {to} is not allowed")]
    InvalidPhaseTransition {
        from: ProjectPhase,
        to: ProjectPhase,
    },

    #[error("Task {task_id} cannot move from {from} to {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Cycle detected in task dependencies. Involved tasks: {tasks:?}")]
    CyclicDependency { tasks: Vec<String> },

    #[error(
        "Task {task_id} ({capability}) requires upstream output '{input}' but no dependency produced it"
    )]
    MissingUpstreamOutput {
        task_id: String,
        capability: String,
        input: String,
    },

    #[error("Duplicate task id: {task_id}")]
    DuplicateTask { task_id: String },

    #[error("Unknown dependency '{dependency}' in task '{task_id}': no task with that id exists")]
    UnknownDependency { task_id: String, dependency: String },

    #[error(
        "Task '{task_id}' ({phase}) cannot depend on '{dependency}' from the later phase {dependency_phase}"
    )]
    LaterPhaseDependency {
        task_id: String,
        phase: ProjectPhase,
        dependency: String,
        dependency_phase: ProjectPhase,
    },

    #[error("Task {task_id} not found")]
    UnknownTask { task_id: String },

    #[error("Capability '{capability}' is already registered")]
    DuplicateCapability { capability: String },

    #[error("Fallback '{fallback}' for capability '{capability}' is not registered")]
    UnknownFallback {
        capability: String,
        fallback: String,
    },

    #[error("Invalid skill descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("No pending escalation for task {task_id}")]
    NoPendingEscalation { task_id: String },

    #[error("State storage error: {0}")]
    Storage(#[source] anyhow::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Convenience alias used throughout the core.
pub type Result<T, E = PlannerError> = std::result::Result<T, E>;

/// The three blocker categories the resolver distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockerKind {
    /// A missing or absent upstream output, or an undeclared task.
    Dependency,
    /// A missing external resource: package, command, capability handler.
    Technical,
    /// Anything that needs a product decision from the operator.
    Product,
}

impl std::fmt::Display for BlockerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockerKind::Dependency => write!(f, "dependency"),
            BlockerKind::Technical => write!(f, "technical"),
            BlockerKind::Product => write!(f, "product"),
        }
    }
}

impl std::str::FromStr for BlockerKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dependency" => Ok(BlockerKind::Dependency),
            "technical" => Ok(BlockerKind::Technical),
            "product" => Ok(BlockerKind::Product),
            _ => anyhow::bail!(
                "Invalid blocker kind '{}'. Valid values: dependency, technical, product",
                s
            ),
        }
    }
}
