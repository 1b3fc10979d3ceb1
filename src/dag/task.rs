//! Task records held by the task graph.

use crate::phase::ProjectPhase;
use serde::{Deserialize, Serialize};

/// Status of a task in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to be scheduled
    #[default]
    Pending,
    /// Delegated to a capability handler
    InProgress,
    /// Finished with accepted outputs
    Completed,
    /// Cannot proceed; see `blocked_reason`
    Blocked,
}

impl TaskStatus {
    /// Check if the task finished successfully.
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Check if the task still needs work (anything but completed).
    pub fn is_outstanding(&self) -> bool {
        !self.is_completed()
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Blocked => write!(f, "blocked"),
        }
    }
}

fn default_phase() -> ProjectPhase {
    ProjectPhase::Building
}

/// A unit of delegated work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    /// Unique task id
    pub id: String,
    /// Human-readable title
    pub title: String,
    /// Capability name used to look up the delegate handler
    pub capability: String,
    /// Lifecycle phase this task belongs to
    #[serde(default = "default_phase")]
    pub phase: ProjectPhase,
    /// Ids of tasks that must complete first
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Soft-priority hints: ids of tasks that should preferably complete first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<String>,
    #[serde(default)]
    pub status: TaskStatus,
    /// Artifact references produced by the task
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
    /// Artifacts touched by attempts that were never accepted
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub touched: Vec<String>,
    /// Scheduling order; assigned on insertion, bumped when a task is deferred
    #[serde(default)]
    pub sequence: u64,
    /// Set when the task was re-queued from `blocked`
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub requeued: bool,
}

impl Task {
    /// Create a pending task in the `building` phase.
    pub fn new(id: &str, title: &str, capability: &str, depends_on: Vec<String>) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            capability: capability.to_string(),
            phase: default_phase(),
            depends_on,
            hints: Vec::new(),
            status: TaskStatus::Pending,
            outputs: Vec::new(),
            blocked_reason: None,
            touched: Vec::new(),
            sequence: 0,
            requeued: false,
        }
    }

    /// Set the phase this task belongs to.
    pub fn in_phase(mut self, phase: ProjectPhase) -> Self {
        self.phase = phase;
        self
    }

    /// Set soft-priority hints.
    pub fn with_hints(mut self, hints: Vec<String>) -> Self {
        self.hints = hints;
        self
    }

    /// Checkpoint marker for a status of this task.
    pub fn checkpoint_label(&self, status: TaskStatus) -> String {
        format!("{}:{}:{}", self.phase, self.id, status)
    }
}
