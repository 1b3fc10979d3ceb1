//! Project state and write-through persistence.
//!
//! [`ProjectState`] is the single owner of lifecycle position, decisions and
//! escape hatch counters. Together with the task graph it forms a
//! [`Snapshot`], which a [`StateStore`] writes after every mutation so a
//! crash leaves the last fully-applied transition on disk.

mod json;
mod memory;

pub use json::JsonStateStore;
pub use memory::MemoryStateStore;

use crate::dag::Task;
use crate::escape::EscapeRecord;
use crate::operator::Escalation;
use crate::phase::ProjectPhase;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Snapshot format understood by this build.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Lifecycle position and everything carried between tasks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectState {
    /// Revision, bumped on every persisted mutation
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub phase: ProjectPhase,
    /// Last completed checkpoint label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<String>,
    /// Escape hatch counters per task id
    #[serde(default)]
    pub escape_hatch: BTreeMap<String, EscapeRecord>,
    /// Carried into every context bundle
    #[serde(default)]
    pub decisions: BTreeMap<String, String>,
    #[serde(default)]
    pub missing_resources: BTreeSet<String>,
    /// Tasks re-queued onto a fallback capability
    #[serde(default)]
    pub degraded: BTreeMap<String, String>,
    /// Delegation time of completed tasks per capability, in millis
    #[serde(default)]
    pub durations: BTreeMap<String, Vec<u64>>,
    /// Escalations awaiting an operator decision
    #[serde(default)]
    pub escalations: Vec<Escalation>,
}

impl ProjectState {
    /// The capability a task should be delegated to right now.
    pub fn effective_capability<'a>(&'a self, task: &'a Task) -> &'a str {
        self.degraded
            .get(&task.id)
            .map(String::as_str)
            .unwrap_or(&task.capability)
    }

    /// Pending escalation for a task, if any.
    pub fn escalation_for(&self, task_id: &str) -> Option<&Escalation> {
        self.escalations.iter().find(|e| e.task_id() == task_id)
    }

    /// Replace any pending escalation for the same task.
    pub fn push_escalation(&mut self, escalation: Escalation) {
        self.escalations
            .retain(|e| e.task_id() != escalation.task_id());
        self.escalations.push(escalation);
    }

    /// Remove and return the pending escalation for a task.
    pub fn take_escalation(&mut self, task_id: &str) -> Option<Escalation> {
        let position = self.escalations.iter().position(|e| e.task_id() == task_id)?;
        Some(self.escalations.remove(position))
    }
}

/// The unit written by a [`StateStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub project: ProjectState,
    #[serde(default)]
    pub tasks: Vec<Task>,
    /// Definitions known to the plan but not inserted
    #[serde(default)]
    pub deferred: Vec<Task>,
}

impl Snapshot {
    pub fn new(project: ProjectState, tasks: Vec<Task>, deferred: Vec<Task>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            project,
            tasks,
            deferred,
        }
    }
}

/// One line of the checkpoint log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub label: String,
    pub timestamp: DateTime<Utc>,
}

/// Durable storage for snapshots and the checkpoint log.
pub trait StateStore: Send {
    /// Load the last saved snapshot, `None` for a fresh project.
    fn load(&self) -> Result<Option<Snapshot>>;

    /// Replace the stored snapshot.
    fn save(&mut self, snapshot: &Snapshot) -> Result<()>;

    /// Append a checkpoint label unless it equals the last one.
    ///
    /// Returns whether a line was written.
    fn append_checkpoint(&mut self, label: &str) -> Result<bool>;

    /// All checkpoint entries, oldest first.
    fn checkpoints(&self) -> Result<Vec<CheckpointEntry>>;
}
