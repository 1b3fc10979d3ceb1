//! Append-only, human-readable journal of what the orchestrator did and why.
//!
//! One entry is written after every phase transition, task completion,
//! blockage and operator decision. Each line reads
//! `timestamp  subject  event - detail`.

mod file;

pub use file::FileJournal;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};

/// Kind of journaled change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalEvent {
    Planned,
    PhaseAdvanced,
    PhaseIterated,
    PhaseOverridden,
    TaskCompleted,
    TaskBlocked,
    TaskRequeued,
    Escalated,
    OperatorDecision,
    DecisionRecorded,
}

impl fmt::Display for JournalEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JournalEvent::Planned => "planned",
            JournalEvent::PhaseAdvanced => "phase advanced",
            JournalEvent::PhaseIterated => "phase iterated",
            JournalEvent::PhaseOverridden => "phase overridden",
            JournalEvent::TaskCompleted => "completed",
            JournalEvent::TaskBlocked => "blocked",
            JournalEvent::TaskRequeued => "requeued",
            JournalEvent::Escalated => "escalated",
            JournalEvent::OperatorDecision => "operator decision",
            JournalEvent::DecisionRecorded => "decision recorded",
        };
        write!(f, "{}", s)
    }
}

/// A single journal line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub timestamp: DateTime<Utc>,
    /// Task id, or `project` for project-wide changes
    pub subject: String,
    pub event: JournalEvent,
    /// What changed and why
    pub detail: String,
}

impl JournalEntry {
    pub fn new(subject: &str, event: JournalEvent, detail: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            subject: subject.to_string(),
            event,
            detail: detail.into(),
        }
    }

    pub fn project(event: JournalEvent, detail: impl Into<String>) -> Self {
        Self::new("project", event, detail)
    }
}

impl fmt::Display for JournalEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}  {}  {} - {}",
            self.timestamp.format("%Y-%m-%dT%H:%M:%SZ"),
            self.subject,
            self.event,
            self.detail.replace('\n', " ")
        )
    }
}

/// External log collaborator.
pub trait Journal: Send {
    fn record(&mut self, entry: JournalEntry) -> Result<()>;
}

/// Keeps entries in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryJournal {
    entries: Arc<Mutex<Vec<JournalEntry>>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Entries of one kind, in order.
    pub fn events(&self, event: JournalEvent) -> Vec<JournalEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.event == event)
            .collect()
    }
}

impl Journal for MemoryJournal {
    fn record(&mut self, entry: JournalEntry) -> Result<()> {
        self.entries
            .lock()
            .map_err(|_| anyhow::anyhow!("journal buffer poisoned"))?
            .push(entry);
        Ok(())
    }
}
