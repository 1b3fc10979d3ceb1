use super::{CheckpointEntry, Snapshot, StateStore};
use anyhow::Result;
use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Inner {
    snapshot: Option<Snapshot>,
    checkpoints: Vec<CheckpointEntry>,
    saves: usize,
}

/// In-memory store. Clones share the same contents, so a test can keep a
/// handle and inspect what the orchestrator persisted.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing snapshot.
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        let store = Self::default();
        if let Ok(mut inner) = store.inner.lock() {
            inner.snapshot = Some(snapshot);
        }
        store
    }

    fn inner(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow::anyhow!("state store poisoned"))
    }

    /// The last saved snapshot.
    pub fn snapshot(&self) -> Option<Snapshot> {
        self.inner().ok().and_then(|inner| inner.snapshot.clone())
    }

    /// Number of snapshot writes so far.
    pub fn saves(&self) -> usize {
        self.inner().map(|inner| inner.saves).unwrap_or(0)
    }

    /// Checkpoint labels, oldest first.
    pub fn labels(&self) -> Vec<String> {
        self.inner()
            .map(|inner| inner.checkpoints.iter().map(|e| e.label.clone()).collect())
            .unwrap_or_default()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<Option<Snapshot>> {
        Ok(self.inner()?.snapshot.clone())
    }

    fn save(&mut self, snapshot: &Snapshot) -> Result<()> {
        let mut inner = self.inner()?;
        inner.snapshot = Some(snapshot.clone());
        inner.saves += 1;
        Ok(())
    }

    fn append_checkpoint(&mut self, label: &str) -> Result<bool> {
        let mut inner = self.inner()?;
        if inner.checkpoints.last().is_some_and(|e| e.label == label) {
            return Ok(false);
        }
        inner.checkpoints.push(CheckpointEntry {
            label: label.to_string(),
            timestamp: Utc::now(),
        });
        Ok(true)
    }

    fn checkpoints(&self) -> Result<Vec<CheckpointEntry>> {
        Ok(self.inner()?.checkpoints.clone())
    }
}
