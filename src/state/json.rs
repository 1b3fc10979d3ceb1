use super::{CheckpointEntry, SNAPSHOT_VERSION, Snapshot, StateStore};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// File-backed store inside the `.planner/` directory.
///
/// - `state.json` holds the snapshot, replaced atomically (temp file + rename)
/// - `checkpoints` is an append-only `label|timestamp` log
/// - `lock` is held exclusively for the lifetime of the store
pub struct JsonStateStore {
    state_file: PathBuf,
    checkpoint_file: PathBuf,
    _lock: File,
}

impl JsonStateStore {
    /// Open the store in `dir`, taking the single-owner lock.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create state directory {}", dir.display()))?;

        let lock_path = dir.join("lock");
        let lock = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .context("Failed to open lock file")?;
        lock.try_lock_exclusive().with_context(|| {
            format!(
                "Another planner process owns {}; only one orchestrator may run per project",
                dir.display()
            )
        })?;

        Ok(Self {
            state_file: dir.join("state.json"),
            checkpoint_file: dir.join("checkpoints"),
            _lock: lock,
        })
    }

    pub fn state_file(&self) -> &Path {
        &self.state_file
    }

    fn last_checkpoint(&self) -> Result<Option<String>> {
        Ok(self.checkpoints()?.pop().map(|e| e.label))
    }
}

impl StateStore for JsonStateStore {
    fn load(&self) -> Result<Option<Snapshot>> {
        if !self.state_file.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.state_file).context("Failed to read state file")?;
        let snapshot: Snapshot =
            serde_json::from_str(&content).context("Failed to parse state file")?;
        if snapshot.version > SNAPSHOT_VERSION {
            anyhow::bail!(
                "State file {} has format version {}, this build understands up to {}",
                self.state_file.display(),
                snapshot.version,
                SNAPSHOT_VERSION
            );
        }
        Ok(Some(snapshot))
    }

    fn save(&mut self, snapshot: &Snapshot) -> Result<()> {
        let json = serde_json::to_string_pretty(snapshot).context("Failed to serialize state")?;
        let tmp = self.state_file.with_extension("json.tmp");

        {
            let mut file = File::create(&tmp).context("Failed to create temporary state file")?;
            file.write_all(json.as_bytes())
                .context("Failed to write temporary state file")?;
            file.sync_all().context("Failed to flush temporary state file")?;
        }

        fs::rename(&tmp, &self.state_file).context("Failed to replace state file")?;
        Ok(())
    }

    fn append_checkpoint(&mut self, label: &str) -> Result<bool> {
        if self.last_checkpoint()?.as_deref() == Some(label) {
            return Ok(false);
        }

        let entry = format!("{}|{}\n", label, Utc::now().to_rfc3339());
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.checkpoint_file)
            .context("Failed to open checkpoint log")?
            .write_all(entry.as_bytes())
            .context("Failed to write checkpoint entry")?;
        Ok(true)
    }

    fn checkpoints(&self) -> Result<Vec<CheckpointEntry>> {
        if !self.checkpoint_file.exists() {
            return Ok(Vec::new());
        }

        let content =
            fs::read_to_string(&self.checkpoint_file).context("Failed to read checkpoint log")?;

        Ok(content
            .lines()
            .filter_map(|line| {
                let (label, timestamp) = line.rsplit_once('|')?;
                Some(CheckpointEntry {
                    label: label.to_string(),
                    timestamp: DateTime::parse_from_rfc3339(timestamp)
                        .ok()?
                        .with_timezone(&Utc),
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::Task;
    use crate::phase::ProjectPhase;
    use crate::state::ProjectState;
    use tempfile::tempdir;

    #[test]
    fn test_load_missing_state_is_none() {
        let dir = tempdir().unwrap();
        let store = JsonStateStore::open(dir.path()).unwrap();
        assert!(store.load().unwrap().is_none());
        assert!(store.checkpoints().unwrap().is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let mut store = JsonStateStore::open(dir.path()).unwrap();

        let project = ProjectState {
            phase: ProjectPhase::Building,
            checkpoint: Some("building:start".into()),
            ..Default::default()
        };
        let snapshot = Snapshot::new(project, vec![Task::new("a", "A", "x", vec![])], vec![]);
        store.save(&snapshot).unwrap();

        assert_eq!(store.load().unwrap(), Some(snapshot));
        assert!(!dir.path().join("state.json.tmp").exists());
    }

    #[test]
    fn test_checkpoint_log_is_idempotent_for_consecutive_labels() {
        let dir = tempdir().unwrap();
        let mut store = JsonStateStore::open(dir.path()).unwrap();

        assert!(store.append_checkpoint("stack:start").unwrap());
        assert!(!store.append_checkpoint("stack:start").unwrap());
        assert!(store.append_checkpoint("building:a:completed").unwrap());
        assert!(store.append_checkpoint("stack:start").unwrap());

        let labels: Vec<String> = store
            .checkpoints()
            .unwrap()
            .into_iter()
            .map(|e| e.label)
            .collect();
        assert_eq!(
            labels,
            vec!["stack:start", "building:a:completed", "stack:start"]
        );
    }

    #[test]
    fn test_second_owner_is_rejected() {
        let dir = tempdir().unwrap();
        let _first = JsonStateStore::open(dir.path()).unwrap();
        let second = JsonStateStore::open(dir.path());
        assert!(second.is_err());
    }

    #[test]
    fn test_future_format_is_rejected() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("state.json"),
            r#"{"version": 99, "project": {}}"#,
        )
        .unwrap();
        let store = JsonStateStore::open(dir.path()).unwrap();
        assert!(store.load().is_err());
    }
}
