use super::{Journal, JournalEntry};
use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Appends journal lines to a file.
///
/// Every process that opens the journal gets a run id; the first line it
/// writes marks the start of that run.
pub struct FileJournal {
    path: PathBuf,
    run_id: Uuid,
    started: bool,
}

impl FileJournal {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            run_id: Uuid::new_v4(),
            started: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    fn append(&self, line: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create journal directory")?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context("Failed to open journal")?;
        writeln!(file, "{}", line).context("Failed to write journal entry")?;
        Ok(())
    }

    /// Read back every line.
    pub fn lines(&self) -> Result<Vec<String>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path).context("Failed to read journal")?;
        Ok(content.lines().map(str::to_string).collect())
    }
}

impl Journal for FileJournal {
    fn record(&mut self, entry: JournalEntry) -> Result<()> {
        if !self.started {
            self.append(&format!(
                "# run {} started {}",
                &self.run_id.to_string()[..8],
                entry.timestamp.to_rfc3339()
            ))?;
            self.started = true;
        }
        self.append(&entry.to_string())
    }
}
