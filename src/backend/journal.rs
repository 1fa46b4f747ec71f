//! On-disk record of an in-flight sequential replay.
//!
//! Its presence under the git directory marks a replay in progress, the way
//! `rebase-merge/` does for git itself. It holds enough to put every ref
//! back where it was if the process dies before the replay completes.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, RewriteError};

pub const JOURNAL_DIR: &str = "history-rewrite";
const JOURNAL_FILE: &str = "journal.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalRef {
    pub name: String,
    pub original: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub started_at: String,
    pub scope: String,
    pub total: usize,
    pub completed: usize,
    pub refs: Vec<JournalRef>,
}

/// Handle to the journal of the replay currently running.
#[derive(Debug)]
pub struct Journal {
    dir: PathBuf,
    entry: JournalEntry,
}

fn journal_dir(git_dir: &Path) -> PathBuf {
    git_dir.join(JOURNAL_DIR)
}

impl Journal {
    /// Whether a replay journal exists under `git_dir`.
    pub fn exists(git_dir: &Path) -> bool {
        journal_dir(git_dir).exists()
    }

    /// Creates the journal. Fails if one is already present.
    pub fn begin(git_dir: &Path, entry: JournalEntry) -> Result<Self> {
        let dir = journal_dir(git_dir);
        if dir.exists() {
            return Err(RewriteError::OperationInProgress {
                operation: "history rewrite".to_string(),
            });
        }
        fs::create_dir_all(&dir).map_err(|e| RewriteError::io(&dir, e))?;
        let journal = Self { dir, entry };
        journal.write()?;
        Ok(journal)
    }

    /// Reads the journal left by an interrupted replay, if any.
    pub fn load(git_dir: &Path) -> Result<Option<JournalEntry>> {
        let path = journal_dir(git_dir).join(JOURNAL_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let body = fs::read_to_string(&path).map_err(|e| RewriteError::io(&path, e))?;
        let entry = toml::from_str(&body).map_err(|e| RewriteError::Config {
            message: format!("corrupt replay journal {}: {}", path.display(), e),
        })?;
        Ok(Some(entry))
    }

    pub fn record_progress(&mut self, completed: usize) -> Result<()> {
        self.entry.completed = completed;
        self.write()
    }

    /// Removes the journal, ending the replay.
    pub fn finish(self) -> Result<()> {
        Self::remove(&self.dir)
    }

    /// Removes whatever journal exists under `git_dir`.
    pub fn discard(git_dir: &Path) -> Result<()> {
        let dir = journal_dir(git_dir);
        if dir.exists() {
            Self::remove(&dir)?;
        }
        Ok(())
    }

    fn remove(dir: &Path) -> Result<()> {
        fs::remove_dir_all(dir).map_err(|e| RewriteError::io(dir, e))
    }

    fn write(&self) -> Result<()> {
        let path = self.dir.join(JOURNAL_FILE);
        let body = toml::to_string(&self.entry).map_err(|e| RewriteError::Config {
            message: format!("cannot serialize replay journal: {}", e),
        })?;
        fs::write(&path, body).map_err(|e| RewriteError::io(&path, e))
    }
}
