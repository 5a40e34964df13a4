//! Overflow memory: evicted facts and full summaries
//!
//! Persisted under `<workingDir>/.kb/memory/<sessionId>/` as
//! `factsheet.json` and `archive.json`. Snapshot writes are atomic via a
//! temp file and rename. The archive itself is FIFO-bounded.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::types::is_valid_id;
use crate::error::{Error, Result};

use super::factsheet::{Fact, FactCategory, FactSheet};

/// Relative location of memory snapshots under a working directory.
pub const MEMORY_SUBDIR: &str = ".kb/memory";

/// What kind of entry was archived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveKind {
    EvictedFact,
    Summary,
}

/// One archived item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub kind: ArchiveKind,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<FactCategory>,
    pub iteration: u32,
    pub archived_at: DateTime<Utc>,
}

impl ArchiveEntry {
    pub fn from_fact(fact: Fact) -> Self {
        ArchiveEntry {
            kind: ArchiveKind::EvictedFact,
            text: fact.text,
            category: Some(fact.category),
            iteration: fact.iteration,
            archived_at: Utc::now(),
        }
    }

    pub fn summary(text: impl Into<String>, iteration: u32) -> Self {
        ArchiveEntry {
            kind: ArchiveKind::Summary,
            text: text.into(),
            category: None,
            iteration,
            archived_at: Utc::now(),
        }
    }
}

/// FIFO-bounded overflow store with on-disk snapshots.
#[derive(Debug)]
pub struct ArchiveMemory {
    dir: PathBuf,
    entries: VecDeque<ArchiveEntry>,
    max_entries: usize,
    max_total_chars: usize,
    total_chars: usize,
}

impl ArchiveMemory {
    /// Create the archive for a session. Validates the session id and
    /// creates the snapshot directory.
    pub fn create(
        working_dir: &Path,
        session_id: &str,
        max_entries: usize,
        max_total_chars: usize,
    ) -> Result<Self> {
        if !is_valid_id(session_id) {
            return Err(Error::InvalidInput(format!(
                "session id must match ^[A-Za-z0-9_-]+$: {:?}",
                session_id
            )));
        }
        let dir = working_dir.join(MEMORY_SUBDIR).join(session_id);
        std::fs::create_dir_all(&dir)?;
        Ok(ArchiveMemory {
            dir,
            entries: VecDeque::new(),
            max_entries,
            max_total_chars,
            total_chars: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append an entry, evicting from the front until within bounds.
    pub fn push(&mut self, entry: ArchiveEntry) {
        self.total_chars += entry.text.chars().count();
        self.entries.push_back(entry);
        while self.entries.len() > self.max_entries || self.total_chars > self.max_total_chars {
            match self.entries.pop_front() {
                Some(dropped) => {
                    self.total_chars = self
                        .total_chars
                        .saturating_sub(dropped.text.chars().count());
                }
                None => break,
            }
        }
    }

    /// Persist both snapshots atomically.
    pub fn persist(&self, sheet: &FactSheet) -> Result<()> {
        write_atomic(
            &self.dir.join("factsheet.json"),
            &serde_json::to_vec_pretty(sheet)?,
        )?;
        let entries: Vec<&ArchiveEntry> = self.entries.iter().collect();
        write_atomic(
            &self.dir.join("archive.json"),
            &serde_json::to_vec_pretty(&entries)?,
        )?;
        Ok(())
    }

    /// Load a persisted fact sheet snapshot, if present.
    pub fn load_factsheet(working_dir: &Path, session_id: &str) -> Result<FactSheet> {
        if !is_valid_id(session_id) {
            return Err(Error::InvalidInput(format!(
                "session id must match ^[A-Za-z0-9_-]+$: {:?}",
                session_id
            )));
        }
        let path = working_dir
            .join(MEMORY_SUBDIR)
            .join(session_id)
            .join("factsheet.json");
        let bytes = std::fs::read(&path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Write via temp file + rename so readers never observe a partial file.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
