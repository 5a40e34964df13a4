//! Memory: fact sheet, archive, session state, and extraction
//!
//! Three coordinated structures: the `FactSheet` is the working memory
//! injected into every prompt; the `ArchiveMemory` holds evicted facts and
//! summaries with on-disk snapshots; `SessionState` is the orchestrator's
//! per-session roll-up. Facts arrive from the heuristic extractor (every
//! successful tool call) and from the async summarizer (on an interval).

pub mod archive;
pub mod extractor;
pub mod factsheet;
pub mod session_state;
pub mod summarizer;

pub use archive::{ArchiveEntry, ArchiveKind, ArchiveMemory, MEMORY_SUBDIR};
pub use extractor::extract_fact;
pub use factsheet::{estimate_tokens, AddOutcome, Fact, FactCategory, FactSheet};
pub use session_state::{ArtifactRef, SessionState, FINDINGS_MAX, SUMMARY_MAX_CHARS};
pub use summarizer::{FactSink, SummarizationTask, Summarizer};

use std::sync::{Arc, Mutex};

/// Fact sheet + archive behind one lock, so summarizer write-through is
/// serialized with main-loop writes. Evictions flow into the archive.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

struct MemoryInner {
    sheet: FactSheet,
    archive: ArchiveMemory,
}

impl MemoryStore {
    pub fn new(sheet: FactSheet, archive: ArchiveMemory) -> Self {
        MemoryStore {
            inner: Arc::new(Mutex::new(MemoryInner { sheet, archive })),
        }
    }

    /// Add one fact; evicted entries move to the archive.
    /// Returns the add outcome.
    pub fn add_fact(&self, fact: Fact) -> AddOutcome {
        let mut inner = self.inner.lock().expect("memory lock poisoned");
        let (outcome, evicted) = inner.sheet.add(fact);
        for fact in evicted {
            inner.archive.push(ArchiveEntry::from_fact(fact));
        }
        outcome
    }

    /// Archive a summary line directly.
    pub fn add_summary(&self, text: impl Into<String>, iteration: u32) {
        let mut inner = self.inner.lock().expect("memory lock poisoned");
        inner.archive.push(ArchiveEntry::summary(text, iteration));
    }

    /// Render the fact sheet for prompt injection.
    pub fn render_facts(&self) -> String {
        self.inner.lock().expect("memory lock poisoned").sheet.render()
    }

    pub fn fact_count(&self) -> usize {
        self.inner.lock().expect("memory lock poisoned").sheet.len()
    }

    pub fn estimated_tokens(&self) -> usize {
        self.inner
            .lock()
            .expect("memory lock poisoned")
            .sheet
            .estimated_tokens()
    }

    pub fn archived_count(&self) -> usize {
        self.inner.lock().expect("memory lock poisoned").archive.len()
    }

    /// Persist both snapshots (best-effort at call sites).
    pub fn persist(&self) -> crate::error::Result<()> {
        let inner = self.inner.lock().expect("memory lock poisoned");
        inner.archive.persist(&inner.sheet)
    }
}

impl FactSink for MemoryStore {
    fn absorb(&self, facts: Vec<Fact>) {
        for fact in facts {
            self.add_fact(fact);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evictions_flow_to_archive() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(
            FactSheet::new(1, 10_000),
            ArchiveMemory::create(dir.path(), "s1", 10, 10_000).unwrap(),
        );

        store.add_fact(Fact::new(FactCategory::Finding, "first", 0.2, "t", 1));
        store.add_fact(Fact::new(FactCategory::Finding, "second", 0.9, "t", 2));

        assert_eq!(store.fact_count(), 1);
        assert_eq!(store.archived_count(), 1);
    }

    #[test]
    fn sink_merges_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(
            FactSheet::new(10, 10_000),
            ArchiveMemory::create(dir.path(), "s1", 10, 10_000).unwrap(),
        );
        store.absorb(vec![
            Fact::new(FactCategory::Finding, "needle in a.txt", 0.5, "t", 1),
            Fact::new(FactCategory::Finding, "needle in a.txt", 0.8, "t", 2),
        ]);
        assert_eq!(store.fact_count(), 1);
    }
}
