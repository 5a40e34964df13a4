//! Findings store
//!
//! Keyed by (session, subtask); pruned when the session ends.

use std::collections::HashMap;

use super::types::Finding;

/// In-memory findings keyed by session and subtask.
#[derive(Debug, Default)]
pub struct FindingsStore {
    entries: HashMap<(String, String), Vec<Finding>>,
}

impl FindingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, session_id: &str, subtask_id: &str, findings: Vec<Finding>) {
        if findings.is_empty() {
            return;
        }
        self.entries
            .entry((session_id.to_string(), subtask_id.to_string()))
            .or_default()
            .extend(findings);
    }

    pub fn get(&self, session_id: &str, subtask_id: &str) -> &[Finding] {
        self.entries
            .get(&(session_id.to_string(), subtask_id.to_string()))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// All findings for a session, in insertion order per subtask.
    pub fn session_findings(&self, session_id: &str) -> Vec<&Finding> {
        let mut keys: Vec<_> = self
            .entries
            .keys()
            .filter(|(session, _)| session == session_id)
            .collect();
        keys.sort();
        keys.into_iter()
            .flat_map(|key| self.entries[key].iter())
            .collect()
    }

    /// Drop everything recorded for a session.
    pub fn prune_session(&mut self, session_id: &str) {
        self.entries.retain(|(session, _), _| session != session_id);
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::types::Severity;

    #[test]
    fn prune_removes_only_the_session() {
        let mut store = FindingsStore::new();
        store.insert(
            "s1",
            "subtask-1",
            vec![Finding::new(Severity::High, "bug", "a", "d")],
        );
        store.insert(
            "s2",
            "subtask-1",
            vec![Finding::new(Severity::Low, "style", "b", "d")],
        );

        assert_eq!(store.len(), 2);
        store.prune_session("s1");
        assert_eq!(store.len(), 1);
        assert!(store.get("s1", "subtask-1").is_empty());
        assert_eq!(store.get("s2", "subtask-1").len(), 1);
    }
}
