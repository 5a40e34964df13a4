//! Orchestrator-side session state
//!
//! A compact roll-up the orchestrator keeps per session: a short summary,
//! a FIFO of recent finding lines, and references to large artifacts that
//! live in an external cache.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Summary length cap.
pub const SUMMARY_MAX_CHARS: usize = 200;
/// Findings FIFO cap.
pub const FINDINGS_MAX: usize = 10;

/// Reference to an artifact stored outside the session state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub id: String,
    /// Locator understood by the external cache (path, key, url)
    pub locator: String,
}

/// Per-session roll-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    summary: String,
    findings: VecDeque<String>,
    artifact_refs: Vec<ArtifactRef>,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>) -> Self {
        SessionState {
            session_id: session_id.into(),
            summary: String::new(),
            findings: VecDeque::new(),
            artifact_refs: Vec::new(),
        }
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    /// Set the summary, truncating to the cap.
    pub fn set_summary(&mut self, summary: impl Into<String>) {
        let summary = summary.into();
        self.summary = summary.chars().take(SUMMARY_MAX_CHARS).collect();
    }

    pub fn findings(&self) -> impl Iterator<Item = &str> {
        self.findings.iter().map(|s| s.as_str())
    }

    /// Record a finding line; the oldest drops past the cap.
    pub fn push_finding(&mut self, finding: impl Into<String>) {
        self.findings.push_back(finding.into());
        while self.findings.len() > FINDINGS_MAX {
            self.findings.pop_front();
        }
    }

    pub fn artifact_refs(&self) -> &[ArtifactRef] {
        &self.artifact_refs
    }

    pub fn push_artifact(&mut self, artifact: ArtifactRef) {
        self.artifact_refs.push(artifact);
    }

    /// Drop per-session accumulations (cleanup at session end).
    pub fn clear(&mut self) {
        self.summary.clear();
        self.findings.clear();
        self.artifact_refs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_is_truncated() {
        let mut state = SessionState::new("s1");
        state.set_summary("x".repeat(500));
        assert_eq!(state.summary().len(), SUMMARY_MAX_CHARS);
    }

    #[test]
    fn findings_fifo_caps_at_ten() {
        let mut state = SessionState::new("s1");
        for i in 0..15 {
            state.push_finding(format!("finding {}", i));
        }
        let collected: Vec<&str> = state.findings().collect();
        assert_eq!(collected.len(), FINDINGS_MAX);
        assert_eq!(collected[0], "finding 5");
        assert_eq!(collected[9], "finding 14");
    }
}
