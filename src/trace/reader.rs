//! Validating trace reader
//!
//! Reads the NDJSON trace for a task. Task ids are validated against the
//! id pattern before any path is built; the resolved path must stay inside
//! the trace directory; files past the size ceiling are rejected; malformed
//! lines (including a partial trailing write) are skipped and counted.

use std::io::{BufRead, BufReader};
use std::path::{Component, Path, PathBuf};

use crate::agent::types::is_valid_id;
use crate::error::{Error, Result};

use super::event::{TraceEvent, TraceRecord};
use super::writer::{MAX_TRACE_BYTES, TRACE_SUBDIR};

/// Result of loading a trace file.
#[derive(Debug, Clone, Default)]
pub struct TraceLog {
    /// Records in file (insertion) order.
    pub records: Vec<TraceRecord>,
    /// Lines that failed to parse.
    pub skipped_lines: u64,
}

/// Reader over `<workingDir>/.kb/traces/incremental/`.
pub struct TraceReader {
    trace_dir: PathBuf,
}

impl TraceReader {
    pub fn new(working_dir: &Path) -> Self {
        TraceReader {
            trace_dir: working_dir.join(TRACE_SUBDIR),
        }
    }

    /// Resolve and validate the trace path for a task id.
    pub fn trace_path(&self, task_id: &str) -> Result<PathBuf> {
        if !is_valid_id(task_id) {
            return Err(Error::InvalidInput(format!(
                "task id must match ^[A-Za-z0-9_-]+$: {:?}",
                task_id
            )));
        }
        let path = self.trace_dir.join(format!("{}.ndjson", task_id));

        // Containment: the path relative to the trace directory must not
        // escape it. The id pattern already guarantees this; the check
        // stands on its own as the last line of defense.
        let relative = path
            .strip_prefix(&self.trace_dir)
            .map_err(|_| Error::InvalidInput(format!("trace path escapes trace dir: {:?}", path)))?;
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(Error::InvalidInput(format!(
                "trace path escapes trace dir: {:?}",
                path
            )));
        }
        Ok(path)
    }

    /// Load the full trace for a task.
    pub fn read(&self, task_id: &str) -> Result<TraceLog> {
        let path = self.trace_path(task_id)?;
        let file = std::fs::File::open(&path)?;
        let len = file.metadata()?.len();
        if len > MAX_TRACE_BYTES {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("trace file exceeds {} byte ceiling: {}", MAX_TRACE_BYTES, len),
            )));
        }

        let mut log = TraceLog::default();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TraceRecord>(&line) {
                Ok(record) => log.records.push(record),
                Err(_) => log.skipped_lines += 1,
            }
        }
        Ok(log)
    }

    /// Load a trace and keep only events of the given type, in insertion
    /// order. The type name is validated first.
    pub fn filter_by_type(&self, task_id: &str, event_type: &str) -> Result<Vec<TraceRecord>> {
        if !TraceEvent::is_known_type(event_type) {
            return Err(Error::InvalidInput(format!(
                "unknown event type: {}",
                event_type
            )));
        }
        let log = self.read(task_id)?;
        Ok(log
            .records
            .into_iter()
            .filter(|r| r.event.type_name() == event_type)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::writer::TraceWriter;

    fn seed(dir: &Path) {
        let writer = TraceWriter::create(dir, "t1").unwrap();
        for i in 0..4 {
            writer
                .record(
                    i,
                    TraceEvent::ToolExecution {
                        tool: "fs:read".into(),
                        success: true,
                        duration_ms: 1,
                        output_chars: 5,
                        output_snippet: "hello".into(),
                        cached: false,
                        error_code: None,
                    },
                )
                .unwrap();
        }
        for i in 0..3 {
            writer
                .record(
                    i,
                    TraceEvent::LlmCall {
                        tier: crate::llm::Tier::Small,
                        model: "m".into(),
                        messages: 2,
                        tools_offered: 1,
                        prompt_tokens: 10,
                        completion_tokens: 5,
                        tool_calls_returned: 0,
                        content_chars: 8,
                    },
                )
                .unwrap();
        }
        writer.close().unwrap();
    }

    #[test]
    fn filters_by_type_in_order() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());

        let reader = TraceReader::new(dir.path());
        let calls = reader.filter_by_type("t1", "llm:call").unwrap();
        assert_eq!(calls.len(), 3);
        assert!(calls.windows(2).all(|w| w[0].seq < w[1].seq));

        let tools = reader.filter_by_type("t1", "tool:execution").unwrap();
        assert_eq!(tools.len(), 4);
    }

    #[test]
    fn rejects_traversal_probes() {
        let dir = tempfile::tempdir().unwrap();
        let reader = TraceReader::new(dir.path());
        assert!(matches!(
            reader.read("../../etc/passwd"),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            reader.filter_by_type("t1", "no:such"),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn skips_malformed_trailing_line() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());
        let path = dir.path().join(TRACE_SUBDIR).join("t1.ndjson");
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("{\"seq\": 99, \"truncat");
        std::fs::write(&path, content).unwrap();

        let reader = TraceReader::new(dir.path());
        let log = reader.read("t1").unwrap();
        assert_eq!(log.records.len(), 7);
        assert_eq!(log.skipped_lines, 1);
    }
}
