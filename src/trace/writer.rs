//! Append-only NDJSON trace writer
//!
//! One writer per task, one file per task under
//! `<workingDir>/.kb/traces/incremental/<taskId>.ndjson`. Sequence numbers
//! are globally monotone per task; on overflow past the size cap the
//! current file rolls to `.ndjson.1` and a fresh file is started.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::Utc;
use tracing::warn;

use crate::agent::types::is_valid_id;
use crate::error::{Error, Result};

use super::event::{TraceEvent, TraceRecord};

/// Size cap for one trace file before it rolls.
pub const MAX_TRACE_BYTES: u64 = 100 * 1024 * 1024;

/// Relative location of incremental traces under a working directory.
pub const TRACE_SUBDIR: &str = ".kb/traces/incremental";

struct WriterInner {
    file: BufWriter<File>,
    bytes: u64,
}

/// Append-only writer for one task's trace.
pub struct TraceWriter {
    path: PathBuf,
    inner: Mutex<WriterInner>,
    seq: AtomicU64,
}

impl TraceWriter {
    /// Create (or append to) the trace file for `task_id`.
    pub fn create(working_dir: &Path, task_id: &str) -> Result<Self> {
        if !is_valid_id(task_id) {
            return Err(Error::InvalidInput(format!(
                "task id must match ^[A-Za-z0-9_-]+$: {:?}",
                task_id
            )));
        }
        let dir = working_dir.join(TRACE_SUBDIR);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.ndjson", task_id));

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let bytes = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(TraceWriter {
            path,
            inner: Mutex::new(WriterInner {
                file: BufWriter::new(file),
                bytes,
            }),
            seq: AtomicU64::new(0),
        })
    }

    /// Path of the current trace file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last assigned sequence number (0 before the first event).
    pub fn last_seq(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    /// Append one event, assigning the next sequence number.
    pub fn record(&self, iteration: u32, event: TraceEvent) -> Result<u64> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let record = TraceRecord {
            seq,
            timestamp: Utc::now(),
            iteration,
            event,
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let mut inner = self.inner.lock().expect("trace writer lock poisoned");
        if inner.bytes + line.len() as u64 > MAX_TRACE_BYTES {
            self.roll(&mut inner)?;
        }
        inner.file.write_all(line.as_bytes())?;
        inner.bytes += line.len() as u64;
        Ok(seq)
    }

    /// Roll the current file to `.ndjson.1` and start a fresh one.
    fn roll(&self, inner: &mut WriterInner) -> Result<()> {
        inner.file.flush()?;
        let rolled = self.path.with_extension("ndjson.1");
        std::fs::rename(&self.path, &rolled)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        inner.file = BufWriter::new(file);
        inner.bytes = 0;
        Ok(())
    }

    /// Flush and fsync. Call once when the task completes.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock().expect("trace writer lock poisoned");
        inner.file.flush()?;
        inner.file.get_ref().sync_all()?;
        Ok(())
    }
}

impl Drop for TraceWriter {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.inner.lock() {
            if let Err(e) = inner.file.flush() {
                warn!("trace writer flush on drop failed: {}", e);
            }
        }
    }
}
