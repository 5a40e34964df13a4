//! Append-only NDJSON tracing
//!
//! Every LLM call, tool execution, memory change, and stopping decision is
//! one event line. Traces are the offline inspection surface; the CLI's
//! `trace` subcommands read them back.

pub mod event;
pub mod reader;
pub mod writer;

pub use event::{TraceEvent, TraceRecord, EVENT_TYPES};
pub use reader::{TraceLog, TraceReader};
pub use writer::{TraceWriter, MAX_TRACE_BYTES, TRACE_SUBDIR};
