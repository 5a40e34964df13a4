//! # KbAgent
//!
//! An autonomous LLM agent runtime built with Rust.
//!
//! ## Architecture
//!
//! KbAgent is organized leaves-up: persistence and memory at the bottom,
//! the iteration loop composing them, the orchestrator composing loops:
//!
//! - **Agent** (`agent`): the bounded iteration loop, loop/stuck detection,
//!   recovery, and task classification
//! - **Orchestrator** (`orchestrator`): plan-execute-synthesize over
//!   specialist loops with retry and tier escalation
//! - **Budget** (`budget`): iteration/token budgets and tier selection
//! - **Memory** (`memory`): fact sheet, archive, session state, and the
//!   async summarizer
//! - **Context** (`context`): history projection, truncation, and
//!   tool-result deduplication
//! - **Tools** (`tools`): tool trait, registry, execution façade, built-ins
//! - **Trace** (`trace`): append-only NDJSON event log per task
//! - **Verifier** (`verifier`): rubric-based plan and output verification
//! - **LLM** (`llm`): the injected handle trait and tier routing
//!
//! ## Design Principles
//!
//! 1. **Bounded by construction**: every loop is capped by iteration and
//!    token budgets; forced synthesis converts exhaustion into an answer
//! 2. **Trait seams**: the LLM client and tool implementations are
//!    injected; the runtime never talks HTTP itself
//! 3. **Observable**: every LLM call, tool execution, and stopping
//!    decision is one trace event
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use kbagent::agent::{IterationLoop, Task};
//! use kbagent::config::RuntimeConfig;
//! use kbagent::llm::LlmRouter;
//! use kbagent::tools::builtin_registry;
//!
//! # async fn run(llm: LlmRouter) -> kbagent::Result<()> {
//! let task = Task::new("read ./README.md and tell me the title", ".");
//! let registry = Arc::new(builtin_registry(&task.working_dir));
//! let agent = IterationLoop::new(task, llm, registry, RuntimeConfig::default())?;
//! let result = agent.run().await?;
//! println!("{}", result.answer);
//! # Ok(())
//! # }
//! ```

// Agent logic: the iteration loop and its supporting components
pub mod agent;

// Iteration and token budgets, tier escalation
pub mod budget;

// Runtime configuration
pub mod config;

// Context projection and tool-result deduplication
pub mod context;

// Error types
pub mod error;

// LLM handle abstraction and tier routing
pub mod llm;

// Memory: fact sheet, archive, session state, summarizer
pub mod memory;

// Hierarchical orchestration over specialist loops
pub mod orchestrator;

// Tools: trait, registry, façade, built-ins
pub mod tools;

// Append-only NDJSON tracing
pub mod trace;

// Rubric-based verification
pub mod verifier;

// Re-export commonly used items
pub use error::{Error, Result};

pub use agent::{CancelToken, IterationLoop, Message, Role, Task, TaskMode, TaskResult};
pub use budget::{Budget, BudgetController};
pub use llm::{LlmHandle, LlmRouter, Tier};
pub use orchestrator::{Orchestrator, SpecialistProfile};
pub use tools::{Tool, ToolRegistry};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const NAME: &str = env!("CARGO_PKG_NAME");
