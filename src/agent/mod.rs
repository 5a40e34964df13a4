//! Agent logic: the iteration loop and its supporting components

pub mod classifier;
pub mod iteration_loop;
pub mod loop_detector;
pub mod recovery;
pub mod types;

pub use classifier::{TaskClassification, TaskClassifier, TaskIntent};
pub use iteration_loop::{IterationLoop, REPORT_TOOL, SYNTH_HEARTBEAT_MS, SYNTH_TIMEOUT_MS};
pub use loop_detector::{IterationSignature, LoopDetector, LoopSignal, StuckDetector, StuckSignal};
pub use recovery::{RecoveryAction, RecoveryAdvisor, MAX_RECOVERY_RETRIES_PER_TOOL};
pub use types::{
    is_valid_id, parse_termination_marker, AssistantToolCall, CancelToken, FunctionCall,
    FunctionDefinition, FunctionName, GenerationOptions, IterationState, Message, Phase,
    ReasonCode, Role, RunOutcome, Task, TaskMode, TaskResult, TerminationMarker, ToolChoice,
    ToolDefinition,
};
