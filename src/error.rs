//! Error types for KbAgent

use thiserror::Error;

/// Result type alias using KbAgent's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for KbAgent
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Tool rejected by the effective allow/deny list
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Tool execution error; `retryable` follows the tool's declaration
    #[error("Tool error: {message}")]
    Tool { message: String, retryable: bool },

    /// LLM handle error
    #[error("LLM error: {0}")]
    Llm(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Iteration or token budget exhausted
    #[error("Budget exhausted: {0}")]
    BudgetExhausted(String),

    /// Repeated identical tool calls detected
    #[error("Loop detected: {0}")]
    LoopDetected(String),

    /// No-progress pattern detected and recovery failed
    #[error("Agent stuck: {0}")]
    Stuck(String),

    /// Plan or specialist output failed verification
    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    /// Execution plan could not be created or validated
    #[error("Plan failed: {0}")]
    PlanFailed(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Task aborted via cancellation signal
    #[error("Aborted: {0}")]
    Abort(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Tool { retryable, .. } => *retryable,
            Error::Llm(_) | Error::Timeout(_) | Error::Io(_) => true,
            _ => false,
        }
    }

    /// Check if error is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidInput(_) | Error::PermissionDenied(_) | Error::Config(_)
        )
    }

    /// Short machine-readable code used in tool results and trace events.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::PermissionDenied(_) => "permission_denied",
            Error::Tool { retryable: true, .. } => "tool_error_retryable",
            Error::Tool { retryable: false, .. } => "tool_error_fatal",
            Error::Llm(_) => "llm_error",
            Error::Timeout(_) => "timeout",
            Error::BudgetExhausted(_) => "budget_exhausted",
            Error::LoopDetected(_) => "loop_detected",
            Error::Stuck(_) => "stuck",
            Error::VerificationFailed(_) => "verification_failed",
            Error::PlanFailed(_) => "plan_failed",
            Error::InvalidInput(_) => "invalid_input",
            Error::Io(_) => "io_error",
            Error::Json(_) => "invalid_input",
            Error::Abort(_) => "abort_signal",
            Error::Internal(_) => "internal",
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_follows_tool_declaration() {
        let retryable = Error::Tool {
            message: "transient".into(),
            retryable: true,
        };
        assert!(retryable.is_retryable());

        let fatal = Error::Tool {
            message: "bad path".into(),
            retryable: false,
        };
        assert!(!fatal.is_retryable());
    }

    #[test]
    fn client_errors_are_not_retryable() {
        let err = Error::PermissionDenied("shell:exec".into());
        assert!(err.is_client_error());
        assert!(!err.is_retryable());
        assert_eq!(err.code(), "permission_denied");
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::LoopDetected("x".into()).code(), "loop_detected");
        assert_eq!(Error::Abort("stop".into()).code(), "abort_signal");
        assert_eq!(
            Error::Tool {
                message: "x".into(),
                retryable: true
            }
            .code(),
            "tool_error_retryable"
        );
    }
}
