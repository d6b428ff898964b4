//! Error kinds surfaced by the orchestrator to its presentation layer

use thiserror::Error;

/// Generic text used when no engine-provided message is available
pub const GENERIC_FAILURE: &str = "An unexpected error occurred";

/// Errors raised by orchestration operations.
///
/// None of these are fatal to the session: after any of them the coordinator
/// stays usable and the next user action is accepted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    /// Malformed or missing input. Raised before any remote call.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A referenced scan, plan, run or backup item no longer exists
    #[error("Not found: {0}")]
    NotFound(String),

    /// The external engine reported a failure
    #[error("Remote execution failed: {0}")]
    RemoteExecution(String),

    /// A single poll call failed; the poll loop stops without retrying
    #[error("Polling failed: {0}")]
    TransientPoll(String),

    /// The requested plan transition is not allowed from the current status
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// The session store rejected a write
    #[error("Session persistence failed: {0}")]
    Persistence(String),
}

impl OrchestratorError {
    pub fn validation(message: impl Into<String>) -> Self {
        OrchestratorError::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        OrchestratorError::NotFound(message.into())
    }

    /// Best available text for a user-facing notice
    pub fn user_message(&self) -> String {
        let message = match self {
            OrchestratorError::Validation(m)
            | OrchestratorError::NotFound(m)
            | OrchestratorError::RemoteExecution(m)
            | OrchestratorError::TransientPoll(m)
            | OrchestratorError::InvalidTransition(m)
            | OrchestratorError::Persistence(m) => m.trim(),
        };
        if message.is_empty() {
            GENERIC_FAILURE.to_string()
        } else {
            message.to_string()
        }
    }

    /// Whether retrying the same call could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrchestratorError::RemoteExecution(_)
                | OrchestratorError::TransientPoll(_)
                | OrchestratorError::Persistence(_)
        )
    }
}
