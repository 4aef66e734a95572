//! Error taxonomy
//!
//! Guardrail rejections, caller input errors, remote transport failures and
//! parse failures. Call sites choose whether to propagate a `GuardError` or
//! convert it into a user-visible string.

use std::time::Duration;

use thiserror::Error;

use crate::llm::ModelError;

/// Errors raised by the guardrails, the agent loop and remote operations
#[derive(Debug, Error)]
pub enum GuardError {
    /// A guardrail rejected a prompt, command or tool parameter
    #[error("Safety violation: {0}")]
    SafetyViolation(String),

    /// A guarded command exceeded its time ceiling
    #[error("Command timed out after {after:?}: {command}")]
    Timeout { command: String, after: Duration },

    /// Content exceeds a fixed character ceiling
    #[error("{what} exceeds maximum length of {max} characters")]
    LengthViolation { what: &'static str, max: usize },

    /// A model answer too long to keep in memory
    #[error("Model response exceeds maximum length of {max} characters")]
    ResponseTooLong { max: usize },

    /// The session already used up its execution budget
    #[error("Maximum executions per session ({0}) exceeded")]
    SessionLimit(usize),

    /// Structurally invalid input supplied by the caller
    #[error("Invalid input: {0}")]
    Input(String),

    /// Remote execution or connection failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Expected structured output was not found
    #[error("Parse error: {0}")]
    Parse(String),

    /// A guarded command ran but exited non-zero
    #[error("Command failed with exit code {exit_code}: {stderr}")]
    CommandFailed { exit_code: i32, stderr: String },

    /// The language model call failed
    #[error(transparent)]
    Model(#[from] ModelError),
}

impl GuardError {
    /// Build a safety violation from anything displayable
    pub fn safety(reason: impl Into<String>) -> Self {
        Self::SafetyViolation(reason.into())
    }

    /// Whether this error came from a guardrail rejection
    ///
    /// Timeouts, input length ceilings and the session ceiling count as
    /// policy rejections alongside pattern matches. An over-long model answer
    /// does not.
    pub fn is_safety_violation(&self) -> bool {
        matches!(
            self,
            Self::SafetyViolation(_)
                | Self::Timeout { .. }
                | Self::LengthViolation { .. }
                | Self::SessionLimit(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safety_display() {
        let err = GuardError::safety("disallowed command: rm");
        assert_eq!(err.to_string(), "Safety violation: disallowed command: rm");
        assert!(err.is_safety_violation());
    }

    #[test]
    fn test_transport_is_not_safety() {
        assert!(!GuardError::Transport("connection refused".into()).is_safety_violation());
        assert!(!GuardError::Parse("no json".into()).is_safety_violation());
        assert!(
            !GuardError::CommandFailed {
                exit_code: 1,
                stderr: "boom".into()
            }
            .is_safety_violation()
        );
    }

    #[test]
    fn test_timeout_display_keeps_subsecond_ceiling() {
        let err = GuardError::Timeout {
            command: "sleep 5".into(),
            after: Duration::from_millis(200),
        };
        assert_eq!(err.to_string(), "Command timed out after 200ms: sleep 5");
        assert!(err.is_safety_violation());
    }

    #[test]
    fn test_long_response_is_not_safety() {
        let err = GuardError::ResponseTooLong { max: 10_000 };
        assert!(err.to_string().contains("10000"));
        assert!(!err.is_safety_violation());
    }

    #[test]
    fn test_length_violation_display() {
        let err = GuardError::LengthViolation {
            what: "Prompt",
            max: 5000,
        };
        assert!(err.to_string().contains("5000"));
        assert!(err.is_safety_violation());
    }
}
