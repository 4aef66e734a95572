//! Agent turn state machine
//!
//! Defines the AgentState enum and state transition logic.
//! All transition functions are pure (no IO) for testability.

/// States of one agent session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AgentState {
    /// Waiting for the next prompt
    #[default]
    Idle,

    /// Prompt accepted, model call in flight
    AwaitingModel,

    /// Model answered, response being sanitized and stored
    Validating,

    /// Session execution ceiling exceeded (terminal)
    Blocked,
}

impl AgentState {
    /// Returns all possible states (useful for testing)
    pub fn all_states() -> &'static [AgentState] {
        &[
            AgentState::Idle,
            AgentState::AwaitingModel,
            AgentState::Validating,
            AgentState::Blocked,
        ]
    }

    /// Whether the session can accept no further turns
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentState::Blocked)
    }

    /// Get display name for logs
    pub fn display_name(&self) -> &'static str {
        match self {
            AgentState::Idle => "idle",
            AgentState::AwaitingModel => "awaiting-model",
            AgentState::Validating => "validating",
            AgentState::Blocked => "blocked",
        }
    }
}

/// Result of a state transition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition succeeded to new state
    Success(AgentState),
    /// Transition failed with error
    Error(String),
}

/// Events that can trigger state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEvent {
    /// Prompt passed the pre-call checks
    PromptAccepted,
    /// The model returned a completion
    ModelResponded,
    /// Response sanitized and recorded
    ResponseRecorded,
    /// A guardrail or model failure ended the turn
    TurnFailed,
    /// The session execution ceiling was exceeded
    SessionExhausted,
}

/// Pure state transition function
///
/// Given the current state and an event, returns the result of the transition.
/// This function has no side effects and is fully testable.
pub fn transition(current: AgentState, event: StateEvent) -> TransitionResult {
    match (current, event) {
        (AgentState::Blocked, _) => {
            TransitionResult::Error("Session is blocked; no further turns allowed".to_string())
        }
        (_, StateEvent::SessionExhausted) => TransitionResult::Success(AgentState::Blocked),

        (AgentState::Idle, StateEvent::PromptAccepted) => {
            TransitionResult::Success(AgentState::AwaitingModel)
        }
        (AgentState::AwaitingModel, StateEvent::ModelResponded) => {
            TransitionResult::Success(AgentState::Validating)
        }
        (AgentState::Validating, StateEvent::ResponseRecorded) => {
            TransitionResult::Success(AgentState::Idle)
        }
        (AgentState::Idle | AgentState::AwaitingModel | AgentState::Validating, StateEvent::TurnFailed) => {
            TransitionResult::Success(AgentState::Idle)
        }

        // Invalid transitions
        (state, event) => TransitionResult::Error(format!(
            "Invalid transition: {:?} with event {:?}",
            state, event
        )),
    }
}
