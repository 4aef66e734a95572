//! Agent loop
//!
//! One `run` is one guarded turn: record the prompt, check it, ask the model
//! once, sanitize the answer and record it. Tools are invoked separately
//! through `execute_tool`, which reports failures as strings instead of
//! raising them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::GuardError;
use crate::llm::LanguageModel;
use crate::memory::{ConversationMemory, MessageRole};
use crate::prompt_guard::{sanitize_response, validate_prompt};
use crate::state::{AgentState, StateEvent, TransitionResult, transition};
use crate::tool_limits::ToolLimits;
use crate::tools::Tool;

/// Maximum prompt length accepted by `run`
pub const MAX_PROMPT_CHARS: usize = 5000;

/// Per-run overrides for the agent's ceilings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionConfig {
    pub max_iterations: Option<usize>,
    pub max_retries_per_step: Option<usize>,
    pub total_max_retries: Option<usize>,
}

/// Result of one agent turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentResponse {
    /// Sanitized model answer
    pub text: String,
    /// Tools invoked during the turn
    pub tools_used: Vec<String>,
    /// Model calls made during the turn
    pub iterations: usize,
}

pub struct Agent<M: LanguageModel> {
    model: M,
    memory: ConversationMemory,
    tools: HashMap<String, Box<dyn Tool>>,
    limits: ToolLimits,
    state: AgentState,

    max_iterations: usize,
    max_retries_per_step: usize,
    total_max_retries: usize,
    max_executions_per_session: usize,

    session_executions: usize,
    total_retries: usize,
}

impl<M: LanguageModel> Agent<M> {
    /// Create an agent with the default tool limit table
    pub fn new(model: M, memory: ConversationMemory, tools: Vec<Box<dyn Tool>>, config: &Config) -> Self {
        let tools = tools
            .into_iter()
            .map(|tool| (tool.name().to_string(), tool))
            .collect();

        Self {
            model,
            memory,
            tools,
            limits: ToolLimits::with_defaults(),
            state: AgentState::default(),
            max_iterations: config.max_iterations,
            max_retries_per_step: config.max_retries_per_step,
            total_max_retries: config.total_max_retries,
            max_executions_per_session: config.max_executions_per_session,
            session_executions: 0,
            total_retries: 0,
        }
    }

    /// Replace the tool limit table
    pub fn with_limits(mut self, limits: ToolLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Run one guarded turn
    ///
    /// The session ceiling and the prompt length are checked before memory is
    /// touched. Any later failure is recorded as a system message and
    /// returned to the caller.
    pub async fn run(
        &mut self,
        prompt: &str,
        execution: Option<&ExecutionConfig>,
    ) -> Result<AgentResponse, GuardError> {
        self.session_executions += 1;
        if self.session_executions > self.max_executions_per_session {
            warn!(
                executions = self.session_executions,
                max = self.max_executions_per_session,
                "session execution ceiling exceeded"
            );
            self.advance(StateEvent::SessionExhausted);
            return Err(GuardError::SessionLimit(self.max_executions_per_session));
        }

        if let Some(execution) = execution {
            self.apply(execution);
        }

        if prompt.chars().count() > MAX_PROMPT_CHARS {
            return Err(GuardError::LengthViolation {
                what: "Prompt",
                max: MAX_PROMPT_CHARS,
            });
        }

        match self.turn(prompt).await {
            Ok(response) => Ok(response),
            Err(e) => {
                if e.is_safety_violation() {
                    warn!(error = %e, "turn blocked by guardrail");
                } else {
                    warn!(error = %e, "turn failed");
                }
                if let Err(record_err) = self
                    .memory
                    .add_message(MessageRole::System, format!("Error: {}", e))
                {
                    debug!(error = %record_err, "could not record failure");
                }
                self.advance(StateEvent::TurnFailed);
                Err(e)
            }
        }
    }

    async fn turn(&mut self, prompt: &str) -> Result<AgentResponse, GuardError> {
        self.advance(StateEvent::PromptAccepted);
        self.memory.add_message(MessageRole::User, prompt)?;
        validate_prompt(prompt)?;

        debug!(
            model = %self.model.name(),
            context = self.memory.get_context().len(),
            "calling model"
        );
        let raw = self.model.generate(prompt).await?;
        self.advance(StateEvent::ModelResponded);

        let text = sanitize_response(&raw);
        self.memory
            .add_message(MessageRole::Assistant, text.clone())
            .map_err(|e| match e {
                GuardError::LengthViolation { max, .. } => GuardError::ResponseTooLong { max },
                other => other,
            })?;
        self.advance(StateEvent::ResponseRecorded);

        info!(execution = self.session_executions, chars = text.len(), "turn complete");
        Ok(AgentResponse {
            text,
            tools_used: Vec::new(),
            iterations: 1,
        })
    }

    /// Invoke a registered tool with retries
    ///
    /// Never fails: unknown tools, parameter violations and persistent
    /// handler failures all come back as descriptive strings.
    pub async fn execute_tool(&mut self, name: &str, input: &Value) -> String {
        let Some(tool) = self.tools.get(name) else {
            return format!("Error: Tool {} not found", name);
        };

        if let Err(e) = self.limits.validate_tool_usage(name, input) {
            return format!("Error: {}", e);
        }

        let mut last_error = None;
        for attempt in 1..=self.max_retries_per_step {
            if self.total_retries >= self.total_max_retries {
                warn!(tool = name, total = self.total_retries, "retry budget exhausted");
                return format!(
                    "Error executing tool {}: total retry budget of {} exhausted",
                    name, self.total_max_retries
                );
            }
            match tool.invoke(input).await {
                Ok(output) => return output,
                Err(e) => {
                    self.total_retries += 1;
                    warn!(tool = name, attempt, error = %e, "tool attempt failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => format!("Error executing tool {}: {}", name, e),
            None => format!(
                "Failed to execute tool {} after {} retries",
                name, self.max_retries_per_step
            ),
        }
    }

    fn apply(&mut self, execution: &ExecutionConfig) {
        if let Some(n) = execution.max_iterations {
            self.max_iterations = n;
        }
        if let Some(n) = execution.max_retries_per_step {
            self.max_retries_per_step = n;
        }
        if let Some(n) = execution.total_max_retries {
            self.total_max_retries = n;
        }
    }

    fn advance(&mut self, event: StateEvent) {
        match transition(self.state, event) {
            TransitionResult::Success(next) => {
                debug!(from = self.state.display_name(), to = next.display_name(), "agent state");
                self.state = next;
            }
            TransitionResult::Error(e) => debug!(error = %e, "state unchanged"),
        }
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    /// Stored iteration ceiling; a turn currently makes a single model call
    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn session_executions(&self) -> usize {
        self.session_executions
    }

    /// Registered tool names, sorted
    pub fn tool_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// `(name, description)` per registered tool, sorted by name
    pub fn tool_descriptions(&self) -> Vec<(&str, &str)> {
        self.tool_names()
            .into_iter()
            .filter_map(|name| self.tools.get(name).map(|tool| (name, tool.describe())))
            .collect()
    }
}
