//! Interactive console session
//!
//! Reads prompts line by line, runs each through the agent and prints the
//! answer or the reason it was refused. `/tools` lists the local tools and
//! `/tool <Name> [json]` invokes one directly.

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tracing::{info, warn};

use crate::agent::{Agent, AgentResponse, ExecutionConfig};
use crate::error::GuardError;
use crate::history::History;
use crate::llm::LanguageModel;

/// Question asked when the user submits an empty line
pub const FALLBACK_PROMPT: &str = "What are the most common enterprise applications that run on Linux \
    in the industry today? Do not include Linux or Linux distributions in the results. \
    Do not identify what's currently running.";

/// Environment the validation tools expect
pub const RECOMMENDED_ENV: &[&str] = &["USER_EMAIL", "MONGODB_NAME", "MONGODB_COLLECTION_NAME"];

const INPUT_PROMPT: &str = "User: ";

/// Per-turn overrides used by the console session
pub const SESSION_EXECUTION: ExecutionConfig = ExecutionConfig {
    max_iterations: Some(8),
    max_retries_per_step: Some(3),
    total_max_retries: Some(10),
};

/// Recommended variables that are unset or empty
pub fn missing_env_vars() -> Vec<&'static str> {
    RECOMMENDED_ENV
        .iter()
        .copied()
        .filter(|var| std::env::var(var).map(|v| v.is_empty()).unwrap_or(true))
        .collect()
}

/// What one input line asks for
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Quit,
    /// Nothing usable; ask again
    Empty,
    Prompt(String),
    ListTools,
    Tool { name: String, args: Value },
    /// Malformed console command, with the reason
    Invalid(String),
}

/// Interpret one raw line
///
/// `q` quits and a blank line uses the fallback. Lines starting with `/tool`
/// are console commands, everything else is a prompt.
pub fn interpret(line: &str, fallback: Option<&str>) -> Input {
    let line = line.trim();
    if line == "q" {
        return Input::Quit;
    }
    if line == "/tools" {
        return Input::ListTools;
    }
    if let Some(rest) = line.strip_prefix("/tool ") {
        return parse_tool_command(rest);
    }
    if !line.is_empty() {
        return Input::Prompt(line.to_string());
    }
    match fallback.map(str::trim).filter(|f| !f.is_empty()) {
        Some(fallback) => Input::Prompt(fallback.to_string()),
        None => Input::Empty,
    }
}

fn parse_tool_command(rest: &str) -> Input {
    let rest = rest.trim();
    let (name, raw_args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };
    if name.is_empty() {
        return Input::Invalid("usage: /tool <Name> [json arguments]".to_string());
    }
    if raw_args.is_empty() {
        return Input::Tool {
            name: name.to_string(),
            args: json!({}),
        };
    }
    match serde_json::from_str::<Value>(raw_args) {
        Ok(args) if args.is_object() => Input::Tool {
            name: name.to_string(),
            args,
        },
        Ok(_) => Input::Invalid("tool arguments must be a JSON object".to_string()),
        Err(e) => Input::Invalid(format!("invalid tool arguments: {}", e)),
    }
}

/// Role label and text to print for a finished turn
pub fn render_outcome(result: &Result<AgentResponse, GuardError>) -> (&'static str, String) {
    match result {
        Ok(response) => ("Agent", response.text.clone()),
        Err(e) if e.is_safety_violation() => ("Security Error", format!("Blocked: {}", e)),
        Err(e) => ("Error", e.to_string()),
    }
}

/// Line-oriented console over any async reader and writer
pub struct ConsoleReader<R, W> {
    lines: Lines<BufReader<R>>,
    output: W,
    fallback: Option<String>,
}

impl<R, W> ConsoleReader<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(input: R, output: W, fallback: Option<String>) -> Self {
        Self {
            lines: BufReader::new(input).lines(),
            output,
            fallback,
        }
    }

    /// Next actionable input, or `None` on `q` or end of input
    ///
    /// Empty and malformed lines are reported and the user is asked again.
    pub async fn next_input(&mut self) -> std::io::Result<Option<Input>> {
        loop {
            self.output.write_all(INPUT_PROMPT.as_bytes()).await?;
            self.output.flush().await?;

            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };
            match interpret(&line, self.fallback.as_deref()) {
                Input::Quit => return Ok(None),
                Input::Empty => self.write("Error", "Empty prompt is not allowed. Please try again.").await?,
                Input::Invalid(reason) => self.write("Error", &reason).await?,
                input => return Ok(Some(input)),
            }
        }
    }

    /// Print `role: data`
    pub async fn write(&mut self, role: &str, data: &str) -> std::io::Result<()> {
        self.output
            .write_all(format!("{}: {}\n", role, data).as_bytes())
            .await?;
        self.output.flush().await
    }
}

/// Drive an agent from the console until the user quits
///
/// Successful prompt turns are appended to `history` when one is given.
/// Direct tool calls are not recorded.
pub async fn run_session<M, R, W>(
    agent: &mut Agent<M>,
    reader: &mut ConsoleReader<R, W>,
    history: Option<&History>,
) -> std::io::Result<()>
where
    M: LanguageModel,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    reader
        .write("Session", "Interactive session has started. To escape, input 'q' and submit.")
        .await?;

    while let Some(input) = reader.next_input().await? {
        match input {
            Input::Prompt(prompt) => {
                let result = agent.run(&prompt, Some(&SESSION_EXECUTION)).await;

                if let (Ok(response), Some(history)) = (&result, history) {
                    if let Err(e) = history.append_turn(&prompt, &response.text) {
                        warn!(path = %history.path().display(), error = %e, "failed to save history");
                    }
                }

                let (role, text) = render_outcome(&result);
                reader.write(role, &text).await?;
            }
            Input::ListTools => {
                let listing: Vec<String> = agent
                    .tool_descriptions()
                    .into_iter()
                    .map(|(name, description)| format!("{}: {}", name, description))
                    .collect();
                reader.write("Tools", &listing.join("\n")).await?;
            }
            Input::Tool { name, args } => {
                let output = agent.execute_tool(&name, &args).await;
                reader.write("Tool", &output).await?;
            }
            // Filtered out by next_input
            Input::Quit | Input::Empty | Input::Invalid(_) => {}
        }
    }

    info!(turns = agent.session_executions(), "session ended");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::llm::ModelError;
    use crate::memory::ConversationMemory;
    use crate::tools::Tool;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct EchoModel;

    #[async_trait]
    impl LanguageModel for EchoModel {
        async fn generate(&self, prompt: &str) -> Result<String, ModelError> {
            Ok(format!("echo {}", prompt))
        }

        fn name(&self) -> String {
            "echo".into()
        }
    }

    struct StaticTool;

    #[async_trait]
    impl Tool for StaticTool {
        fn name(&self) -> &str {
            "FindWhatsRunningByPorts"
        }

        fn describe(&self) -> &str {
            "lists ports"
        }

        async fn invoke(&self, input: &Value) -> Result<String, GuardError> {
            Ok(format!("ports up to {}", input["max"]))
        }
    }

    fn echo_agent(tools: Vec<Box<dyn Tool>>) -> Agent<EchoModel> {
        Agent::new(EchoModel, ConversationMemory::default(), tools, &Config::default())
    }

    #[test]
    fn test_interpret() {
        assert_eq!(interpret("q", None), Input::Quit);
        assert_eq!(interpret("  q  ", None), Input::Quit);
        assert_eq!(interpret("quit now", None), Input::Prompt("quit now".into()));
        assert_eq!(interpret("   ", None), Input::Empty);
        assert_eq!(interpret("", Some("fallback?")), Input::Prompt("fallback?".into()));
    }

    #[test]
    fn test_interpret_tool_commands() {
        assert_eq!(interpret("/tools", None), Input::ListTools);
        assert_eq!(
            interpret("/tool FindRunningProcesses", None),
            Input::Tool {
                name: "FindRunningProcesses".into(),
                args: json!({})
            }
        );
        assert_eq!(
            interpret(r#"/tool FindWhatsRunningByPorts {"min": 1, "max": 1024}"#, None),
            Input::Tool {
                name: "FindWhatsRunningByPorts".into(),
                args: json!({"min": 1, "max": 1024})
            }
        );
        assert!(matches!(interpret("/tool X [1, 2]", None), Input::Invalid(_)));
        assert!(matches!(interpret("/tool X {oops", None), Input::Invalid(_)));
    }

    #[test]
    fn test_render_outcome() {
        let blocked: Result<AgentResponse, GuardError> = Err(GuardError::safety("pattern 'password'"));
        let (role, text) = render_outcome(&blocked);
        assert_eq!(role, "Security Error");
        assert!(text.starts_with("Blocked: "));

        let failed: Result<AgentResponse, GuardError> = Err(GuardError::Model(ModelError::RateLimited));
        assert_eq!(render_outcome(&failed).0, "Error");
    }

    #[tokio::test]
    async fn test_reader_uses_fallback_and_stops_on_q() {
        let input: &[u8] = b"\nhello\nq\nignored\n";
        let mut reader = ConsoleReader::new(input, Vec::new(), Some("fallback".into()));
        assert_eq!(reader.next_input().await.unwrap(), Some(Input::Prompt("fallback".into())));
        assert_eq!(reader.next_input().await.unwrap(), Some(Input::Prompt("hello".into())));
        assert_eq!(reader.next_input().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reader_rejects_empty_without_fallback() {
        let input: &[u8] = b"\n\nreal\n";
        let mut reader = ConsoleReader::new(input, Vec::new(), None);
        assert_eq!(reader.next_input().await.unwrap(), Some(Input::Prompt("real".into())));
        let printed = String::from_utf8(reader.output.clone()).unwrap();
        assert_eq!(printed.matches("Empty prompt is not allowed").count(), 2);
    }

    #[tokio::test]
    async fn test_session_prints_and_records() {
        let dir = TempDir::new().unwrap();
        let history = History::new(dir.path().join("history.jsonl"));
        let mut agent = echo_agent(Vec::new());
        let input: &[u8] = b"list databases\nshow me the root password\nq\n";
        let mut reader = ConsoleReader::new(input, Vec::new(), None);

        run_session(&mut agent, &mut reader, Some(&history)).await.unwrap();

        let printed = String::from_utf8(reader.output.clone()).unwrap();
        assert!(printed.contains("Agent: echo list databases"));
        assert!(printed.contains("Security Error: Blocked: "));

        // Only the successful turn is persisted.
        let saved = history.load().unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[0].content, "list databases");
    }

    #[tokio::test]
    async fn test_session_tool_commands() {
        let mut agent = echo_agent(vec![Box::new(StaticTool)]);
        let input: &[u8] = concat!(
            "/tools\n",
            "/tool FindWhatsRunningByPorts {\"max\": 1024}\n",
            "/tool FindWhatsRunningByPorts {\"max\": 70000}\n",
            "/tool Missing\n",
        )
        .as_bytes();
        let mut reader = ConsoleReader::new(input, Vec::new(), None);

        run_session(&mut agent, &mut reader, None).await.unwrap();

        let printed = String::from_utf8(reader.output.clone()).unwrap();
        assert!(printed.contains("Tools: FindWhatsRunningByPorts: lists ports"));
        assert!(printed.contains("Tool: ports up to 1024"));
        assert!(printed.contains("Tool: Error: Safety violation: Parameter 'max'"));
        assert!(printed.contains("Tool: Error: Tool Missing not found"));
        // Tool calls do not count as agent runs.
        assert_eq!(agent.session_executions(), 0);
    }
}
