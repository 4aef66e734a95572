//! cyberres: guarded LLM console and recovery validation tool server

mod agent;
mod catalog;
mod clients;
mod config;
mod console;
mod envelope;
mod error;
mod executor;
mod gemini;
mod history;
mod llm;
mod mcp;
mod memory;
mod mongo;
mod net;
mod openai;
mod oracle;
mod patterns;
mod prompt_guard;
mod redact;
mod ssh;
mod state;
mod tool_limits;
mod tools;
mod vm;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use agent::Agent;
use config::{Config, TRANSPORT_STDIO};
use console::{ConsoleReader, FALLBACK_PROMPT};
use history::History;
use llm::{LanguageModel, Provider};
use mcp::ToolServer;
use memory::ConversationMemory;
use ssh::OpenSshExecutor;

#[derive(Parser)]
#[command(name = "cyberres", version, about = "Recovery validation agent")]
struct Cli {
    /// Config file (defaults to ~/.config/cyberres/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive guarded chat (default)
    Chat {
        /// Override the configured model provider
        #[arg(long)]
        provider: Option<String>,

        /// Do not load or save conversation history
        #[arg(long)]
        no_history: bool,
    },
    /// Serve validation tools over JSON-RPC (HTTP by default, or stdio)
    Serve {
        /// Override the configured transport ("streamable-http" or "stdio")
        #[arg(long)]
        transport: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the console or the JSON-RPC stream
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_with_path(Some(path))
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::load().context("Failed to load configuration")?,
    };

    match cli.command.unwrap_or(Command::Chat {
        provider: None,
        no_history: false,
    }) {
        Command::Chat { provider, no_history } => {
            let mut config = config;
            if let Some(provider) = provider {
                config.set_provider(&provider);
            }
            config.validate().context("Invalid configuration")?;
            run_chat(&config, no_history).await
        }
        Command::Serve { transport } => {
            let mut config = config;
            if let Some(transport) = transport {
                config.transport = transport;
            }
            config.validate().context("Invalid configuration")?;
            let stdio = config.transport == TRANSPORT_STDIO;
            let server = ToolServer::new(config, Box::new(OpenSshExecutor));
            info!(secrets = ?server.secret_names(), "tool server ready");
            if stdio {
                server.serve_stdio().await.context("Tool server stopped")
            } else {
                Arc::new(server)
                    .serve_http()
                    .await
                    .context("Tool server stopped")
            }
        }
    }
}

async fn run_chat(config: &Config, no_history: bool) -> Result<()> {
    for var in console::missing_env_vars() {
        warn!(variable = var, "recommended environment variable is not set");
    }

    let model = Provider::from_config(config).context("Failed to create model client")?;
    info!(model = %model.name(), "model ready");

    let history = if no_history {
        None
    } else {
        config.history_path().map(History::new)
    };

    let mut memory = ConversationMemory::new(config.max_messages);
    if let Some(history) = &history {
        match history.replay_into(&mut memory) {
            Ok(restored) => info!(restored, path = %history.path().display(), "history loaded"),
            Err(e) => warn!(error = %e, "history not loaded"),
        }
    }

    let mut agent = Agent::new(model, memory, tools::default_tools(config), config);
    info!(tools = ?agent.tool_names(), "agent ready");

    let mut reader = ConsoleReader::new(
        tokio::io::stdin(),
        tokio::io::stdout(),
        Some(FALLBACK_PROMPT.to_string()),
    );
    console::run_session(&mut agent, &mut reader, history.as_ref())
        .await
        .context("Console session failed")
}
