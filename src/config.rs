//! Configuration management
//!
//! Handles loading configuration from files and environment variables. The
//! resulting `Config` is built once at startup and passed to constructors.

use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

/// Newline-delimited JSON-RPC on stdin/stdout
pub const TRANSPORT_STDIO: &str = "stdio";
/// JSON-RPC over HTTP POST
pub const TRANSPORT_HTTP: &str = "streamable-http";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found")]
    NotFound,

    /// Invalid config value
    #[error("Invalid config value: {0}")]
    InvalidValue(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

/// Application configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Config {
    /// Model provider: openai, groq, azure, ollama or gemini
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Model name (empty selects the provider's default)
    #[serde(default)]
    pub model: String,

    /// API key for hosted providers
    #[serde(default)]
    pub api_key: String,

    /// Base URL override for OpenAI-compatible providers
    #[serde(default)]
    pub base_url: Option<String>,

    /// Ollama server address
    #[serde(default = "default_ollama_host")]
    pub ollama_host: String,

    /// Maximum messages kept in conversation memory
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,

    /// Maximum agent runs per session
    #[serde(default = "default_max_executions")]
    pub max_executions_per_session: usize,

    /// Iteration ceiling (stored, single-call agent does not loop)
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Attempts per tool invocation
    #[serde(default = "default_max_retries_per_step")]
    pub max_retries_per_step: usize,

    /// Attempts across a whole session
    #[serde(default = "default_total_max_retries")]
    pub total_max_retries: usize,

    /// Time ceiling for guarded local commands
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Maximum output bytes to capture
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    /// Maximum output lines to capture
    #[serde(default = "default_max_output_lines")]
    pub max_output_lines: usize,

    /// Tool server bind host (reported in serverInfo)
    #[serde(default = "default_server_host")]
    pub server_host: String,

    /// Tool server port (reported in serverInfo)
    #[serde(default = "default_server_port")]
    pub server_port: u16,

    /// Tool server transport: "streamable-http" or "stdio"
    #[serde(default = "default_transport")]
    pub transport: String,

    /// Directory holding the acceptance profile JSON files
    #[serde(default = "default_resource_dir")]
    pub resource_dir: PathBuf,

    /// Directory holding the planner/evaluator/summarizer prompts
    #[serde(default = "default_prompt_dir")]
    pub prompt_dir: PathBuf,

    /// JSON file holding infrastructure credentials
    #[serde(default = "default_secrets_file")]
    pub secrets_file: PathBuf,

    /// Oracle home on remote hosts
    #[serde(default = "default_oracle_home")]
    pub oracle_home: String,

    /// listener.ora path on remote hosts (empty derives from oracle_home)
    #[serde(default)]
    pub oracle_listener_ora: String,

    /// tnsnames.ora path on remote hosts (empty derives from oracle_home)
    #[serde(default)]
    pub oracle_tnsnames_ora: String,

    /// Local MongoDB shell; the script arrives on stdin
    #[serde(default = "default_mongosh_command")]
    pub mongosh_command: String,

    /// Local SQL*Plus invocation; the connect line and query arrive on stdin
    #[serde(default = "default_sqlplus_command")]
    pub sqlplus_command: String,

    /// Connect/exec timeout for SSH checks
    #[serde(default = "default_ssh_timeout")]
    pub ssh_timeout_secs: u64,

    /// Recipient for the SendEmail tool
    #[serde(default)]
    pub user_email: Option<String>,

    /// Conversation history file (None uses the data directory)
    #[serde(default)]
    pub history_file: Option<PathBuf>,
}

fn default_provider() -> String {
    "ollama".to_string()
}

fn default_ollama_host() -> String {
    "http://localhost:11434".to_string()
}

fn default_max_messages() -> usize {
    100
}

fn default_max_executions() -> usize {
    50
}

fn default_max_iterations() -> usize {
    10
}

fn default_max_retries_per_step() -> usize {
    3
}

fn default_total_max_retries() -> usize {
    10
}

fn default_command_timeout() -> u64 {
    30
}

fn default_max_output_bytes() -> usize {
    50 * 1024 // 50KB
}

fn default_max_output_lines() -> usize {
    500
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    8000
}

fn default_transport() -> String {
    TRANSPORT_HTTP.to_string()
}

fn default_resource_dir() -> PathBuf {
    PathBuf::from("resources/acceptance")
}

fn default_prompt_dir() -> PathBuf {
    PathBuf::from("prompts")
}

fn default_secrets_file() -> PathBuf {
    PathBuf::from("secrets.json")
}

fn default_oracle_home() -> String {
    "/u01/app/oracle/product/19c/dbhome_1".to_string()
}

fn default_mongosh_command() -> String {
    "mongosh --nodb --quiet".to_string()
}

fn default_sqlplus_command() -> String {
    "sqlplus -S -L /nolog".to_string()
}

fn default_ssh_timeout() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: String::new(),
            api_key: String::new(),
            base_url: None,
            ollama_host: default_ollama_host(),
            max_messages: default_max_messages(),
            max_executions_per_session: default_max_executions(),
            max_iterations: default_max_iterations(),
            max_retries_per_step: default_max_retries_per_step(),
            total_max_retries: default_total_max_retries(),
            command_timeout_secs: default_command_timeout(),
            max_output_bytes: default_max_output_bytes(),
            max_output_lines: default_max_output_lines(),
            server_host: default_server_host(),
            server_port: default_server_port(),
            transport: default_transport(),
            resource_dir: default_resource_dir(),
            prompt_dir: default_prompt_dir(),
            secrets_file: default_secrets_file(),
            oracle_home: default_oracle_home(),
            oracle_listener_ora: String::new(),
            oracle_tnsnames_ora: String::new(),
            mongosh_command: default_mongosh_command(),
            sqlplus_command: default_sqlplus_command(),
            ssh_timeout_secs: default_ssh_timeout(),
            user_email: None,
            history_file: None,
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables
    ///
    /// Precedence (highest to lowest):
    /// 1. Environment variables (LLM_BACKEND, CYBERRES_MODEL, etc.)
    /// 2. Config file (~/.config/cyberres/config.toml)
    /// 3. Default values
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::load_from_file() {
            Ok(config) => config,
            Err(ConfigError::NotFound) => Self::default(),
            Err(e) => return Err(e),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration with a custom config path
    pub fn load_with_path(config_path: Option<&PathBuf>) -> Result<Self, ConfigError> {
        let mut config = match config_path {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(path)?;
                toml::from_str(&content)?
            }
            Some(_) => return Err(ConfigError::NotFound),
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from the config file
    fn load_from_file() -> Result<Self, ConfigError> {
        let config_path = Self::config_path()?;
        if !config_path.exists() {
            return Err(ConfigError::NotFound);
        }
        let content = std::fs::read_to_string(&config_path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Get the config file path
    fn config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NotFound)?;
        Ok(config_dir.join("cyberres").join("config.toml"))
    }

    /// Resolved conversation history path
    pub fn history_path(&self) -> Option<PathBuf> {
        self.history_file
            .clone()
            .or_else(|| dirs::data_dir().map(|d| d.join("cyberres").join("history.jsonl")))
    }

    /// listener.ora path, derived from the Oracle home unless overridden
    pub fn listener_ora(&self) -> String {
        if self.oracle_listener_ora.is_empty() {
            format!("{}/network/admin/listener.ora", self.oracle_home)
        } else {
            self.oracle_listener_ora.replace("{oracle_home}", &self.oracle_home)
        }
    }

    /// tnsnames.ora path, derived from the Oracle home unless overridden
    pub fn tnsnames_ora(&self) -> String {
        if self.oracle_tnsnames_ora.is_empty() {
            format!("{}/network/admin/tnsnames.ora", self.oracle_home)
        } else {
            self.oracle_tnsnames_ora.replace("{oracle_home}", &self.oracle_home)
        }
    }

    /// Reject values no component can work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_messages == 0 {
            return Err(ConfigError::InvalidValue("max_messages must be at least 1".into()));
        }
        if self.max_retries_per_step == 0 {
            return Err(ConfigError::InvalidValue(
                "max_retries_per_step must be at least 1".into(),
            ));
        }
        if self.command_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "command_timeout_secs must be at least 1".into(),
            ));
        }
        if self.transport != TRANSPORT_STDIO && self.transport != TRANSPORT_HTTP {
            return Err(ConfigError::InvalidValue(format!(
                "transport must be \"{}\" or \"{}\", got \"{}\"",
                TRANSPORT_HTTP, TRANSPORT_STDIO, self.transport
            )));
        }
        Ok(())
    }

    /// Switch provider, re-reading that provider's key and model variables
    ///
    /// A model chosen for the previous provider is dropped so the new
    /// provider's default applies.
    pub fn set_provider(&mut self, provider: &str) {
        let provider = provider.to_lowercase();
        if provider != self.provider {
            self.model.clear();
        }
        self.provider = provider;
        self.apply_provider_env();
    }

    /// Provider-specific keys, applied once the provider is settled
    fn apply_provider_env(&mut self) {
        let (key_var, model_var) = match self.provider.as_str() {
            "openai" => ("OPENAI_API_KEY", "OPENAI_MODEL"),
            "groq" => ("GROQ_API_KEY", "GROQ_MODEL"),
            "azure" => ("AZURE_OPENAI_API_KEY", "OPENAI_MODEL"),
            "gemini" => ("GEMINI_API_KEY", "GEMINI_MODEL"),
            _ => ("CYBERRES_API_KEY", "OLLAMA_MODEL"),
        };
        if let Ok(api_key) = std::env::var(key_var) {
            self.api_key = api_key;
        }
        if let Ok(model) = std::env::var(model_var) {
            self.model = model;
        }
        if let Ok(api_key) = std::env::var("CYBERRES_API_KEY") {
            self.api_key = api_key;
        }
        if self.provider == "azure" {
            if let Ok(endpoint) = std::env::var("AZURE_OPENAI_ENDPOINT") {
                self.base_url = Some(endpoint);
            }
        }
        if let Ok(host) = std::env::var("OLLAMA_HOST") {
            self.ollama_host = host;
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(provider) = std::env::var("LLM_BACKEND") {
            self.provider = provider.to_lowercase();
        }
        if let Ok(model) = std::env::var("CYBERRES_MODEL") {
            self.model = model;
        }
        self.apply_provider_env();

        if let Ok(host) = std::env::var("MCP_HOST") {
            self.server_host = host;
        }
        if let Ok(port) = std::env::var("MCP_PORT") {
            if let Ok(val) = port.parse() {
                self.server_port = val;
            }
        }
        if let Ok(transport) = std::env::var("MCP_TRANSPORT") {
            self.transport = transport;
        }
        if let Ok(dir) = std::env::var("MCP_RESOURCE_DIR") {
            self.resource_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("MCP_PROMPT_DIR") {
            self.prompt_dir = PathBuf::from(dir);
        }
        if let Ok(path) = std::env::var("SECRETS_FILE") {
            self.secrets_file = PathBuf::from(path);
        }
        if let Ok(home) = std::env::var("ORACLE_HOME") {
            self.oracle_home = home;
        }
        if let Ok(path) = std::env::var("ORACLE_LISTENER_ORA") {
            self.oracle_listener_ora = path;
        }
        if let Ok(path) = std::env::var("ORACLE_TNSNAMES_ORA") {
            self.oracle_tnsnames_ora = path;
        }
        if let Ok(email) = std::env::var("USER_EMAIL") {
            self.user_email = Some(email);
        }
        if let Ok(max) = std::env::var("CYBERRES_MAX_MESSAGES") {
            if let Ok(val) = max.parse() {
                self.max_messages = val;
            }
        }
        if let Ok(max) = std::env::var("CYBERRES_MAX_EXECUTIONS") {
            if let Ok(val) = max.parse() {
                self.max_executions_per_session = val;
            }
        }
    }
}
