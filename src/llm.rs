//! Language model providers
//!
//! A provider is chosen once from configuration; every variant exposes the
//! same `generate(prompt) -> completion` contract.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::Config;
use crate::gemini::GeminiClient;
use crate::openai::OpenAIClient;

/// Errors that can occur while talking to a model provider
#[derive(Debug, Error)]
pub enum ModelError {
    /// Network or HTTP error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// API returned an error response
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    /// Rate limit exceeded
    #[error("Rate limit exceeded. Please wait and try again.")]
    RateLimited,

    /// Invalid response format
    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    /// Missing API key
    #[error("Missing API key for provider {0}")]
    MissingApiKey(String),

    /// Provider name or settings not usable
    #[error("Provider configuration error: {0}")]
    Configuration(String),

    /// Empty response from API
    #[error("Empty response from API")]
    EmptyResponse,
}

/// Anything that turns a prompt into a completion
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Send one prompt and return the completion text
    async fn generate(&self, prompt: &str) -> Result<String, ModelError>;

    /// Short label for logs
    fn name(&self) -> String;
}

/// Provider selected from configuration
#[derive(Clone)]
pub enum Provider {
    /// OpenAI-compatible chat completions (OpenAI, Groq, Azure)
    OpenAi(OpenAIClient),
    /// Local Ollama server
    Ollama(OllamaClient),
    /// Google Gemini
    Gemini(GeminiClient),
}

impl Provider {
    /// Build the provider named by `config.provider`
    pub fn from_config(config: &Config) -> Result<Self, ModelError> {
        let model = |default: &str| {
            if config.model.is_empty() {
                default.to_string()
            } else {
                config.model.clone()
            }
        };

        match config.provider.as_str() {
            "openai" => Ok(Self::OpenAi(OpenAIClient::new(
                "openai",
                &config.api_key,
                config
                    .base_url
                    .clone()
                    .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
                model("gpt-4o"),
            )?)),
            "groq" => Ok(Self::OpenAi(OpenAIClient::new(
                "groq",
                &config.api_key,
                "https://api.groq.com/openai/v1".to_string(),
                model("llama-3.1-70b-versatile"),
            )?)),
            "azure" => {
                let base_url = config.base_url.clone().ok_or_else(|| {
                    ModelError::Configuration("azure requires AZURE_OPENAI_ENDPOINT".into())
                })?;
                Ok(Self::OpenAi(OpenAIClient::new(
                    "azure",
                    &config.api_key,
                    base_url,
                    model("gpt-4o-mini"),
                )?))
            }
            "ollama" => Ok(Self::Ollama(OllamaClient::new(
                config.ollama_host.clone(),
                model("llama3.1:8b"),
            ))),
            "gemini" => Ok(Self::Gemini(GeminiClient::new(
                &config.api_key,
                model("gemini-2.5-flash"),
            )?)),
            other => Err(ModelError::Configuration(format!(
                "provider '{}' not supported",
                other
            ))),
        }
    }
}

#[async_trait]
impl LanguageModel for Provider {
    async fn generate(&self, prompt: &str) -> Result<String, ModelError> {
        debug!(provider = %self.name(), prompt_chars = prompt.chars().count(), "generating");
        match self {
            Self::OpenAi(client) => client.generate(prompt).await,
            Self::Ollama(client) => client.generate(prompt).await,
            Self::Gemini(client) => client.generate(prompt).await,
        }
    }

    fn name(&self) -> String {
        match self {
            Self::OpenAi(client) => format!("{}:{}", client.label(), client.model()),
            Self::Ollama(client) => format!("ollama:{}", client.model),
            Self::Gemini(client) => format!("gemini:{}", client.model()),
        }
    }
}

/// Client for a local Ollama server
#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    host: String,
    model: String,
}

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage>,
    stream: bool,
}

#[derive(Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: Option<OllamaMessage>,
}

impl OllamaClient {
    pub fn new(host: String, model: String) -> Self {
        Self {
            client: Client::new(),
            host: host.trim_end_matches('/').to_string(),
            model,
        }
    }

    fn build_request<'a>(&'a self, prompt: &str) -> OllamaChatRequest<'a> {
        OllamaChatRequest {
            model: &self.model,
            messages: vec![OllamaMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            stream: false,
        }
    }

    pub async fn generate(&self, prompt: &str) -> Result<String, ModelError> {
        let url = format!("{}/api/chat", self.host);
        let response = self
            .client
            .post(&url)
            .json(&self.build_request(prompt))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(ModelError::ApiError { status, message });
        }

        let body: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(format!("Failed to parse response: {}", e)))?;
        body.message
            .map(|m| m.content)
            .filter(|c| !c.is_empty())
            .ok_or(ModelError::EmptyResponse)
    }
}
