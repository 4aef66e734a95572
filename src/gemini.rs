//! Gemini API integration
//!
//! Sends a single prompt to the Gemini `generateContent` endpoint.

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::llm::ModelError;

/// Gemini API request format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiRequest {
    /// Conversation contents
    pub contents: Vec<GeminiContent>,
    /// Sampling settings
    #[serde(rename = "generationConfig")]
    pub generation_config: GenerationConfig,
}

/// Gemini content block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeminiContent {
    /// Role: "user" or "model"
    #[serde(default)]
    pub role: String,
    /// Parts of the content
    #[serde(default)]
    pub parts: Vec<GeminiPart>,
}

/// Gemini content part
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeminiPart {
    /// Text content
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    pub max_output_tokens: u32,
}

/// Gemini API response format
#[derive(Debug, Clone, Deserialize)]
pub struct GeminiResponse {
    /// Response candidates
    #[serde(default)]
    pub candidates: Vec<GeminiCandidate>,
}

/// Gemini response candidate
#[derive(Debug, Clone, Deserialize)]
pub struct GeminiCandidate {
    /// Content of the response
    pub content: GeminiContent,
}

/// Client for interacting with the Gemini API
#[derive(Clone)]
pub struct GeminiClient {
    /// HTTP client for making requests
    client: Client,
    /// API key for authentication
    api_key: String,
    /// Model name to use
    model: String,
}

impl GeminiClient {
    /// Create a new GeminiClient
    pub fn new(api_key: &str, model: String) -> Result<Self, ModelError> {
        if api_key.is_empty() {
            return Err(ModelError::MissingApiKey("gemini".to_string()));
        }

        Ok(Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            model,
        })
    }

    /// Send a prompt to the Gemini API and get the completion text
    pub async fn generate(&self, prompt: &str) -> Result<String, ModelError> {
        let request = build_request(prompt);

        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
            self.model
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ModelError::RateLimited);
        }

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ModelError::ApiError {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            ModelError::InvalidResponse(format!("Failed to parse response: {}", e))
        })?;

        extract_text(&gemini_response)
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Build a single-turn Gemini request
fn build_request(prompt: &str) -> GeminiRequest {
    GeminiRequest {
        contents: vec![GeminiContent {
            role: "user".to_string(),
            parts: vec![GeminiPart {
                text: prompt.to_string(),
            }],
        }],
        generation_config: GenerationConfig {
            temperature: 0.0,
            max_output_tokens: 2048,
        },
    }
}

/// Extract text content from Gemini API response
fn extract_text(response: &GeminiResponse) -> Result<String, ModelError> {
    let candidate = response
        .candidates
        .first()
        .ok_or(ModelError::EmptyResponse)?;

    let text = candidate
        .content
        .parts
        .iter()
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join("");

    if text.is_empty() {
        return Err(ModelError::EmptyResponse);
    }

    Ok(text)
}
