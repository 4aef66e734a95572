//! OpenAI-compatible API client
//!
//! Serves OpenAI, Groq and Azure OpenAI, which share the chat completions
//! wire format and differ only by base URL and key.

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::llm::ModelError;

/// Sampling temperature for validation answers
const TEMPERATURE: f32 = 0.0;
/// Completion token ceiling
const MAX_TOKENS: u32 = 2048;

#[derive(Clone)]
pub struct OpenAIClient {
    client: Client,
    label: &'static str,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

impl OpenAIClient {
    pub fn new(
        label: &'static str,
        api_key: &str,
        base_url: String,
        model: String,
    ) -> Result<Self, ModelError> {
        if api_key.is_empty() {
            return Err(ModelError::MissingApiKey(label.to_string()));
        }

        Ok(Self {
            client: Client::new(),
            label,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        })
    }

    fn build_request(&self, prompt: &str) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: Some(prompt.to_string()),
            }],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        }
    }

    pub async fn generate(&self, prompt: &str) -> Result<String, ModelError> {
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("api-key", &self.api_key)
            .json(&self.build_request(prompt))
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ModelError::RateLimited);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ModelError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(format!("Failed to parse response: {}", e)))?;
        extract_text(body)
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

fn extract_text(body: ChatResponse) -> Result<String, ModelError> {
    body.choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|text| !text.is_empty())
        .ok_or(ModelError::EmptyResponse)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> OpenAIClient {
        OpenAIClient::new("openai", "key", "https://api.example.com/v1/".into(), "gpt-4o".into())
            .unwrap()
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        assert_eq!(client().base_url, "https://api.example.com/v1");
    }

    #[test]
    fn test_request_uses_single_user_message() {
        let json = serde_json::to_value(client().build_request("hi")).unwrap();
        assert_eq!(json["model"], "gpt-4o");
        assert_eq!(json["temperature"], 0.0);
        assert_eq!(json["max_tokens"], 2048);
        assert_eq!(json["messages"].as_array().unwrap().len(), 1);
        assert_eq!(json["messages"][0]["content"], "hi");
    }

    #[test]
    fn test_extract_text() {
        let body: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"Hello"}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_text(body).unwrap(), "Hello");
    }

    #[test]
    fn test_extract_text_empty() {
        let body: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(matches!(extract_text(body), Err(ModelError::EmptyResponse)));

        let body: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#,
        )
        .unwrap();
        assert!(matches!(extract_text(body), Err(ModelError::EmptyResponse)));
    }
}
