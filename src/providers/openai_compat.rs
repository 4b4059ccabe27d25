//! OpenAI-compatible provider
//!
//! Works with any API that implements the OpenAI chat completions format:
//! - OpenAI (api.openai.com)
//! - Groq (api.groq.com)
//! - vLLM, LM Studio, LocalAI (local servers)
//!
//! # Configuration
//!
//! ```toml
//! [llm]
//! provider = "openai"
//! endpoint = "https://api.openai.com/v1"  # or Groq, vLLM, etc.
//! api_key_env = "OPENAI_API_KEY"
//! model = "gpt-4o-mini"
//! ```

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::conversation::{Message, Role};

use super::CompletionError;

/// OpenAI-compatible chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

impl From<&Message> for ChatMessage {
    fn from(msg: &Message) -> Self {
        Self {
            role: msg.role.as_str().to_string(),
            content: msg.content.clone(),
        }
    }
}

/// Chat completion request
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

/// Chat completion response
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Error response from API
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// OpenAI-compatible API provider
pub struct OpenAICompatProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAICompatProvider {
    pub fn new(client: Client, base_url: String, api_key: Option<String>, model: String) -> Self {
        Self {
            client,
            base_url,
            api_key,
            model,
        }
    }

    pub async fn chat(&self, history: &[Message], message: &str) -> Result<String, CompletionError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut messages: Vec<ChatMessage> = history.iter().map(ChatMessage::from).collect();
        messages.push(ChatMessage {
            role: Role::User.as_str().to_string(),
            content: message.to_string(),
        });

        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: Some(0.7),
        };

        let mut req_builder = self.client.post(&url);

        // Local servers usually run without a key
        if let Some(ref api_key) = self.api_key {
            req_builder = req_builder.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = req_builder.json(&request).send().await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            if let Ok(error_resp) = serde_json::from_str::<ErrorResponse>(&body) {
                return Err(CompletionError::InvalidResponse(format!(
                    "API error: {}",
                    error_resp.error.message
                )));
            }
            return Err(CompletionError::InvalidResponse(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        parse_completion(&body)
    }
}

fn parse_completion(body: &str) -> Result<String, CompletionError> {
    let completion: ChatCompletionResponse = serde_json::from_str(body).map_err(|e| {
        CompletionError::InvalidResponse(format!("Failed to parse response: {} - Body: {}", e, body))
    })?;

    let choice = completion
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| CompletionError::InvalidResponse("No choices in response".to_string()))?;

    match choice.message.content {
        Some(content) if !content.trim().is_empty() => Ok(content),
        _ => Err(CompletionError::InvalidResponse(
            "Choice contained no content".to_string(),
        )),
    }
}
