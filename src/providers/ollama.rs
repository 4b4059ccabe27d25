//! Ollama provider implementation

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::conversation::{Message, Role};

use super::CompletionError;

pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: OllamaMessage,
}

impl OllamaProvider {
    pub fn new(client: Client, base_url: String, model: String) -> Self {
        Self {
            client,
            base_url,
            model,
        }
    }

    fn build_request(&self, history: &[Message], message: &str) -> OllamaRequest {
        let mut messages: Vec<OllamaMessage> = history
            .iter()
            .map(|m| OllamaMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
            })
            .collect();

        messages.push(OllamaMessage {
            role: Role::User.as_str().to_string(),
            content: message.to_string(),
        });

        OllamaRequest {
            model: self.model.clone(),
            messages,
            stream: false,
        }
    }

    pub async fn chat(&self, history: &[Message], message: &str) -> Result<String, CompletionError> {
        let request = self.build_request(history, message);

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::InvalidResponse(format!(
                "{}: {}",
                status, body
            )));
        }

        let body = response.text().await?;
        parse_chat(&body)
    }
}

fn parse_chat(body: &str) -> Result<String, CompletionError> {
    let ollama_response: OllamaResponse = serde_json::from_str(body)
        .map_err(|e| CompletionError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

    let content = ollama_response.message.content;
    if content.trim().is_empty() {
        return Err(CompletionError::InvalidResponse(
            "Message contained no content".to_string(),
        ));
    }

    Ok(content)
}
