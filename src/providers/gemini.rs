//! Google Gemini provider (`generateContent`)
//!
//! The history is replayed as alternating `user` / `model` contents followed by
//! the new user message; the reply is the text of the first candidate.

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::conversation::{Message, Role};

use super::CompletionError;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

fn gemini_role(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "model",
    }
}

fn text_content(role: Role, text: &str) -> Content {
    Content {
        role: Some(gemini_role(role).to_string()),
        parts: vec![Part {
            text: Some(text.to_string()),
        }],
    }
}

impl GeminiProvider {
    pub fn new(client: Client, base_url: String, api_key: String, model: String) -> Self {
        Self {
            client,
            base_url,
            api_key,
            model,
        }
    }

    pub async fn chat(&self, history: &[Message], message: &str) -> Result<String, CompletionError> {
        let request = build_request(history, message);
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await?;

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

        parse_response(&body)
    }
}

fn build_request(history: &[Message], message: &str) -> GenerateRequest {
    let mut contents: Vec<Content> = history
        .iter()
        .map(|m| text_content(m.role, &m.content))
        .collect();
    contents.push(text_content(Role::User, message));

    GenerateRequest { contents }
}

fn parse_response(body: &str) -> Result<String, CompletionError> {
    let response: GenerateResponse = serde_json::from_str(body)
        .map_err(|e| CompletionError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

    let content = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .ok_or_else(|| CompletionError::InvalidResponse("No candidates in response".to_string()))?;

    let text: String = content.parts.into_iter().filter_map(|p| p.text).collect();
    if text.is_empty() {
        return Err(CompletionError::InvalidResponse(
            "Candidate contained no text".to_string(),
        ));
    }

    Ok(text)
}
