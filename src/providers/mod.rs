//! Completion service back ends
//!
//! The conversation core only needs one thing from a generative-language
//! service: given the conversation so far and a new user message, produce reply
//! text or fail. [`CompletionService`] is that seam; [`Provider`] picks a
//! concrete back end from configuration.

mod gemini;
mod ollama;
mod openai_compat;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;

use crate::config::LlmConfig;
use crate::conversation::Message;

pub use gemini::GeminiProvider;
pub use ollama::OllamaProvider;
pub use openai_compat::OpenAICompatProvider;

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Completion task failed: {0}")]
    TaskFailed(String),
}

/// A remote service that turns a conversation into the next assistant reply
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, history: &[Message], message: &str) -> Result<String, CompletionError>;
}

pub enum Provider {
    Gemini(GeminiProvider),
    Ollama(OllamaProvider),
    OpenAICompat(OpenAICompatProvider),
}

impl Provider {
    pub fn from_config(llm: &LlmConfig) -> Result<Self, CompletionError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(llm.timeout_secs))
            .build()?;

        match llm.provider.to_lowercase().as_str() {
            "gemini" => {
                let api_key = llm
                    .api_key
                    .clone()
                    .ok_or_else(|| CompletionError::NotConfigured("gemini api key".into()))?;
                let base_url = llm
                    .endpoint
                    .clone()
                    .unwrap_or_else(|| gemini::DEFAULT_BASE_URL.into());
                Ok(Provider::Gemini(GeminiProvider::new(
                    client,
                    base_url,
                    api_key,
                    llm.model.clone(),
                )))
            }
            "ollama" => {
                let base_url = llm
                    .endpoint
                    .clone()
                    .unwrap_or_else(|| "http://localhost:11434".into());
                Ok(Provider::Ollama(OllamaProvider::new(
                    client,
                    base_url,
                    llm.model.clone(),
                )))
            }
            "openai" => {
                let base_url = llm
                    .endpoint
                    .clone()
                    .unwrap_or_else(|| "https://api.openai.com/v1".into());
                Ok(Provider::OpenAICompat(OpenAICompatProvider::new(
                    client,
                    base_url,
                    llm.api_key.clone(),
                    llm.model.clone(),
                )))
            }
            other => Err(CompletionError::UnknownProvider(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Provider::Gemini(_) => "gemini",
            Provider::Ollama(_) => "ollama",
            Provider::OpenAICompat(_) => "openai",
        }
    }
}

#[async_trait]
impl CompletionService for Provider {
    async fn complete(&self, history: &[Message], message: &str) -> Result<String, CompletionError> {
        match self {
            Provider::Gemini(p) => p.chat(history, message).await,
            Provider::Ollama(p) => p.chat(history, message).await,
            Provider::OpenAICompat(p) => p.chat(history, message).await,
        }
    }
}
