//! Application configuration
//!
//! Values come from three layers, later ones winning: built-in defaults, an
//! optional TOML file named by `EASY_CHAT_CONFIG`, and environment variables.

pub mod file;

use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use file::{ConfigError, FileConfig, LlmConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub llm: LlmConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_file_config(FileConfig::default())
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let file = match env::var("EASY_CHAT_CONFIG") {
            Ok(path) => FileConfig::from_file(Path::new(&path))?,
            Err(_) => FileConfig::default(),
        };

        let mut config = Self::from_file_config(file);
        config.apply_env(|key| env::var(key).ok());
        Ok(config)
    }

    fn from_file_config(file: FileConfig) -> Self {
        Self {
            host: file.server.host,
            port: file.server.port,
            data_dir: file.storage.data_dir,
            llm: file.llm,
        }
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(host) = var("HOST") {
            self.host = host;
        }
        if let Some(port) = var("PORT").and_then(|p| p.parse().ok()) {
            self.port = port;
        }
        if let Some(dir) = var("EASY_CHAT_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(provider) = var("LLM_PROVIDER") {
            self.llm.provider = provider;
        }
        if let Some(model) = var("LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(endpoint) = var("LLM_ENDPOINT") {
            self.llm.endpoint = Some(endpoint);
        }
        if let Some(timeout) = var("LLM_TIMEOUT_SECS").and_then(|t| t.parse().ok()) {
            self.llm.timeout_secs = timeout;
        }

        let key_env = self.llm.api_key_env_name();
        self.llm.api_key = var(&key_env).or(self.llm.api_key.take());
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("easy-chat.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn with_vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 3000);
        assert_eq!(config.llm.provider, "gemini");
        assert_eq!(config.llm.model, "gemini-1.5-flash");
        assert_eq!(config.database_path(), PathBuf::from("./data/easy-chat.db"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(with_vars(&[
            ("PORT", "8080"),
            ("LLM_PROVIDER", "ollama"),
            ("LLM_MODEL", "llama3.2"),
            ("EASY_CHAT_DATA_DIR", "/var/lib/easy-chat"),
            ("OPENAI_API_KEY", "ignored-for-ollama"),
        ]));

        assert_eq!(config.port, 8080);
        assert_eq!(config.llm.provider, "ollama");
        assert_eq!(config.llm.model, "llama3.2");
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/easy-chat"));
        assert!(config.llm.api_key.is_none());
    }

    #[test]
    fn test_api_key_follows_provider() {
        let mut config = Config::default();
        config.apply_env(with_vars(&[("GEMINI_API_KEY", "g-key"), ("PORT", "not-a-port")]));
        assert_eq!(config.llm.api_key.as_deref(), Some("g-key"));
        assert_eq!(config.port, 3000);

        let mut config = Config::default();
        config.apply_env(with_vars(&[
            ("LLM_PROVIDER", "openai"),
            ("GEMINI_API_KEY", "g-key"),
            ("OPENAI_API_KEY", "o-key"),
        ]));
        assert_eq!(config.llm.api_key.as_deref(), Some("o-key"));
    }
}
