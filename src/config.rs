use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

use crate::error::{ChaiRelayError, Result};

pub const DEFAULT_MODEL: &str = "llama3.1";
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434/v1";
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 7878;
pub const MAX_HISTORY_LIMIT: usize = 500;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

impl OpenAiConfig {
    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl ServerConfig {
    pub fn host(&self) -> &str {
        self.host.as_deref().unwrap_or(DEFAULT_HOST)
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub sqlite_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GenerationConfig {
    pub history_limit: Option<usize>,
    pub fragment_timeout_secs: Option<u64>,
}

impl GenerationConfig {
    pub fn history_limit(&self) -> usize {
        self.history_limit.unwrap_or(MAX_HISTORY_LIMIT)
    }

    pub fn fragment_timeout(&self) -> Option<Duration> {
        self.fragment_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| ChaiRelayError::Config(format!("failed to read {path}: {e}")))?;
        serde_json::from_str(&raw)
            .map_err(|e| ChaiRelayError::Config(format!("failed to parse {path}: {e}")))
    }

    pub fn convention_defaults(db_path: &str) -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig {
                sqlite_path: Some(db_path.to_string()),
            },
            openai: OpenAiConfig::default(),
            generation: GenerationConfig::default(),
        }
    }

    pub fn sqlite_path(&self) -> String {
        self.database
            .sqlite_path
            .clone()
            .unwrap_or_else(crate::runtime_paths::default_db_path)
    }

    pub fn validate(&self) -> Result<()> {
        if self.openai.model().trim().is_empty() {
            return Err(ChaiRelayError::Config("openai.model cannot be empty".to_string()));
        }

        let base_url = self.openai.base_url().trim();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ChaiRelayError::Config(format!(
                "openai.base_url must be an http(s) url, got `{base_url}`"
            )));
        }

        let limit = self.generation.history_limit();
        if limit == 0 || limit > MAX_HISTORY_LIMIT {
            return Err(ChaiRelayError::Config(format!(
                "generation.history_limit must be between 1 and {MAX_HISTORY_LIMIT}, got {limit}"
            )));
        }

        if self.generation.fragment_timeout_secs == Some(0) {
            return Err(ChaiRelayError::Config(
                "generation.fragment_timeout_secs must be positive when set".to_string(),
            ));
        }

        if self.sqlite_path().trim().is_empty() {
            return Err(ChaiRelayError::Config(
                "database.sqlite_path cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}
