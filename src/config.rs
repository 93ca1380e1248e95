use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::AiError;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub index: IndexConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Location of the vector index snapshot file. A missing or corrupt
    /// snapshot is treated as an empty index, never a fatal error.
    pub snapshot_path: PathBuf,
}

/// Provider settings for embeddings, chat completion, and transcription.
///
/// All AI operations are gated on `enabled` plus a resolvable API key;
/// everything else has a usable default.
#[derive(Debug, Deserialize, Clone)]
pub struct AiConfig {
    #[serde(default)]
    pub enabled: bool,
    /// API key; falls back to the `OPENAI_API_KEY` environment variable.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Custom OpenAI-compatible base URL (e.g. a proxy endpoint).
    #[serde(default)]
    pub api_endpoint: Option<String>,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: None,
            api_endpoint: None,
            chat_model: default_chat_model(),
            embedding_model: default_embedding_model(),
            transcription_model: default_transcription_model(),
            temperature: 0.0,
            max_tokens: default_max_tokens(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_chat_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_transcription_model() -> String {
    "whisper-1".to_string()
}
fn default_max_tokens() -> u32 {
    3000
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl AiConfig {
    /// API key from config, falling back to `OPENAI_API_KEY`.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()))
    }

    /// Base URL for the provider API, without a trailing slash.
    pub fn endpoint(&self) -> String {
        self.api_endpoint
            .as_deref()
            .unwrap_or("https://api.openai.com/v1")
            .trim_end_matches('/')
            .to_string()
    }

    /// Fail fast before any AI operation touches the index or a backend.
    pub fn ensure_enabled(&self) -> std::result::Result<(), AiError> {
        if !self.enabled {
            return Err(AiError::NotConfigured(
                "AI features are disabled; set [ai] enabled = true".to_string(),
            ));
        }
        if self.resolved_api_key().is_none() {
            return Err(AiError::NotConfigured(
                "no API key; set [ai] api_key or OPENAI_API_KEY".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    400
}
fn default_overlap_chars() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Number of nearest chunks fetched per query before note-level dedup.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.max_chars {
        anyhow::bail!(
            "chunking.overlap_chars ({}) must be smaller than chunking.max_chars ({})",
            config.chunking.overlap_chars,
            config.chunking.max_chars
        );
    }

    // Validate retrieval
    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    // Validate ai
    if !(0.0..=2.0).contains(&config.ai.temperature) {
        anyhow::bail!("ai.temperature must be in [0.0, 2.0]");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(body: &str) -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("jotdex.toml");
        std::fs::write(&path, body).unwrap();
        (tmp, path)
    }

    #[test]
    fn test_minimal_config_defaults() {
        let (_tmp, path) = write_config(
            r#"
[db]
path = "/tmp/notes.sqlite"

[index]
snapshot_path = "/tmp/index.json"

[server]
bind = "127.0.0.1:7400"
"#,
        );
        let config = load_config(&path).unwrap();
        assert!(!config.ai.enabled);
        assert_eq!(config.ai.chat_model, "gpt-3.5-turbo");
        assert_eq!(config.ai.embedding_model, "text-embedding-3-small");
        assert_eq!(config.chunking.max_chars, 400);
        assert_eq!(config.chunking.overlap_chars, 200);
        assert_eq!(config.retrieval.top_k, 2);
    }

    #[test]
    fn test_overlap_must_be_smaller_than_max() {
        let (_tmp, path) = write_config(
            r#"
[db]
path = "/tmp/notes.sqlite"

[index]
snapshot_path = "/tmp/index.json"

[chunking]
max_chars = 100
overlap_chars = 100

[server]
bind = "127.0.0.1:7400"
"#,
        );
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_ensure_enabled_requires_flag_and_key() {
        let disabled = AiConfig::default();
        assert!(matches!(
            disabled.ensure_enabled(),
            Err(AiError::NotConfigured(_))
        ));

        let ready = AiConfig {
            enabled: true,
            api_key: Some("sk-test".to_string()),
            ..AiConfig::default()
        };
        assert!(ready.ensure_enabled().is_ok());
    }

    #[test]
    fn test_endpoint_trailing_slash_stripped() {
        let config = AiConfig {
            api_endpoint: Some("https://proxy.example.com/v1/".to_string()),
            ..AiConfig::default()
        };
        assert_eq!(config.endpoint(), "https://proxy.example.com/v1");
    }
}
