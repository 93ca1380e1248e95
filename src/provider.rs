//! Provider abstraction and the OpenAI-compatible HTTP client.
//!
//! Three capabilities sit behind traits so the pipeline can run against
//! deterministic fakes in tests:
//! - [`Embedder`] — batch text → fixed-length vectors
//! - [`ChatModel`] — messages → streamed answer fragments
//! - [`Transcriber`] — audio file → text
//!
//! [`OpenAiClient`] implements all three against any OpenAI-compatible
//! endpoint (the base URL is configurable).
//!
//! # Retry strategy
//!
//! Embedding requests use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! Chat streaming does not retry: a stream is not restartable, so a
//! mid-stream failure terminates the fragment sequence with an error item.

use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::config::AiConfig;
use crate::error::{AiError, Result};

/// Message role in a model conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One model-facing message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Ordered, finite, non-restartable sequence of answer fragments.
/// Dropping the stream cancels production; it never mutates the index.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Converts text into fixed-length numeric vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model(&self) -> &str;
}

/// Drives a language model in streaming mode.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Start a streamed completion. Failures before the first fragment
    /// surface as `Err`; later failures terminate the stream itself.
    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<TokenStream>;
}

/// Speech-to-text capability.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio_path: &Path) -> Result<String>;
}

// ============ OpenAI-compatible client ============

/// HTTP client for an OpenAI-compatible provider.
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    embedding_model: String,
    chat_model: String,
    transcription_model: String,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
    timeout_secs: u64,
}

impl OpenAiClient {
    /// Build a client from validated configuration.
    ///
    /// Fails with [`AiError::NotConfigured`] when AI is disabled or no API
    /// key resolves — the configuration gate for every provider-backed
    /// operation.
    pub fn new(config: &AiConfig) -> Result<Self> {
        config.ensure_enabled()?;
        let api_key = config
            .resolved_api_key()
            .ok_or_else(|| AiError::NotConfigured("no API key".to_string()))?;

        // No whole-request timeout on the client: chat responses stream for
        // longer than any sane fixed budget. Non-streaming requests apply
        // `timeout_secs` per call.
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http,
            api_key,
            base_url: config.endpoint(),
            embedding_model: config.embedding_model.clone(),
            chat_model: config.chat_model.clone(),
            transcription_model: config.transcription_model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
        })
    }

    async fn embed_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        #[derive(Deserialize)]
        struct EmbeddingData {
            embedding: Vec<f32>,
            index: usize,
        }
        #[derive(Deserialize)]
        struct EmbeddingResponse {
            data: Vec<EmbeddingData>,
        }

        let url = format!("{}/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": self.embedding_model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                debug!(attempt, delay_secs = delay.as_secs(), "retrying embeddings request");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .http
                .post(&url)
                .bearer_auth(&self.api_key)
                .timeout(Duration::from_secs(self.timeout_secs))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let parsed: EmbeddingResponse = response
                            .json()
                            .await
                            .map_err(|e| AiError::Provider(format!("invalid embeddings response: {}", e)))?;
                        let mut data = parsed.data;
                        data.sort_by_key(|d| d.index);
                        if data.len() != texts.len() {
                            return Err(AiError::Provider(format!(
                                "expected {} embeddings, got {}",
                                texts.len(),
                                data.len()
                            )));
                        }
                        return Ok(data.into_iter().map(|d| d.embedding).collect());
                    }

                    let text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(AiError::Provider(format!(
                            "embeddings API error {}: {}",
                            status, text
                        )));
                        continue;
                    }
                    return Err(AiError::Provider(format!(
                        "embeddings API error {}: {}",
                        status, text
                    )));
                }
                Err(e) => {
                    last_err = Some(AiError::Provider(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| AiError::Provider("embedding failed after retries".to_string())))
    }
}

#[async_trait]
impl Embedder for OpenAiClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.embed_with_retry(texts).await
    }

    fn model(&self) -> &str {
        &self.embedding_model
    }
}

#[async_trait]
impl ChatModel for OpenAiClient {
    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<TokenStream> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": self.chat_model,
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "stream": true,
        });

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AiError::Provider(format!(
                "chat API error {}: {}",
                status, text
            )));
        }

        // Dedicated worker parses the SSE body and feeds a channel; dropping
        // the receiving stream makes `send` fail, which stops the worker and
        // the underlying request.
        let (tx, rx) = mpsc::channel::<Result<String>>(32);
        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut buf = String::new();

            'outer: while let Some(item) = bytes.next().await {
                match item {
                    Ok(chunk) => {
                        buf.push_str(&String::from_utf8_lossy(&chunk));
                        while let Some(line) = next_line(&mut buf) {
                            match parse_sse_line(&line) {
                                SseEvent::Delta(text) => {
                                    if tx.send(Ok(text)).await.is_err() {
                                        break 'outer;
                                    }
                                }
                                SseEvent::Done => break 'outer,
                                SseEvent::Skip => {}
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(AiError::Provider(e.to_string()))).await;
                        break;
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

#[async_trait]
impl Transcriber for OpenAiClient {
    async fn transcribe(&self, audio_path: &Path) -> Result<String> {
        #[derive(Deserialize)]
        struct TranscriptionResponse {
            text: String,
        }

        let bytes = tokio::fs::read(audio_path).await.map_err(|e| {
            AiError::Provider(format!(
                "cannot read audio file {}: {}",
                audio_path.display(),
                e
            ))
        })?;

        let file_name = audio_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio")
            .to_string();

        let form = reqwest::multipart::Form::new()
            .part("file", reqwest::multipart::Part::bytes(bytes).file_name(file_name))
            .text("model", self.transcription_model.clone());

        let url = format!("{}/audio/transcriptions", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(self.timeout_secs.max(60)))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AiError::Provider(format!(
                "transcription API error {}: {}",
                status, text
            )));
        }

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| AiError::Provider(format!("invalid transcription response: {}", e)))?;
        Ok(parsed.text)
    }
}

// ============ SSE parsing ============

/// Outcome of parsing one SSE line from a chat completions stream.
#[derive(Debug, PartialEq)]
pub(crate) enum SseEvent {
    /// A text fragment to forward to the consumer.
    Delta(String),
    /// The `[DONE]` sentinel.
    Done,
    /// Empty line, comment, or a chunk without text content.
    Skip,
}

/// Pop the next complete line (without its terminator) off the buffer.
fn next_line(buf: &mut String) -> Option<String> {
    let pos = buf.find('\n')?;
    let mut line: String = buf.drain(..=pos).collect();
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Some(line)
}

/// Parse one `data:` line of the OpenAI streaming format, extracting
/// `choices[0].delta.content` when present.
pub(crate) fn parse_sse_line(line: &str) -> SseEvent {
    let Some(data) = line.strip_prefix("data:") else {
        return SseEvent::Skip;
    };
    let data = data.trim();

    if data == "[DONE]" {
        return SseEvent::Done;
    }

    let Ok(value) = serde_json::from_str::<serde_json::Value>(data) else {
        return SseEvent::Skip;
    };

    match value["choices"][0]["delta"]["content"].as_str() {
        Some(content) if !content.is_empty() => SseEvent::Delta(content.to_string()),
        _ => SseEvent::Skip,
    }
}
