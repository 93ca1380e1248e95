//! Deterministic fakes and builders shared by integration tests.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use jotdex::config::{
    AiConfig, ChunkingConfig, Config, DbConfig, IndexConfig, RetrievalConfig, ServerConfig,
};
use jotdex::error::{AiError, Result};
use jotdex::notes::MemoryNoteStore;
use jotdex::provider::{ChatMessage, ChatModel, Embedder, TokenStream, Transcriber};
use jotdex::service::AiService;

const DIMS: usize = 256;

fn fnv(word: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in word.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Bag-of-words embedder: each lowercase word bumps one of 256 dimensions,
/// the result is L2-normalized. Texts sharing words land close in cosine
/// space, which is all retrieval tests need.
pub struct FakeEmbedder;

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.0f32; DIMS];
                for word in text.to_lowercase().split_whitespace() {
                    let word: String = word.chars().filter(|c| c.is_alphanumeric()).collect();
                    if word.is_empty() {
                        continue;
                    }
                    vector[(fnv(&word) % DIMS as u64) as usize] += 1.0;
                }
                let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm > 0.0 {
                    for x in &mut vector {
                        *x /= norm;
                    }
                }
                vector
            })
            .collect())
    }

    fn model(&self) -> &str {
        "fake-bag-of-words"
    }
}

/// Streams a scripted list of fragments and records every message list it
/// was handed, so tests can assert on prompt assembly. Optionally ends the
/// stream with a provider error to simulate a mid-stream failure.
pub struct FakeChatModel {
    fragments: Vec<String>,
    trailing_error: Option<String>,
    pub received: Mutex<Vec<Vec<ChatMessage>>>,
}

impl FakeChatModel {
    pub fn scripted(fragments: &[&str]) -> Self {
        Self {
            fragments: fragments.iter().map(|s| s.to_string()).collect(),
            trailing_error: None,
            received: Mutex::new(Vec::new()),
        }
    }

    /// Scripted fragments followed by a provider failure.
    pub fn failing_after(fragments: &[&str], error: &str) -> Self {
        Self {
            fragments: fragments.iter().map(|s| s.to_string()).collect(),
            trailing_error: Some(error.to_string()),
            received: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ChatModel for FakeChatModel {
    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<TokenStream> {
        self.received.lock().unwrap().push(messages.to_vec());
        let mut items: Vec<Result<String>> = self.fragments.iter().cloned().map(Ok).collect();
        if let Some(error) = &self.trailing_error {
            items.push(Err(AiError::Provider(error.clone())));
        }
        Ok(Box::pin(stream::iter(items)))
    }
}

pub struct FakeTranscriber;

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, _audio_path: &std::path::Path) -> Result<String> {
        Ok("transcribed audio".to_string())
    }
}

pub fn test_config(dir: &std::path::Path) -> Config {
    Config {
        db: DbConfig {
            path: dir.join("notes.sqlite"),
        },
        index: IndexConfig {
            snapshot_path: dir.join("index.json"),
        },
        ai: AiConfig {
            enabled: true,
            api_key: Some("sk-test".to_string()),
            ..AiConfig::default()
        },
        chunking: ChunkingConfig::default(),
        retrieval: RetrievalConfig::default(),
        server: ServerConfig {
            bind: "127.0.0.1:0".to_string(),
        },
    }
}

/// Service over the in-memory note store, fake providers, and a tempdir
/// snapshot. Returns the tempdir so it outlives the service.
pub fn test_service(chat: Arc<FakeChatModel>) -> (tempfile::TempDir, AiService) {
    let tmp = tempfile::TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let service = AiService::with_providers(
        config,
        Arc::new(FakeEmbedder),
        chat,
        Arc::new(FakeTranscriber),
        Arc::new(MemoryNoteStore::new()),
    );
    (tmp, service)
}

pub fn snapshot_path(tmp: &tempfile::TempDir) -> PathBuf {
    tmp.path().join("index.json")
}
