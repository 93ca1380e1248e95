//! The assembled AI service: one context object owning the providers, the
//! note store, the embedding index, and the retriever.
//!
//! Construction is the configuration gate. [`AiService::from_config`]
//! fails with [`AiError::NotConfigured`] before touching the database or
//! the snapshot when AI is disabled, so every downstream operation can
//! assume a working provider.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::chat::{self, ChatReply, ConversationTurn};
use crate::config::Config;
use crate::db;
use crate::error::{AiError, Result};
use crate::index::SnapshotIndex;
use crate::manager::{EmbeddingIndex, UpsertMode};
use crate::migrate;
use crate::notes::{Note, NoteStore, SqliteNoteStore};
use crate::provider::{ChatModel, Embedder, OpenAiClient, Transcriber};
use crate::retriever::{RankedNote, Retriever};

pub struct AiService {
    config: Config,
    chat_model: Arc<dyn ChatModel>,
    transcriber: Arc<dyn Transcriber>,
    notes: Arc<dyn NoteStore>,
    indexer: Arc<EmbeddingIndex>,
    retriever: Retriever,
}

impl std::fmt::Debug for AiService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiService").finish_non_exhaustive()
    }
}

impl AiService {
    /// Build the full service from configuration: provider client, SQLite
    /// note store (migrated), and index snapshot.
    pub async fn from_config(config: Config) -> Result<Self> {
        config.ai.ensure_enabled()?;

        let client = Arc::new(OpenAiClient::new(&config.ai)?);
        let pool = db::connect(&config.db.path).await?;
        migrate::run_migrations(&pool).await?;
        let notes: Arc<dyn NoteStore> = Arc::new(SqliteNoteStore::new(pool));

        let embedder: Arc<dyn Embedder> = client.clone();
        let chat_model: Arc<dyn ChatModel> = client.clone();
        let transcriber: Arc<dyn Transcriber> = client;

        Ok(Self::with_providers(
            config,
            embedder,
            chat_model,
            transcriber,
            notes,
        ))
    }

    /// Assemble from explicit providers and store. Test seam; production
    /// code goes through [`AiService::from_config`].
    pub fn with_providers(
        config: Config,
        embedder: Arc<dyn Embedder>,
        chat_model: Arc<dyn ChatModel>,
        transcriber: Arc<dyn Transcriber>,
        notes: Arc<dyn NoteStore>,
    ) -> Self {
        let snapshot = SnapshotIndex::load(&config.index.snapshot_path);
        let indexer = Arc::new(EmbeddingIndex::new(
            snapshot,
            embedder,
            config.chunking.clone(),
        ));
        let retriever = Retriever::new(indexer.clone(), notes.clone());

        Self {
            config,
            chat_model,
            transcriber,
            notes,
            indexer,
            retriever,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn notes(&self) -> &Arc<dyn NoteStore> {
        &self.notes
    }

    /// (Re)index a note's content. Returns the number of chunks indexed.
    pub async fn embedding_upsert(
        &self,
        note_id: i64,
        content: &str,
        mode: UpsertMode,
    ) -> Result<usize> {
        self.indexer.upsert_note(note_id, content, mode).await
    }

    /// Drop a note's chunks from the index. Returns chunks removed.
    pub async fn embedding_delete(&self, note_id: i64) -> Result<usize> {
        self.indexer.delete_note(note_id).await
    }

    /// Top notes for a query, using the configured `top_k` when `k` is None.
    pub async fn retrieve(&self, query: &str, k: Option<usize>) -> Result<Vec<RankedNote>> {
        let k = k.unwrap_or(self.config.retrieval.top_k);
        self.retriever.retrieve(query, k).await
    }

    /// Retrieval-augmented streaming chat.
    pub async fn chat_completion(
        &self,
        question: &str,
        conversation: &[ConversationTurn],
    ) -> Result<ChatReply> {
        chat::chat_completion(
            &self.retriever,
            &self.chat_model,
            self.config.retrieval.top_k,
            question,
            conversation,
        )
        .await
    }

    /// Transcribe an audio file to text.
    pub async fn transcribe(&self, audio_path: &Path) -> Result<String> {
        self.transcriber.transcribe(audio_path).await
    }

    /// Create a note and index it.
    pub async fn create_note(&self, content: &str, kind: &str) -> Result<Note> {
        let note = self.notes.insert(content, kind).await?;
        self.embedding_upsert(note.id, &note.content, UpsertMode::Insert)
            .await?;
        Ok(note)
    }

    /// Update a note's content and reindex it.
    pub async fn update_note(&self, id: i64, content: &str) -> Result<Note> {
        let note = self
            .notes
            .update(id, content)
            .await?
            .ok_or_else(|| AiError::Store(format!("note {} not found", id)))?;
        self.embedding_upsert(note.id, &note.content, UpsertMode::Update)
            .await?;
        Ok(note)
    }

    /// Delete a note and its index entries.
    pub async fn delete_note(&self, id: i64) -> Result<bool> {
        let existed = self.notes.delete(id).await?;
        self.embedding_delete(id).await?;
        Ok(existed)
    }

    /// Rebuild the index from the note store. Returns (notes, chunks).
    pub async fn reindex(&self) -> Result<(usize, usize)> {
        let notes = self.notes.all().await?;
        let mut chunks = 0;
        for note in &notes {
            chunks += self
                .embedding_upsert(note.id, &note.content, UpsertMode::Update)
                .await?;
        }
        info!(notes = notes.len(), chunks, "reindex complete");
        Ok((notes.len(), chunks))
    }
}
