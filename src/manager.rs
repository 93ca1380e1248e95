//! Note-to-index lifecycle: chunk, embed, and mutate the vector index.
//!
//! All mutations of a given note are serialized through a per-note async
//! mutex, so concurrent upserts or an upsert racing a delete cannot
//! interleave their chunk runs. Mutations on different notes only contend
//! on the short index write section.
//!
//! Mutation order inside the lock is delete-old-run, insert-new-run,
//! persist. Embedding happens before the index lock is taken, so a slow
//! provider call never blocks readers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Deserialize;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info};

use crate::chunk::{chunk_id, split_text};
use crate::config::ChunkingConfig;
use crate::error::{AiError, Result};
use crate::index::{SearchHit, SnapshotIndex, UpsertEntry};
use crate::provider::Embedder;

/// Whether an upsert replaces an existing run or indexes a new note.
/// Both paths rewrite the full chunk run; `Update` additionally clears
/// whatever run was recorded before, so shrinking notes leave no strays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertMode {
    Insert,
    Update,
}

/// Owns the vector index and coordinates its mutations.
pub struct EmbeddingIndex {
    index: RwLock<SnapshotIndex>,
    note_locks: Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
    embedder: Arc<dyn Embedder>,
    chunking: ChunkingConfig,
}

impl EmbeddingIndex {
    pub fn new(index: SnapshotIndex, embedder: Arc<dyn Embedder>, chunking: ChunkingConfig) -> Self {
        Self {
            index: RwLock::new(index),
            note_locks: Mutex::new(HashMap::new()),
            embedder,
            chunking,
        }
    }

    async fn note_guard(&self, note_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.note_locks.lock().unwrap();
            locks
                .entry(note_id)
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Chunk `content`, embed it, and replace the note's run in the index.
    /// Returns the number of chunks indexed. Empty content clears the run.
    pub async fn upsert_note(
        &self,
        note_id: i64,
        content: &str,
        mode: UpsertMode,
    ) -> Result<usize> {
        let _guard = self.note_guard(note_id).await;

        let spans = split_text(content, self.chunking.max_chars, self.chunking.overlap_chars);

        // Embed outside the index lock; a provider failure here leaves the
        // old run fully intact.
        let vectors = if spans.is_empty() {
            Vec::new()
        } else {
            let vectors = self.embedder.embed(&spans).await?;
            if vectors.len() != spans.len() {
                return Err(AiError::Provider(format!(
                    "embedder returned {} vectors for {} chunks",
                    vectors.len(),
                    spans.len()
                )));
            }
            vectors
        };

        let entries: Vec<UpsertEntry> = vectors
            .into_iter()
            .enumerate()
            .map(|(ordinal, vector)| UpsertEntry {
                chunk_id: chunk_id(note_id, ordinal),
                note_id,
                vector,
            })
            .collect();
        let count = entries.len();

        let mut index = self.index.write().await;
        if mode == UpsertMode::Update {
            let old = index.chunk_ids_for(note_id);
            if !old.is_empty() {
                index.delete(&old);
            }
        }
        if !entries.is_empty() {
            index.upsert(entries);
        }
        index.persist()?;

        info!(note_id, chunks = count, ?mode, "note indexed");
        Ok(count)
    }

    /// Remove every chunk recorded for `note_id`. Unknown notes are a no-op.
    /// Returns how many chunks were removed.
    pub async fn delete_note(&self, note_id: i64) -> Result<usize> {
        let removed = {
            let _guard = self.note_guard(note_id).await;

            let mut index = self.index.write().await;
            let ids = index.chunk_ids_for(note_id);
            if ids.is_empty() {
                0
            } else {
                let removed = index.delete(&ids);
                index.persist()?;
                debug!(note_id, removed, "note removed from index");
                removed
            }
        };

        // A deleted note should not pin its mutex forever. Drop the map
        // entry unless another task still holds or awaits the lock.
        let mut locks = self.note_locks.lock().unwrap();
        if locks
            .get(&note_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&note_id);
        }

        Ok(removed)
    }

    pub async fn search(&self, query: &[f32], k: usize) -> Vec<SearchHit> {
        self.index.read().await.search(query, k)
    }

    pub async fn chunk_ids_for(&self, note_id: i64) -> Vec<String> {
        self.index.read().await.chunk_ids_for(note_id)
    }

    pub async fn len(&self) -> usize {
        self.index.read().await.len()
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }
}
