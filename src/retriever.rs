//! Note-level retrieval over the chunk index.
//!
//! Search happens per chunk, but consumers want notes: hits are
//! deduplicated to their owning note (keeping each note's best-ranked
//! chunk), resolved against the note store, and re-ranked compactly after
//! drift filtering.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::manager::EmbeddingIndex;
use crate::notes::{Note, NoteStore};

/// A retrieved note and its 0-based rank in the result list.
#[derive(Debug, Clone, Serialize)]
pub struct RankedNote {
    #[serde(flatten)]
    pub note: Note,
    pub rank: usize,
}

pub struct Retriever {
    index: Arc<EmbeddingIndex>,
    notes: Arc<dyn NoteStore>,
}

impl Retriever {
    pub fn new(index: Arc<EmbeddingIndex>, notes: Arc<dyn NoteStore>) -> Self {
        Self { index, notes }
    }

    /// Top notes for a free-text query.
    ///
    /// `k` bounds the chunk-level search, so distinct notes returned may be
    /// fewer after dedup. Index entries pointing at deleted notes are
    /// dropped silently and the survivors re-ranked without gaps.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RankedNote>> {
        if query.trim().is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let vectors = self.index.embedder().embed(&[query.to_string()]).await?;
        let Some(query_vector) = vectors.into_iter().next() else {
            return Ok(Vec::new());
        };

        let hits = self.index.search(&query_vector, k).await;

        // Dedup to note ids, keeping first (best-ranked) occurrence.
        let mut note_ids: Vec<i64> = Vec::new();
        for hit in &hits {
            if !note_ids.contains(&hit.note_id) {
                note_ids.push(hit.note_id);
            }
        }

        let found = self.notes.find_by_ids(&note_ids).await?;
        if found.len() < note_ids.len() {
            debug!(
                requested = note_ids.len(),
                found = found.len(),
                "dropped index entries for missing notes"
            );
        }

        Ok(found
            .into_iter()
            .enumerate()
            .map(|(rank, note)| RankedNote { note, rank })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChunkingConfig;
    use crate::index::SnapshotIndex;
    use crate::manager::UpsertMode;
    use crate::notes::MemoryNoteStore;
    use crate::provider::Embedder;
    use async_trait::async_trait;

    /// Maps a handful of known phrases to fixed orthogonal-ish vectors so
    /// ranking is fully deterministic.
    struct PhraseEmbedder;

    #[async_trait]
    impl Embedder for PhraseEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    if t.contains("sky") {
                        vec![1.0, 0.1, 0.0]
                    } else if t.contains("banana") {
                        vec![0.0, 1.0, 0.1]
                    } else {
                        vec![0.1, 0.1, 1.0]
                    }
                })
                .collect())
        }

        fn model(&self) -> &str {
            "phrase-embedder"
        }
    }

    async fn build() -> (tempfile::TempDir, Arc<EmbeddingIndex>, Arc<MemoryNoteStore>) {
        let tmp = tempfile::TempDir::new().unwrap();
        let snapshot = SnapshotIndex::load(&tmp.path().join("index.json"));
        let index = Arc::new(EmbeddingIndex::new(
            snapshot,
            Arc::new(PhraseEmbedder),
            ChunkingConfig::default(),
        ));
        let notes = Arc::new(MemoryNoteStore::new());
        (tmp, index, notes)
    }

    #[tokio::test]
    async fn test_relevant_note_ranks_first() {
        let (_tmp, index, notes) = build().await;
        let n1 = notes.insert("The sky is blue", "note").await.unwrap();
        let n2 = notes.insert("Bananas are yellow", "note").await.unwrap();
        index.upsert_note(n1.id, &n1.content, UpsertMode::Insert).await.unwrap();
        index.upsert_note(n2.id, &n2.content, UpsertMode::Insert).await.unwrap();

        let retriever = Retriever::new(index, notes);
        let results = retriever.retrieve("what color is the sky", 2).await.unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].note.id, n1.id);
        assert_eq!(results[0].rank, 0);
    }

    #[tokio::test]
    async fn test_drifted_entries_filtered_and_reranked() {
        let (_tmp, index, notes) = build().await;
        let n1 = notes.insert("The sky is blue", "note").await.unwrap();
        let n2 = notes.insert("skylight skyline", "note").await.unwrap();
        index.upsert_note(n1.id, &n1.content, UpsertMode::Insert).await.unwrap();
        index.upsert_note(n2.id, &n2.content, UpsertMode::Insert).await.unwrap();

        // Note gone from the store but still indexed: drift.
        notes.delete(n1.id).await.unwrap();

        let retriever = Retriever::new(index, notes);
        let results = retriever.retrieve("sky", 2).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].note.id, n2.id);
        assert_eq!(results[0].rank, 0);
    }

    #[tokio::test]
    async fn test_multichunk_note_dedups_to_one_result() {
        let tmp = tempfile::TempDir::new().unwrap();
        let snapshot = SnapshotIndex::load(&tmp.path().join("index.json"));
        let index = Arc::new(EmbeddingIndex::new(
            snapshot,
            Arc::new(PhraseEmbedder),
            ChunkingConfig {
                max_chars: 20,
                overlap_chars: 5,
            },
        ));
        let notes = Arc::new(MemoryNoteStore::new());

        let n1 = notes
            .insert(&"sky sky sky sky sky ".repeat(5), "note")
            .await
            .unwrap();
        index.upsert_note(n1.id, &n1.content, UpsertMode::Insert).await.unwrap();

        let retriever = Retriever::new(index, notes);
        let results = retriever.retrieve("sky", 4).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].note.id, n1.id);
    }

    #[tokio::test]
    async fn test_empty_query_and_zero_k() {
        let (_tmp, index, notes) = build().await;
        let retriever = Retriever::new(index, notes);
        assert!(retriever.retrieve("", 2).await.unwrap().is_empty());
        assert!(retriever.retrieve("sky", 0).await.unwrap().is_empty());
    }
}
