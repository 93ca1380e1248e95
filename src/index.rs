//! Persistent vector index with a durable file snapshot.
//!
//! Stores (chunk id → embedding vector, note id payload) pairs and serves
//! brute-force cosine nearest-neighbor search. The whole index is the unit
//! of persistence: [`SnapshotIndex::persist`] writes one JSON snapshot via
//! a temp-file-and-rename, and [`SnapshotIndex::load`] on a missing or
//! corrupt snapshot starts empty instead of failing.
//!
//! Alongside the entries, the snapshot carries an explicit reverse map
//! `note id → chunk ids`, maintained on every mutation, so deleting a
//! note's chunks never has to guess which ordinals exist.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{AiError, Result};

/// A stored embedding plus its owning note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub note_id: i64,
    pub vector: Vec<f32>,
}

/// Entry handed to [`SnapshotIndex::upsert`].
#[derive(Debug, Clone)]
pub struct UpsertEntry {
    pub chunk_id: String,
    pub note_id: i64,
    pub vector: Vec<f32>,
}

/// One nearest-neighbor match.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk_id: String,
    pub note_id: i64,
    /// Cosine similarity in [-1, 1]; higher is closer.
    pub score: f32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    entries: HashMap<String, IndexEntry>,
    /// Reverse map: note id → chunk ids, in ordinal order.
    note_chunks: HashMap<i64, Vec<String>>,
}

/// Brute-force cosine index persisted as a single snapshot file.
pub struct SnapshotIndex {
    path: PathBuf,
    snapshot: Snapshot,
}

impl SnapshotIndex {
    /// Load the snapshot at `path`, or start empty if it is missing,
    /// unreadable, or corrupt.
    pub fn load(path: &Path) -> Self {
        let snapshot = match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "corrupt index snapshot, starting empty");
                    Snapshot::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Snapshot::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable index snapshot, starting empty");
                Snapshot::default()
            }
        };

        Self {
            path: path.to_path_buf(),
            snapshot,
        }
    }

    /// Insert or replace entries by chunk id, keeping the reverse map current.
    pub fn upsert(&mut self, entries: Vec<UpsertEntry>) {
        for entry in entries {
            if let Some(old) = self.snapshot.entries.remove(&entry.chunk_id) {
                // Replaced entry: drop the stale reverse-map reference first.
                if let Some(ids) = self.snapshot.note_chunks.get_mut(&old.note_id) {
                    ids.retain(|id| id != &entry.chunk_id);
                }
            }
            self.snapshot
                .note_chunks
                .entry(entry.note_id)
                .or_default()
                .push(entry.chunk_id.clone());
            self.snapshot.entries.insert(
                entry.chunk_id,
                IndexEntry {
                    note_id: entry.note_id,
                    vector: entry.vector,
                },
            );
        }
        self.snapshot.note_chunks.retain(|_, ids| !ids.is_empty());
    }

    /// Delete entries by chunk id. Missing ids are a no-op, never an error.
    /// Returns how many entries actually existed.
    pub fn delete(&mut self, chunk_ids: &[String]) -> usize {
        let mut removed = 0;
        for chunk_id in chunk_ids {
            if let Some(entry) = self.snapshot.entries.remove(chunk_id) {
                removed += 1;
                if let Some(ids) = self.snapshot.note_chunks.get_mut(&entry.note_id) {
                    ids.retain(|id| id != chunk_id);
                    if ids.is_empty() {
                        self.snapshot.note_chunks.remove(&entry.note_id);
                    }
                }
            }
        }
        removed
    }

    /// The chunk ids currently recorded for a note, in ordinal order.
    pub fn chunk_ids_for(&self, note_id: i64) -> Vec<String> {
        self.snapshot
            .note_chunks
            .get(&note_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Top-`k` entries by descending cosine similarity to `query`.
    /// Ties break on chunk id so results are deterministic.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<SearchHit> {
        let mut hits: Vec<SearchHit> = self
            .snapshot
            .entries
            .iter()
            .map(|(chunk_id, entry)| SearchHit {
                chunk_id: chunk_id.clone(),
                note_id: entry.note_id,
                score: cosine_similarity(query, &entry.vector),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(k);
        hits
    }

    /// Write the whole index to the snapshot file. Durability contract:
    /// callers treat a mutation as complete only after this returns.
    pub fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let bytes = serde_json::to_vec(&self.snapshot)?;
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, bytes)?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| {
            AiError::Index(format!(
                "failed to replace snapshot {}: {}",
                self.path.display(),
                e
            ))
        })?;

        debug!(path = %self.path.display(), entries = self.snapshot.entries.len(), "index snapshot persisted");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.snapshot.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.entries.is_empty()
    }
}

/// Cosine similarity between two embedding vectors.
///
/// Returns 0.0 for empty vectors, mismatched lengths, or zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
