//! Note storage.
//!
//! The index and retriever see notes only through the [`NoteStore`] trait;
//! the SQLite implementation backs the CLI and server, the in-memory one
//! backs tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

use crate::error::Result;

/// A stored note. `kind` distinguishes plain notes from other content
/// (e.g. transcribed audio attachments) but does not affect retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: i64,
    pub content: String,
    pub kind: String,
}

/// Persistence seam for notes. Lookups by id tolerate missing ids; the
/// retriever depends on that to filter index drift instead of failing.
#[async_trait]
pub trait NoteStore: Send + Sync {
    /// Fetch the notes whose ids exist, preserving the order of `ids`.
    /// Missing ids are silently skipped.
    async fn find_by_ids(&self, ids: &[i64]) -> Result<Vec<Note>>;

    /// All notes, ascending by id. Used by reindexing.
    async fn all(&self) -> Result<Vec<Note>>;

    async fn insert(&self, content: &str, kind: &str) -> Result<Note>;

    /// Returns the updated note, or `None` if the id does not exist.
    async fn update(&self, id: i64, content: &str) -> Result<Option<Note>>;

    /// Returns true if a row was deleted.
    async fn delete(&self, id: i64) -> Result<bool>;
}

/// SQLite-backed note store.
pub struct SqliteNoteStore {
    pool: SqlitePool,
}

impl SqliteNoteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_note(row: &sqlx::sqlite::SqliteRow) -> Note {
    Note {
        id: row.get("id"),
        content: row.get("content"),
        kind: row.get("kind"),
    }
}

#[async_trait]
impl NoteStore for SqliteNoteStore {
    async fn find_by_ids(&self, ids: &[i64]) -> Result<Vec<Note>> {
        let mut notes = Vec::with_capacity(ids.len());
        for id in ids {
            let row = sqlx::query("SELECT id, content, kind FROM notes WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            if let Some(row) = row {
                notes.push(row_to_note(&row));
            }
        }
        Ok(notes)
    }

    async fn all(&self) -> Result<Vec<Note>> {
        let rows = sqlx::query("SELECT id, content, kind FROM notes ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_note).collect())
    }

    async fn insert(&self, content: &str, kind: &str) -> Result<Note> {
        let now = chrono::Utc::now().to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO notes (content, kind, created_at, updated_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(content)
        .bind(kind)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(Note {
            id: result.last_insert_rowid(),
            content: content.to_string(),
            kind: kind.to_string(),
        })
    }

    async fn update(&self, id: i64, content: &str) -> Result<Option<Note>> {
        let now = chrono::Utc::now().to_rfc3339();
        let result = sqlx::query("UPDATE notes SET content = ?, updated_at = ? WHERE id = ?")
            .bind(content)
            .bind(&now)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        let row = sqlx::query("SELECT id, content, kind FROM notes WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(Some(row_to_note(&row)))
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM notes WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// In-memory note store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryNoteStore {
    notes: RwLock<BTreeMap<i64, Note>>,
    next_id: AtomicI64,
}

impl MemoryNoteStore {
    pub fn new() -> Self {
        Self {
            notes: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

#[async_trait]
impl NoteStore for MemoryNoteStore {
    async fn find_by_ids(&self, ids: &[i64]) -> Result<Vec<Note>> {
        let notes = self.notes.read().unwrap();
        Ok(ids.iter().filter_map(|id| notes.get(id).cloned()).collect())
    }

    async fn all(&self) -> Result<Vec<Note>> {
        let notes = self.notes.read().unwrap();
        Ok(notes.values().cloned().collect())
    }

    async fn insert(&self, content: &str, kind: &str) -> Result<Note> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let note = Note {
            id,
            content: content.to_string(),
            kind: kind.to_string(),
        };
        self.notes.write().unwrap().insert(id, note.clone());
        Ok(note)
    }

    async fn update(&self, id: i64, content: &str) -> Result<Option<Note>> {
        let mut notes = self.notes.write().unwrap();
        match notes.get_mut(&id) {
            Some(note) => {
                note.content = content.to_string();
                Ok(Some(note.clone()))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        Ok(self.notes.write().unwrap().remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_crud() {
        let store = MemoryNoteStore::new();
        let note = store.insert("hello", "note").await.unwrap();
        assert_eq!(note.id, 1);

        let updated = store.update(note.id, "hello again").await.unwrap().unwrap();
        assert_eq!(updated.content, "hello again");

        assert!(store.delete(note.id).await.unwrap());
        assert!(!store.delete(note.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_find_by_ids_skips_missing_and_keeps_order() {
        let store = MemoryNoteStore::new();
        let a = store.insert("a", "note").await.unwrap();
        let b = store.insert("b", "note").await.unwrap();

        let found = store.find_by_ids(&[b.id, 999, a.id]).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, b.id);
        assert_eq!(found[1].id, a.id);
    }

    #[tokio::test]
    async fn test_update_missing_returns_none() {
        let store = MemoryNoteStore::new();
        assert!(store.update(42, "x").await.unwrap().is_none());
    }
}
