//! jotdex — a note embedding index with retrieval-augmented chat.
//!
//! Notes are chunked into overlapping spans, embedded through an
//! OpenAI-compatible provider, and stored in a brute-force cosine index
//! persisted as a single snapshot file. Questions are answered by
//! retrieving the closest notes and streaming a chat completion grounded
//! in them.
//!
//! ```text
//! note text ──▶ chunk ──▶ provider (embed) ──▶ index ──▶ snapshot file
//!                                                │
//! question ──▶ provider (embed) ─────────────────┴──▶ retriever ──▶ chat ──▶ fragments
//! ```
//!
//! | Module      | Responsibility                                   |
//! |-------------|--------------------------------------------------|
//! | [`chunk`]     | fixed-window text splitting with overlap       |
//! | [`index`]     | cosine vector index + snapshot persistence     |
//! | [`manager`]   | note lifecycle in the index, per-note locking  |
//! | [`provider`]  | embedding / chat / transcription backends      |
//! | [`retriever`] | chunk search → deduplicated ranked notes       |
//! | [`chat`]      | prompt assembly and streaming completion       |
//! | [`notes`]     | note storage (SQLite and in-memory)            |
//! | [`service`]   | assembled context object                       |
//! | [`server`]    | HTTP API with SSE chat                         |

pub mod chat;
pub mod chunk;
pub mod config;
pub mod db;
pub mod error;
pub mod index;
pub mod manager;
pub mod migrate;
pub mod notes;
pub mod provider;
pub mod retriever;
pub mod server;
pub mod service;
