//! HTTP API over the AI service.
//!
//! Routes:
//! - `GET  /health`
//! - `POST /ai/embedding/upsert`  — index (or reindex) a note's content
//! - `POST /ai/embedding/delete`  — drop a note from the index
//! - `POST /ai/chat`              — retrieval-augmented chat, SSE response
//! - `POST /ai/transcribe`        — audio file path → text
//!
//! The chat endpoint emits one `notes` event carrying the retrieved notes,
//! then a `delta` event per answer fragment, then `done`. Client
//! disconnect drops the stream and cancels generation upstream.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::chat::ConversationTurn;
use crate::error::AiError;
use crate::manager::UpsertMode;
use crate::service::AiService;

#[derive(Clone)]
struct AppState {
    service: Arc<AiService>,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl From<AiError> for AppError {
    fn from(err: AiError) -> Self {
        let (status, code) = match &err {
            AiError::NotConfigured(_) => (StatusCode::BAD_REQUEST, "not_configured"),
            AiError::Provider(_) => (StatusCode::BAD_GATEWAY, "provider_error"),
            AiError::Index(_) => (StatusCode::INTERNAL_SERVER_ERROR, "index_error"),
            AiError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store_error"),
        };
        Self {
            status,
            code,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": { "code": self.code, "message": self.message }
        });
        (self.status, Json(body)).into_response()
    }
}

pub fn router(service: Arc<AiService>) -> Router {
    let state = AppState { service };
    Router::new()
        .route("/health", get(health))
        .route("/ai/embedding/upsert", post(embedding_upsert))
        .route("/ai/embedding/delete", post(embedding_delete))
        .route("/ai/chat", post(chat))
        .route("/ai/transcribe", post(transcribe))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run_server(service: Arc<AiService>) -> anyhow::Result<()> {
    let bind = service.config().server.bind.clone();
    let app = router(service);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(bind = %bind, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Deserialize)]
struct UpsertRequest {
    id: i64,
    content: String,
    #[serde(default = "default_mode")]
    mode: UpsertMode,
}

fn default_mode() -> UpsertMode {
    UpsertMode::Update
}

#[derive(Serialize)]
struct UpsertResponse {
    id: i64,
    chunks: usize,
}

async fn embedding_upsert(
    State(state): State<AppState>,
    Json(req): Json<UpsertRequest>,
) -> Result<Json<UpsertResponse>, AppError> {
    let chunks = state
        .service
        .embedding_upsert(req.id, &req.content, req.mode)
        .await?;
    Ok(Json(UpsertResponse { id: req.id, chunks }))
}

#[derive(Deserialize)]
struct DeleteRequest {
    id: i64,
}

#[derive(Serialize)]
struct DeleteResponse {
    id: i64,
    removed: usize,
}

async fn embedding_delete(
    State(state): State<AppState>,
    Json(req): Json<DeleteRequest>,
) -> Result<Json<DeleteResponse>, AppError> {
    let removed = state.service.embedding_delete(req.id).await?;
    Ok(Json(DeleteResponse {
        id: req.id,
        removed,
    }))
}

#[derive(Deserialize)]
struct ChatRequest {
    question: String,
    #[serde(default)]
    conversation: Vec<ConversationTurn>,
}

async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>>, AppError> {
    let reply = state
        .service
        .chat_completion(&req.question, &req.conversation)
        .await?;

    // Serialize the supporting-notes event before streaming starts, so a
    // failure surfaces as a normal error response instead of a degraded
    // stream with the context silently missing.
    let notes_event = Event::default()
        .event("notes")
        .json_data(&reply.notes)
        .map_err(|e| AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "serialize_error",
            message: e.to_string(),
        })?;

    let stream = async_stream::stream! {
        yield Ok(notes_event);

        let mut fragments = reply.stream;
        while let Some(item) = fragments.next().await {
            match item {
                Ok(text) => {
                    yield Ok(Event::default().event("delta").data(text));
                }
                Err(e) => {
                    yield Ok(Event::default().event("error").data(e.to_string()));
                    break;
                }
            }
        }

        yield Ok(Event::default().event("done").data(""));
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[derive(Deserialize)]
struct TranscribeRequest {
    path: String,
}

#[derive(Serialize)]
struct TranscribeResponse {
    text: String,
}

async fn transcribe(
    State(state): State<AppState>,
    Json(req): Json<TranscribeRequest>,
) -> Result<Json<TranscribeResponse>, AppError> {
    let text = state
        .service
        .transcribe(std::path::Path::new(&req.path))
        .await?;
    Ok(Json(TranscribeResponse { text }))
}
