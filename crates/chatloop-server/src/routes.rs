//! HTTP routes.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chatloop_core::messaging::MessageRole;
use chatloop_core::state::ThreadId;
use chatloop_runtime::{ActiveTurn, ChatAgent, ThreadSummary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::error::ApiError;
use crate::sse::turn_stream;

#[derive(Clone)]
pub struct AppState {
    pub agent: ChatAgent,
    started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(agent: ChatAgent) -> Self {
        Self {
            agent,
            started_at: Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub thread_id: Option<ThreadId>,
}

#[derive(Debug, Serialize)]
struct ThreadList {
    threads: Vec<ThreadSummary>,
}

#[derive(Debug, Serialize)]
struct TranscriptEntry<'a> {
    role: MessageRole,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    version: &'static str,
    started_at: DateTime<Utc>,
    active_turns: Vec<ActiveTurn>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/chat", post(chat))
        .route("/threads", get(list_threads).post(create_thread))
        .route("/threads/:id", delete(delete_thread))
        .route("/threads/:id/messages", get(thread_messages))
        .route("/threads/:id/cancel", post(cancel_turn))
        .with_state(state)
}

/// Start a turn and stream its events. Busy threads are rejected before any
/// streaming starts.
async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".into()));
    }
    let thread_id = request
        .thread_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let session = state.agent.start_turn(thread_id.clone(), request.message)?;
    tracing::info!(thread_id = %thread_id, "streaming turn");
    Ok(turn_stream(thread_id, session.into_stream()))
}

async fn create_thread() -> impl IntoResponse {
    Json(json!({ "thread_id": Uuid::new_v4().to_string() }))
}

async fn list_threads(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let threads = state.agent.list_threads().await?;
    Ok(Json(ThreadList { threads }))
}

async fn thread_messages(
    State(state): State<AppState>,
    Path(thread_id): Path<ThreadId>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation = state.agent.load_thread(&thread_id).await?;
    let messages: Vec<TranscriptEntry<'_>> = conversation
        .transcript()
        .map(|(role, content)| TranscriptEntry { role, content })
        .collect();
    Ok(Json(json!({ "messages": messages })))
}

async fn delete_thread(
    State(state): State<AppState>,
    Path(thread_id): Path<ThreadId>,
) -> Result<impl IntoResponse, ApiError> {
    state.agent.delete_thread(&thread_id).await?;
    Ok(Json(json!({ "success": true })))
}

async fn cancel_turn(
    State(state): State<AppState>,
    Path(thread_id): Path<ThreadId>,
) -> impl IntoResponse {
    Json(json!({ "cancelled": state.agent.cancel_turn(&thread_id) }))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        started_at: state.started_at,
        active_turns: state.agent.active_turns(),
    })
}
