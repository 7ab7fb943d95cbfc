use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chatbot_types::{ConversationThread, Message};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateThreadRequest {
    #[serde(default)]
    pub user_id: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateThreadResponse {
    pub thread_id: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ThreadResponse {
    pub thread_id: String,
    pub user_id: String,
    #[schema(value_type = Vec<Object>)]
    pub conversation_history: Vec<Message>,
    #[schema(value_type = String, example = "2025-02-28 19:59:04.992537")]
    pub start_conversation_time: String,
    #[schema(value_type = String, example = "2025-02-28 20:03:11.104211")]
    pub last_conversation_time: String,
}

impl From<ConversationThread> for ThreadResponse {
    fn from(thread: ConversationThread) -> Self {
        Self {
            start_conversation_time: thread.start_conversation_time.to_canonical(),
            last_conversation_time: thread.last_conversation_time.to_canonical(),
            thread_id: thread.thread_id,
            user_id: thread.user_id,
            conversation_history: thread.conversation_history,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessagesResponse {
    pub thread_id: String,
    #[schema(value_type = Vec<Object>)]
    pub messages: Vec<Message>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeleteThreadResponse {
    pub message: String,
}

/// Create a new conversation thread
#[utoipa::path(
    post,
    path = "/threads",
    request_body = CreateThreadRequest,
    responses(
        (status = 201, description = "Thread created", body = CreateThreadResponse),
        (status = 500, description = "Unable to generate thread_id")
    ),
    tag = "threads"
)]
pub async fn create_thread(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateThreadRequest>,
) -> ApiResult<(StatusCode, Json<CreateThreadResponse>)> {
    let thread_id = state.manager.create_thread(&req.user_id).await?;
    Ok((StatusCode::CREATED, Json(CreateThreadResponse { thread_id })))
}

/// Get a thread with its full conversation history
#[utoipa::path(
    get,
    path = "/threads/{thread_id}",
    params(
        ("thread_id" = String, Path, description = "Thread ID")
    ),
    responses(
        (status = 200, description = "Thread details", body = ThreadResponse),
        (status = 404, description = "Thread not found")
    ),
    tag = "threads"
)]
pub async fn get_thread(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<String>,
) -> ApiResult<Json<ThreadResponse>> {
    tracing::debug!(thread_id = %thread_id, "Getting conversation");
    let thread = state
        .manager
        .get_thread(&thread_id)
        .await
        .ok_or_else(|| ApiError::ThreadNotFound(thread_id.clone()))?;

    Ok(Json(thread.into()))
}

/// List the messages of a thread
#[utoipa::path(
    get,
    path = "/threads/{thread_id}/messages",
    params(
        ("thread_id" = String, Path, description = "Thread ID")
    ),
    responses(
        (status = 200, description = "Conversation history", body = MessagesResponse),
        (status = 404, description = "Thread not found")
    ),
    tag = "threads"
)]
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<String>,
) -> ApiResult<Json<MessagesResponse>> {
    let messages = state
        .manager
        .get_messages(&thread_id)
        .await
        .ok_or_else(|| ApiError::ThreadNotFound(thread_id.clone()))?;

    Ok(Json(MessagesResponse { thread_id, messages }))
}

/// Delete a thread from every store, including generation state
#[utoipa::path(
    delete,
    path = "/threads/{thread_id}",
    params(
        ("thread_id" = String, Path, description = "Thread ID")
    ),
    responses(
        (status = 200, description = "Deletion outcome", body = DeleteThreadResponse)
    ),
    tag = "threads"
)]
pub async fn delete_thread(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<String>,
) -> ApiResult<Json<DeleteThreadResponse>> {
    if !state.manager.delete_thread(&thread_id).await {
        tracing::info!(thread_id = %thread_id, "No conversation found to delete");
        return Ok(Json(DeleteThreadResponse {
            message: "Thread info not found".to_string(),
        }));
    }

    if let Err(e) = state.generator.forget_thread(&thread_id).await {
        tracing::warn!(thread_id = %thread_id, error = %e, "Failed to remove generation state");
    }

    Ok(Json(DeleteThreadResponse {
        message: "Thread info deleted".to_string(),
    }))
}
