use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use chatbot_persist::ThreadManager;
use chatbot_types::{normalize_prompt, sanitize_content, Message, Role};
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::{
    error::{ApiError, ApiResult},
    generation::{fallback_chunks, pick_fallback, GenerationRequest},
    state::AppState,
    streaming::ChainResponse,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct PromptMessage {
    #[schema(value_type = String, example = "user")]
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct GenerateRequest {
    #[serde(default)]
    pub user_id: String,
    /// Conversation so far as seen by the client. Only the last user
    /// message is sent to generation; earlier turns come from the store.
    pub messages: Vec<PromptMessage>,
}

fn sse(chunk: ChainResponse) -> Result<Event, Infallible> {
    Ok(chunk.to_event())
}

/// Generate and stream the reply to the latest user message
#[utoipa::path(
    post,
    path = "/threads/{thread_id}/generate",
    params(
        ("thread_id" = String, Path, description = "Thread ID")
    ),
    request_body = GenerateRequest,
    responses(
        (status = 200, description = "Streamed ChainResponse chunks", content_type = "text/event-stream", body = ChainResponse),
        (status = 400, description = "No usable user message"),
        (status = 404, description = "Thread not found")
    ),
    tag = "generate"
)]
pub async fn generate(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<String>,
    Json(req): Json<GenerateRequest>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let raw_prompt = req
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .ok_or_else(|| ApiError::BadRequest("Prompt has no user message".to_string()))?;

    let prompt = sanitize_content(&normalize_prompt(raw_prompt))?;
    let user_message = Message::from_sanitized(Role::User, prompt.clone());
    tracing::info!(thread_id = %thread_id, prompt = %prompt, "Normalized user input");

    let thread = state
        .manager
        .get_thread(&thread_id)
        .await
        .ok_or_else(|| ApiError::ThreadNotFound(thread_id.clone()))?;

    let generation = state
        .generator
        .generate(GenerationRequest {
            thread_id: thread_id.clone(),
            prompt,
            history: thread.conversation_history,
        })
        .await;

    let manager = Arc::clone(&state.manager);
    let user_id = req.user_id;

    let stream = async_stream::stream! {
        let resp_id = uuid::Uuid::new_v4().to_string();
        let mut reply = String::new();
        let mut completed = false;

        match generation {
            Ok(mut fragments) => {
                completed = true;
                while let Some(fragment) = fragments.next().await {
                    match fragment {
                        Ok(text) => {
                            reply.push_str(&text);
                            yield sse(ChainResponse::delta(&resp_id, &thread_id, text));
                        }
                        Err(e) => {
                            tracing::error!(thread_id = %thread_id, error = %e, "Generation failed mid-stream");
                            completed = false;
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::error!(thread_id = %thread_id, error = %e, "Generation failed");
            }
        }

        if reply.trim().is_empty() {
            for chunk in fallback_chunks(pick_fallback()) {
                yield sse(ChainResponse::delta(&resp_id, &thread_id, chunk));
            }
        } else if completed {
            record_exchange(&manager, &thread_id, &user_id, user_message, &reply).await;
        }

        yield sse(ChainResponse::done(&resp_id, &thread_id));
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Persist the prompt and its reply.
///
/// Runs on its own task so a client disconnect cannot abort a write that has
/// already been issued.
async fn record_exchange(
    manager: &Arc<ThreadManager>,
    thread_id: &str,
    user_id: &str,
    user_message: Message,
    reply: &str,
) {
    let assistant_message = match Message::assistant(reply) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(thread_id, error = %e, "Reply is not storable, skipping record");
            return;
        }
    };

    tracing::info!(thread_id, "Saving exchange to cache and datastore");
    let manager = Arc::clone(manager);
    let thread_id = thread_id.to_string();
    let user_id = user_id.to_string();
    let task = tokio::spawn(async move {
        manager
            .append_exchange(&thread_id, &user_id, user_message, assistant_message)
            .await
            .map_err(|e| (thread_id, e))
    });

    match task.await {
        Ok(Ok(())) => {}
        Ok(Err((thread_id, e))) => {
            tracing::error!(thread_id = %thread_id, error = %e, "Failed to record exchange");
        }
        Err(e) => tracing::error!(error = %e, "Record task panicked"),
    }
}
