use axum::response::sse::Event;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ChunkMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ChainResponseChoice {
    pub index: u32,
    pub message: ChunkMessage,
    #[serde(default)]
    pub finish_reason: String,
}

/// One streamed piece of an assistant reply.
///
/// Every chunk of one reply shares `id`. The last chunk carries
/// `finish_reason = "[DONE]"` and a blank content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    pub id: String,
    pub choices: Vec<ChainResponseChoice>,
    pub thread_id: String,
}

impl ChainResponse {
    fn single(id: &str, thread_id: &str, content: String, finish_reason: &str) -> Self {
        Self {
            id: id.to_string(),
            choices: vec![ChainResponseChoice {
                index: 0,
                message: ChunkMessage {
                    role: "assistant".to_string(),
                    content,
                },
                finish_reason: finish_reason.to_string(),
            }],
            thread_id: thread_id.to_string(),
        }
    }

    pub fn delta(id: &str, thread_id: &str, content: impl Into<String>) -> Self {
        Self::single(id, thread_id, content.into(), "")
    }

    pub fn done(id: &str, thread_id: &str) -> Self {
        Self::single(id, thread_id, " ".to_string(), DONE_MARKER)
    }

    pub fn is_done(&self) -> bool {
        self.choices.iter().any(|c| c.finish_reason == DONE_MARKER)
    }

    pub fn to_event(&self) -> Event {
        Event::default().json_data(self).unwrap_or_else(|e| {
            tracing::error!("Failed to encode stream chunk: {}", e);
            Event::default().comment("encoding error")
        })
    }
}
