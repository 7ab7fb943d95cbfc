mod fallback;
mod openai;

use anyhow::Result;
use async_trait::async_trait;
use chatbot_types::Message;
use futures::Stream;
use std::pin::Pin;

pub use fallback::{fallback_chunks, pick_fallback, FALLBACK_RESPONSES};
pub use openai::OpenAiGenerator;

/// Reply fragments in arrival order. The stream ends when the reply is complete.
pub type ReplyStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub thread_id: String,
    /// Normalized text of the latest user message.
    pub prompt: String,
    /// Stored conversation before this prompt.
    pub history: Vec<Message>,
}

/// The "generate next message" capability consumed by the request handlers.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: GenerationRequest) -> Result<ReplyStream>;

    /// Drop any per-thread state (checkpoints, memory) the generator keeps.
    async fn forget_thread(&self, _thread_id: &str) -> Result<()> {
        Ok(())
    }
}
