mod models;
mod sql;

use async_trait::async_trait;
use chatbot_types::{ConversationThread, Feedback, Message, ThreadUpdate};

pub use models::ThreadRow;
pub use sql::{SqlThreadDatastore, CREATE_TABLE_SQL};

/// Durable Store: the source of truth for thread state.
///
/// Each call runs in its own transaction. Storage errors are logged by the
/// implementation and surface as `false` / `None`.
#[async_trait]
pub trait ThreadDatastore: Send + Sync {
    /// Insert the thread on first write. Later writes overwrite the owner
    /// (when non-empty) and `last_conversation_time`, and append `messages`
    /// after the stored history.
    async fn save_or_update_thread(&self, thread_id: &str, update: ThreadUpdate) -> bool;

    async fn is_thread(&self, thread_id: &str) -> bool;

    async fn get_thread_info(&self, thread_id: &str) -> Option<ConversationThread>;

    async fn get_messages(&self, thread_id: &str) -> Option<Vec<Message>>;

    /// Attach `feedback` to the last stored message.
    async fn record_feedback(&self, thread_id: &str, feedback: Feedback) -> bool;

    async fn delete_thread(&self, thread_id: &str) -> bool;

    /// Cheap reachability probe for health checks.
    async fn ping(&self) -> bool;
}
