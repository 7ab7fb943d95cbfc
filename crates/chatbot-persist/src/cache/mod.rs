mod local;
#[cfg(feature = "redis")]
mod remote;

use async_trait::async_trait;
use chatbot_types::{ConversationThread, Feedback, Message, ThreadUpdate};

pub use local::LocalThreadCache;
#[cfg(feature = "redis")]
pub use remote::RedisThreadCache;

/// Fast Store: low-latency per-thread conversation state.
///
/// Every method reports failure as `false` / `None` / empty. Transport
/// errors of a remote backend are logged by the implementation and never
/// reach the caller.
#[async_trait]
pub trait ThreadCache: Send + Sync {
    /// Short name of the backend, for logs and health output.
    fn backend_name(&self) -> &'static str;

    /// Create an empty thread. Returns false if `thread_id` already exists.
    async fn create_thread(&self, thread_id: &str, user_id: &str) -> bool;

    async fn is_thread(&self, thread_id: &str) -> bool;

    /// Append messages and refresh timestamps, creating the thread first
    /// when it does not exist.
    async fn update_thread(&self, thread_id: &str, update: ThreadUpdate) -> bool;

    /// Seed the cache with a full record loaded from the durable tier.
    ///
    /// Only writes when the thread is absent, so two concurrent misses on the
    /// same id cannot duplicate its history. Returns false if nothing was
    /// written.
    async fn backfill_thread(&self, thread: &ConversationThread) -> bool;

    async fn get_thread_info(&self, thread_id: &str) -> Option<ConversationThread>;

    async fn get_messages(&self, thread_id: &str) -> Vec<Message>;

    /// Attach `feedback` to the last message. False if the thread is missing
    /// or has no history.
    async fn record_feedback(&self, thread_id: &str, feedback: Feedback) -> bool;

    /// Returns false if nothing existed for `thread_id`.
    async fn delete_thread(&self, thread_id: &str) -> bool;
}
