use async_trait::async_trait;
use chatbot_types::{ConversationThread, Feedback, Message, ThreadUpdate};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::ThreadCache;

/// In-process Fast Store. Entries live until deleted or the process exits.
///
/// Each mutation runs under the shard lock of its key, so concurrent updates
/// to the same thread are applied one after another.
#[derive(Debug, Default)]
pub struct LocalThreadCache {
    threads: DashMap<String, ConversationThread>,
}

impl LocalThreadCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }
}

#[async_trait]
impl ThreadCache for LocalThreadCache {
    fn backend_name(&self) -> &'static str {
        "inmemory"
    }

    async fn create_thread(&self, thread_id: &str, user_id: &str) -> bool {
        match self.threads.entry(thread_id.to_string()) {
            Entry::Occupied(_) => {
                tracing::debug!(thread_id, "Thread already exists in cache");
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(ConversationThread::new(thread_id, user_id));
                true
            }
        }
    }

    async fn is_thread(&self, thread_id: &str) -> bool {
        self.threads.contains_key(thread_id)
    }

    async fn update_thread(&self, thread_id: &str, update: ThreadUpdate) -> bool {
        match self.threads.entry(thread_id.to_string()) {
            Entry::Occupied(mut existing) => existing.get_mut().apply_update(update),
            Entry::Vacant(slot) => {
                slot.insert(ConversationThread::from_update(thread_id, update));
            }
        }
        true
    }

    async fn backfill_thread(&self, thread: &ConversationThread) -> bool {
        match self.threads.entry(thread.thread_id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(thread.clone());
                true
            }
        }
    }

    async fn get_thread_info(&self, thread_id: &str) -> Option<ConversationThread> {
        self.threads.get(thread_id).map(|entry| entry.value().clone())
    }

    async fn get_messages(&self, thread_id: &str) -> Vec<Message> {
        self.threads
            .get(thread_id)
            .map(|entry| entry.conversation_history.clone())
            .unwrap_or_default()
    }

    async fn record_feedback(&self, thread_id: &str, feedback: Feedback) -> bool {
        let Some(mut thread) = self.threads.get_mut(thread_id) else {
            tracing::debug!(thread_id, "No thread in cache for feedback");
            return false;
        };
        let recorded = thread.record_feedback(feedback);
        if !recorded {
            tracing::debug!(thread_id, "No conversation history to attach feedback to");
        }
        recorded
    }

    async fn delete_thread(&self, thread_id: &str) -> bool {
        let removed = self.threads.remove(thread_id).is_some();
        if removed {
            tracing::debug!(thread_id, "Deleted thread from cache");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatbot_types::Timestamp;

    fn contents(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.content.as_str()).collect()
    }

    #[tokio::test]
    async fn test_create_is_exclusive() {
        let cache = LocalThreadCache::new();
        assert!(!cache.is_thread("t1").await);
        assert!(cache.create_thread("t1", "alice").await);
        assert!(!cache.create_thread("t1", "bob").await);

        let thread = cache.get_thread_info("t1").await.unwrap();
        assert_eq!(thread.user_id, "alice");
        assert!(thread.conversation_history.is_empty());
        assert_eq!(thread.start_conversation_time, thread.last_conversation_time);
    }

    #[tokio::test]
    async fn test_update_bootstraps_missing_thread_with_given_start() {
        let cache = LocalThreadCache::new();
        let start = Timestamp::parse("2024-05-01 08:00:00").unwrap();

        assert!(
            cache
                .update_thread(
                    "t1",
                    ThreadUpdate::new("alice")
                        .messages(vec![Message::user("m1").unwrap()])
                        .start_time(start),
                )
                .await
        );

        let thread = cache.get_thread_info("t1").await.unwrap();
        assert_eq!(thread.start_conversation_time, start);
        assert_eq!(contents(&thread.conversation_history), vec!["m1"]);
    }

    #[tokio::test]
    async fn test_update_appends_and_preserves_owner_and_start() {
        let cache = LocalThreadCache::new();
        cache.create_thread("t1", "alice").await;
        let start = cache.get_thread_info("t1").await.unwrap().start_conversation_time;

        cache
            .update_thread(
                "t1",
                ThreadUpdate::new("").messages(vec![
                    Message::user("m1").unwrap(),
                    Message::assistant("m2").unwrap(),
                ]),
            )
            .await;
        cache
            .update_thread(
                "t1",
                ThreadUpdate::new("")
                    .messages(vec![Message::user("m3").unwrap()])
                    .start_time(Timestamp::parse("1999-01-01").unwrap()),
            )
            .await;

        let thread = cache.get_thread_info("t1").await.unwrap();
        assert_eq!(contents(&thread.conversation_history), vec!["m1", "m2", "m3"]);
        assert_eq!(thread.user_id, "alice");
        assert_eq!(thread.start_conversation_time, start);
        assert_eq!(contents(&cache.get_messages("t1").await), vec!["m1", "m2", "m3"]);
    }

    #[tokio::test]
    async fn test_backfill_only_fills_absent_threads() {
        let cache = LocalThreadCache::new();
        let mut thread = ConversationThread::new("t1", "alice");
        thread.conversation_history.push(Message::user("from durable").unwrap());

        assert!(cache.backfill_thread(&thread).await);
        assert!(!cache.backfill_thread(&thread).await);
        assert_eq!(cache.get_messages("t1").await.len(), 1);
    }

    #[tokio::test]
    async fn test_feedback_and_delete() {
        let cache = LocalThreadCache::new();
        let score = Feedback::new(0.8).unwrap();

        assert!(!cache.record_feedback("missing", score).await);
        cache.create_thread("t1", "").await;
        assert!(!cache.record_feedback("t1", score).await);

        cache
            .update_thread("t1", ThreadUpdate::new("").messages(vec![Message::assistant("a").unwrap()]))
            .await;
        assert!(cache.record_feedback("t1", score).await);
        assert_eq!(
            cache.get_messages("t1").await[0].feedback.map(|f| f.score()),
            Some(0.8)
        );

        assert!(cache.delete_thread("t1").await);
        assert!(!cache.delete_thread("t1").await);
        assert!(cache.get_thread_info("t1").await.is_none());
        assert!(cache.get_messages("t1").await.is_empty());
        assert!(cache.is_empty());
    }
}
