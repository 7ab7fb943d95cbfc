use std::sync::Arc;

use chatbot_types::{ConversationThread, Feedback, Message, ThreadUpdate};

use crate::cache::ThreadCache;
use crate::datastore::ThreadDatastore;
use crate::error::{PersistError, Result};

pub const DEFAULT_MAX_ALLOCATION_ATTEMPTS: usize = 5;

pub type IdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// One API over the Fast Store and the Durable Store.
///
/// Reads are cache-aside: the cache is tried first and refilled from the
/// datastore on a miss. Writes go to both tiers independently with no
/// cross-tier rollback; the datastore result decides success.
#[derive(Clone)]
pub struct ThreadManager {
    cache: Arc<dyn ThreadCache>,
    datastore: Arc<dyn ThreadDatastore>,
    id_generator: IdGenerator,
    max_allocation_attempts: usize,
}

impl ThreadManager {
    pub fn new(cache: Arc<dyn ThreadCache>, datastore: Arc<dyn ThreadDatastore>) -> Self {
        Self {
            cache,
            datastore,
            id_generator: Arc::new(ConversationThread::generate_id),
            max_allocation_attempts: DEFAULT_MAX_ALLOCATION_ATTEMPTS,
        }
    }

    pub fn with_id_generator(mut self, generator: IdGenerator) -> Self {
        self.id_generator = generator;
        self
    }

    pub fn with_max_allocation_attempts(mut self, attempts: usize) -> Self {
        self.max_allocation_attempts = attempts.max(1);
        self
    }

    pub fn cache(&self) -> &Arc<dyn ThreadCache> {
        &self.cache
    }

    pub fn datastore(&self) -> &Arc<dyn ThreadDatastore> {
        &self.datastore
    }

    /// Allocate a fresh thread id and write the empty thread to both tiers.
    pub async fn create_thread(&self, user_id: &str) -> Result<String> {
        for attempt in 1..=self.max_allocation_attempts {
            let thread_id = (self.id_generator)();

            if self.datastore.is_thread(&thread_id).await {
                tracing::warn!(thread_id = %thread_id, attempt, "Thread id collision in datastore");
                continue;
            }
            if !self.cache.create_thread(&thread_id, user_id).await {
                if self.cache.is_thread(&thread_id).await {
                    tracing::warn!(thread_id = %thread_id, attempt, "Thread id collision in cache");
                    continue;
                }
                // Cache unavailable; the datastore alone decides whether the id is free.
                tracing::warn!(thread_id = %thread_id, "Cache create failed, writing datastore only");
            }

            let thread = self
                .cache
                .get_thread_info(&thread_id)
                .await
                .unwrap_or_else(|| ConversationThread::new(&thread_id, user_id));
            return self.persist_new_thread(thread).await;
        }

        tracing::error!(
            attempts = self.max_allocation_attempts,
            "Could not allocate a unique thread id"
        );
        Err(PersistError::AllocationFailed(self.max_allocation_attempts))
    }

    async fn persist_new_thread(&self, thread: ConversationThread) -> Result<String> {
        let thread_id = thread.thread_id.clone();
        if !self
            .datastore
            .save_or_update_thread(&thread_id, ThreadUpdate::from_thread(&thread))
            .await
        {
            self.cache.delete_thread(&thread_id).await;
            return Err(PersistError::WriteFailed(thread_id));
        }

        tracing::info!(thread_id = %thread_id, user_id = %thread.user_id, "Created thread");
        Ok(thread_id)
    }

    pub async fn thread_exists(&self, thread_id: &str) -> bool {
        if self.cache.is_thread(thread_id).await {
            return true;
        }
        self.load_from_datastore(thread_id).await.is_some()
    }

    pub async fn get_thread(&self, thread_id: &str) -> Option<ConversationThread> {
        if let Some(thread) = self.cache.get_thread_info(thread_id).await {
            return Some(thread);
        }
        self.load_from_datastore(thread_id).await
    }

    pub async fn get_messages(&self, thread_id: &str) -> Option<Vec<Message>> {
        self.get_thread(thread_id)
            .await
            .map(|thread| thread.conversation_history)
    }

    /// Read-repair: fetch from the datastore and seed the cache with it.
    async fn load_from_datastore(&self, thread_id: &str) -> Option<ConversationThread> {
        let thread = self.datastore.get_thread_info(thread_id).await?;
        if self.cache.backfill_thread(&thread).await {
            tracing::debug!(thread_id, backend = self.cache.backend_name(), "Backfilled cache from datastore");
        }
        Some(thread)
    }

    /// Append messages to an existing thread in both tiers.
    pub async fn append_messages(
        &self,
        thread_id: &str,
        user_id: &str,
        messages: Vec<Message>,
    ) -> Result<()> {
        if !self.thread_exists(thread_id).await {
            return Err(PersistError::ThreadNotFound(thread_id.to_string()));
        }

        let mut update = ThreadUpdate::new(user_id);
        if let Some(last) = messages.last() {
            update = update.last_time(last.timestamp);
        }
        let update = update.messages(messages);

        // Only append to a cache entry that already holds the full thread;
        // an update on a missing entry bootstraps it with just these messages.
        let cache_holds_thread = self.cache.is_thread(thread_id).await;
        let cache_write = async {
            if cache_holds_thread {
                self.cache.update_thread(thread_id, update.clone()).await
            } else {
                false
            }
        };
        let (cached, persisted) = tokio::join!(
            cache_write,
            self.datastore.save_or_update_thread(thread_id, update.clone()),
        );

        if !persisted {
            tracing::error!(thread_id, cached, "Durable append failed");
            return Err(PersistError::WriteFailed(thread_id.to_string()));
        }
        if !cached {
            // Drop whatever is cached so the next read repairs it from the datastore.
            tracing::warn!(thread_id, cache_holds_thread, "Cache not appended, invalidating cached thread");
            self.cache.delete_thread(thread_id).await;
        }
        Ok(())
    }

    /// Record one conversation round: the user's prompt and the reply to it.
    pub async fn append_exchange(
        &self,
        thread_id: &str,
        user_id: &str,
        user_message: Message,
        assistant_message: Message,
    ) -> Result<()> {
        self.append_messages(thread_id, user_id, vec![user_message, assistant_message])
            .await
    }

    /// Delete from both tiers. True if either tier held the thread.
    pub async fn delete_thread(&self, thread_id: &str) -> bool {
        let (cached, persisted) = tokio::join!(
            self.cache.delete_thread(thread_id),
            self.datastore.delete_thread(thread_id),
        );
        tracing::info!(thread_id, cached, persisted, "Delete thread");
        cached || persisted
    }

    /// Attach a score to the thread's last message. `Ok(false)` if the
    /// thread has no messages yet.
    pub async fn record_feedback(&self, thread_id: &str, score: f64) -> Result<bool> {
        let feedback = Feedback::new(score)?;
        if !self.thread_exists(thread_id).await {
            return Err(PersistError::ThreadNotFound(thread_id.to_string()));
        }

        let (cached, persisted) = tokio::join!(
            self.cache.record_feedback(thread_id, feedback),
            self.datastore.record_feedback(thread_id, feedback),
        );
        if cached != persisted {
            tracing::warn!(thread_id, cached, persisted, "Feedback stored in only one tier");
        }
        Ok(cached || persisted)
    }
}
