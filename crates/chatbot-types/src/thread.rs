use serde::{Deserialize, Serialize};

use crate::message::{Feedback, Message};
use crate::timestamp::Timestamp;

/// Full per-thread conversation state, identical in shape across tiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationThread {
    pub thread_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub conversation_history: Vec<Message>,
    pub start_conversation_time: Timestamp,
    pub last_conversation_time: Timestamp,
}

impl ConversationThread {
    /// Empty thread with both timestamps set to now.
    pub fn new(thread_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        let now = Timestamp::now();
        Self {
            thread_id: thread_id.into(),
            user_id: user_id.into(),
            conversation_history: Vec::new(),
            start_conversation_time: now,
            last_conversation_time: now,
        }
    }

    /// Fresh opaque identifier for a new thread.
    pub fn generate_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Bootstrap a thread that does not exist yet from an update.
    ///
    /// Missing timestamps default to now.
    pub fn from_update(thread_id: impl Into<String>, update: ThreadUpdate) -> Self {
        let now = Timestamp::now();
        Self {
            thread_id: thread_id.into(),
            user_id: update.user_id,
            conversation_history: update.messages,
            start_conversation_time: update.start_conversation_time.unwrap_or(now),
            last_conversation_time: update.last_conversation_time.unwrap_or(now),
        }
    }

    /// Merge an update into existing state.
    ///
    /// Messages are appended, the start time is kept, the last time is
    /// always overwritten and a non-empty owner replaces the stored one.
    pub fn apply_update(&mut self, update: ThreadUpdate) {
        if !update.user_id.is_empty() {
            self.user_id = update.user_id;
        }
        self.conversation_history.extend(update.messages);
        self.last_conversation_time = update.last_conversation_time.unwrap_or_else(Timestamp::now);
    }

    /// Attach `feedback` to the last message, replacing any previous score.
    /// Returns false when the history is empty.
    pub fn record_feedback(&mut self, feedback: Feedback) -> bool {
        match self.conversation_history.last_mut() {
            Some(last) => {
                last.feedback = Some(feedback);
                true
            }
            None => false,
        }
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.conversation_history.last()
    }
}

/// A write against one thread: new messages plus timestamp/owner changes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThreadUpdate {
    pub user_id: String,
    pub messages: Vec<Message>,
    pub start_conversation_time: Option<Timestamp>,
    pub last_conversation_time: Option<Timestamp>,
}

impl ThreadUpdate {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    pub fn messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    pub fn start_time(mut self, timestamp: Timestamp) -> Self {
        self.start_conversation_time = Some(timestamp);
        self
    }

    pub fn last_time(mut self, timestamp: Timestamp) -> Self {
        self.last_conversation_time = Some(timestamp);
        self
    }

    /// Update that reproduces `thread` exactly in a tier that lacks it.
    pub fn from_thread(thread: &ConversationThread) -> Self {
        Self {
            user_id: thread.user_id.clone(),
            messages: thread.conversation_history.clone(),
            start_conversation_time: Some(thread.start_conversation_time),
            last_conversation_time: Some(thread.last_conversation_time),
        }
    }
}
