use chatbot_types::{ConversationThread, Message, Timestamp};
use sqlx::any::AnyRow;
use sqlx::Row;

use crate::error::Result;

/// One `conversation_history` row as stored.
///
/// Timestamps are kept in their canonical text form and the history as a
/// JSON array, so the same row shape works on every supported backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadRow {
    pub thread_id: String,
    pub user_id: String,
    pub start_conversation_time: String,
    pub last_conversation_time: String,
    pub conversation_data: String,
    pub version: i64,
}

impl ThreadRow {
    pub fn from_thread(thread: &ConversationThread, version: i64) -> Result<Self> {
        Ok(Self {
            thread_id: thread.thread_id.clone(),
            user_id: thread.user_id.clone(),
            start_conversation_time: thread.start_conversation_time.to_canonical(),
            last_conversation_time: thread.last_conversation_time.to_canonical(),
            conversation_data: serde_json::to_string(&thread.conversation_history)?,
            version,
        })
    }

    pub(crate) fn from_any_row(row: &AnyRow) -> Result<Self> {
        Ok(Self {
            thread_id: row.try_get("thread_id")?,
            user_id: row.try_get("user_id")?,
            start_conversation_time: row.try_get("start_conversation_time")?,
            last_conversation_time: row.try_get("last_conversation_time")?,
            conversation_data: row.try_get("conversation_data")?,
            version: row.try_get("version")?,
        })
    }

    pub fn messages(&self) -> Result<Vec<Message>> {
        if self.conversation_data.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&self.conversation_data)?)
    }

    pub fn into_thread(self) -> Result<ConversationThread> {
        let conversation_history = self.messages()?;
        Ok(ConversationThread {
            start_conversation_time: Timestamp::parse(&self.start_conversation_time)?,
            last_conversation_time: Timestamp::parse(&self.last_conversation_time)?,
            thread_id: self.thread_id,
            user_id: self.user_id,
            conversation_history,
        })
    }
}
