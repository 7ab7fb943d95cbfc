use async_trait::async_trait;
use chatbot_types::{ConversationThread, Feedback, Message, ThreadUpdate, Timestamp};
use redis::aio::ConnectionManager;
use std::sync::OnceLock;

use super::ThreadCache;
use crate::config::CacheConfig;
use crate::error::{PersistError, Result};

/// Redis key layout for one thread. Every key shares the thread's expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ThreadKeys {
    history: String,
    user_id: String,
    start: String,
    last: String,
}

impl ThreadKeys {
    fn new(thread_id: &str) -> Self {
        Self {
            history: format!("{thread_id}:conversation_history"),
            user_id: format!("{thread_id}:user_id"),
            start: format!("{thread_id}:start_conversation_time"),
            last: format!("{thread_id}:last_conversation_time"),
        }
    }

    fn all(&self) -> [&str; 4] {
        [&self.history, &self.user_id, &self.start, &self.last]
    }
}

const MAX_FEEDBACK_ATTEMPTS: usize = 5;

// Rewrites the last history entry only if it is still the one the caller
// read. Returns 0 when an append moved the tail in between.
const REPLACE_LAST_SCRIPT: &str = r#"
if redis.call('LINDEX', KEYS[1], -1) ~= ARGV[1] then
    return 0
end
redis.call('LSET', KEYS[1], -1, ARGV[2])
redis.call('EXPIRE', KEYS[1], ARGV[3])
return 1
"#;

fn replace_last_script() -> &'static redis::Script {
    static SCRIPT: OnceLock<redis::Script> = OnceLock::new();
    SCRIPT.get_or_init(|| redis::Script::new(REPLACE_LAST_SCRIPT))
}

/// Fast Store backed by Redis with a sliding per-key expiry.
///
/// The start-time key doubles as the existence marker, which lets creation
/// rely on `SET NX` instead of a check-then-write.
#[derive(Clone)]
pub struct RedisThreadCache {
    connection: ConnectionManager,
    expiry_secs: u64,
}

impl RedisThreadCache {
    pub async fn connect(config: &CacheConfig) -> Result<Self> {
        let url = config.connection_url();
        let client = redis::Client::open(url.as_str())
            .map_err(|e| PersistError::Connection(e.to_string()))?;
        let connection = client
            .get_connection_manager()
            .await
            .map_err(|e| PersistError::Connection(e.to_string()))?;

        tracing::info!(
            url = %url,
            expiry_secs = config.expiry().as_secs(),
            "Connected to Redis thread cache"
        );

        Ok(Self {
            connection,
            expiry_secs: config.expiry().as_secs().max(1),
        })
    }

    async fn try_create(&self, thread_id: &str, user_id: &str) -> Result<bool> {
        let keys = ThreadKeys::new(thread_id);
        let now = Timestamp::now().to_canonical();
        let mut con = self.connection.clone();

        let claimed: Option<String> = redis::cmd("SET")
            .arg(&keys.start)
            .arg(&now)
            .arg("NX")
            .arg("EX")
            .arg(self.expiry_secs)
            .query_async(&mut con)
            .await?;
        if claimed.is_none() {
            return Ok(false);
        }

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("SET").arg(&keys.last).arg(&now).arg("EX").arg(self.expiry_secs).ignore()
            .cmd("SET").arg(&keys.user_id).arg(user_id).arg("EX").arg(self.expiry_secs).ignore();
        let _: () = pipe.query_async(&mut con).await?;
        Ok(true)
    }

    async fn try_update(&self, thread_id: &str, update: ThreadUpdate) -> Result<()> {
        let keys = ThreadKeys::new(thread_id);
        let now = Timestamp::now();
        let start = update.start_conversation_time.unwrap_or(now).to_canonical();
        let last = update.last_conversation_time.unwrap_or(now).to_canonical();
        let encoded = encode_messages(&update.messages)?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        // First writer of the start time wins; later calls only refresh its expiry.
        pipe.cmd("SET").arg(&keys.start).arg(&start).arg("NX").arg("EX").arg(self.expiry_secs).ignore();
        pipe.cmd("EXPIRE").arg(&keys.start).arg(self.expiry_secs).ignore();
        pipe.cmd("SET").arg(&keys.last).arg(&last).arg("EX").arg(self.expiry_secs).ignore();
        if update.user_id.is_empty() {
            pipe.cmd("EXPIRE").arg(&keys.user_id).arg(self.expiry_secs).ignore();
        } else {
            pipe.cmd("SET").arg(&keys.user_id).arg(&update.user_id).arg("EX").arg(self.expiry_secs).ignore();
        }
        if !encoded.is_empty() {
            pipe.cmd("RPUSH").arg(&keys.history).arg(encoded).ignore();
        }
        pipe.cmd("EXPIRE").arg(&keys.history).arg(self.expiry_secs).ignore();

        let mut con = self.connection.clone();
        let _: () = pipe.query_async(&mut con).await?;
        Ok(())
    }

    async fn try_backfill(&self, thread: &ConversationThread) -> Result<bool> {
        let keys = ThreadKeys::new(&thread.thread_id);
        let mut con = self.connection.clone();

        let claimed: Option<String> = redis::cmd("SET")
            .arg(&keys.start)
            .arg(thread.start_conversation_time.to_canonical())
            .arg("NX")
            .arg("EX")
            .arg(self.expiry_secs)
            .query_async(&mut con)
            .await?;
        if claimed.is_none() {
            return Ok(false);
        }

        let encoded = encode_messages(&thread.conversation_history)?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        // A history list can outlive its start key by a few milliseconds.
        pipe.cmd("DEL").arg(&keys.history).ignore();
        if !encoded.is_empty() {
            pipe.cmd("RPUSH").arg(&keys.history).arg(encoded).ignore();
            pipe.cmd("EXPIRE").arg(&keys.history).arg(self.expiry_secs).ignore();
        }
        pipe.cmd("SET")
            .arg(&keys.last)
            .arg(thread.last_conversation_time.to_canonical())
            .arg("EX")
            .arg(self.expiry_secs)
            .ignore();
        pipe.cmd("SET").arg(&keys.user_id).arg(&thread.user_id).arg("EX").arg(self.expiry_secs).ignore();
        let _: () = pipe.query_async(&mut con).await?;
        Ok(true)
    }

    async fn try_is_thread(&self, thread_id: &str) -> Result<bool> {
        let keys = ThreadKeys::new(thread_id);
        let mut con = self.connection.clone();
        let exists: bool = redis::cmd("EXISTS").arg(&keys.start).query_async(&mut con).await?;
        Ok(exists)
    }

    async fn try_get_thread(&self, thread_id: &str) -> Result<Option<ConversationThread>> {
        let keys = ThreadKeys::new(thread_id);
        let mut con = self.connection.clone();

        let mut pipe = redis::pipe();
        pipe.cmd("GET").arg(&keys.user_id)
            .cmd("GET").arg(&keys.start)
            .cmd("GET").arg(&keys.last)
            .cmd("LRANGE").arg(&keys.history).arg(0).arg(-1);
        let (user_id, start, last, history): (Option<String>, Option<String>, Option<String>, Vec<String>) =
            pipe.query_async(&mut con).await?;

        let Some(start) = start else {
            return Ok(None);
        };
        let start = Timestamp::parse(&start)?;
        let last = match last {
            Some(last) => Timestamp::parse(&last)?,
            None => start,
        };

        Ok(Some(ConversationThread {
            thread_id: thread_id.to_string(),
            user_id: user_id.unwrap_or_default(),
            conversation_history: decode_messages(&history)?,
            start_conversation_time: start,
            last_conversation_time: last,
        }))
    }

    async fn try_get_messages(&self, thread_id: &str) -> Result<Vec<Message>> {
        let keys = ThreadKeys::new(thread_id);
        let mut con = self.connection.clone();
        let history: Vec<String> = redis::cmd("LRANGE")
            .arg(&keys.history)
            .arg(0)
            .arg(-1)
            .query_async(&mut con)
            .await?;
        decode_messages(&history)
    }

    async fn try_record_feedback(&self, thread_id: &str, feedback: Feedback) -> Result<bool> {
        let keys = ThreadKeys::new(thread_id);
        let mut con = self.connection.clone();

        for attempt in 1..=MAX_FEEDBACK_ATTEMPTS {
            let last: Option<String> = redis::cmd("LINDEX")
                .arg(&keys.history)
                .arg(-1)
                .query_async(&mut con)
                .await?;
            let Some(last) = last else {
                return Ok(false);
            };

            let mut message: Message = serde_json::from_str(&last)?;
            message.feedback = Some(feedback);

            let replaced: i64 = replace_last_script()
                .key(&keys.history)
                .arg(&last)
                .arg(serde_json::to_string(&message)?)
                .arg(self.expiry_secs)
                .invoke_async(&mut con)
                .await?;
            if replaced == 1 {
                return Ok(true);
            }
            tracing::debug!(thread_id, attempt, "History tail moved while scoring, retrying");
        }

        tracing::warn!(thread_id, "History kept changing, feedback not cached");
        Ok(false)
    }

    async fn try_delete(&self, thread_id: &str) -> Result<bool> {
        let keys = ThreadKeys::new(thread_id);
        let mut con = self.connection.clone();

        let mut cmd = redis::cmd("DEL");
        for key in keys.all() {
            cmd.arg(key);
        }
        let removed: i64 = cmd.query_async(&mut con).await?;
        Ok(removed > 0)
    }
}

fn encode_messages(messages: &[Message]) -> Result<Vec<String>> {
    messages
        .iter()
        .map(|m| serde_json::to_string(m).map_err(PersistError::from))
        .collect()
}

fn decode_messages(raw: &[String]) -> Result<Vec<Message>> {
    raw.iter()
        .map(|entry| serde_json::from_str(entry).map_err(PersistError::from))
        .collect()
}

#[async_trait]
impl ThreadCache for RedisThreadCache {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn create_thread(&self, thread_id: &str, user_id: &str) -> bool {
        match self.try_create(thread_id, user_id).await {
            Ok(created) => {
                if !created {
                    tracing::debug!(thread_id, "Thread already exists in cache");
                }
                created
            }
            Err(e) => {
                tracing::warn!(thread_id, error = %e, "Failed to create thread in Redis");
                false
            }
        }
    }

    async fn is_thread(&self, thread_id: &str) -> bool {
        self.try_is_thread(thread_id).await.unwrap_or_else(|e| {
            tracing::warn!(thread_id, error = %e, "Failed to check thread in Redis");
            false
        })
    }

    async fn update_thread(&self, thread_id: &str, update: ThreadUpdate) -> bool {
        match self.try_update(thread_id, update).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(thread_id, error = %e, "Failed to update thread in Redis");
                false
            }
        }
    }

    async fn backfill_thread(&self, thread: &ConversationThread) -> bool {
        self.try_backfill(thread).await.unwrap_or_else(|e| {
            tracing::warn!(thread_id = %thread.thread_id, error = %e, "Failed to backfill thread into Redis");
            false
        })
    }

    async fn get_thread_info(&self, thread_id: &str) -> Option<ConversationThread> {
        self.try_get_thread(thread_id).await.unwrap_or_else(|e| {
            tracing::warn!(thread_id, error = %e, "Failed to read thread from Redis");
            None
        })
    }

    async fn get_messages(&self, thread_id: &str) -> Vec<Message> {
        self.try_get_messages(thread_id).await.unwrap_or_else(|e| {
            tracing::warn!(thread_id, error = %e, "Failed to read messages from Redis");
            Vec::new()
        })
    }

    async fn record_feedback(&self, thread_id: &str, feedback: Feedback) -> bool {
        self.try_record_feedback(thread_id, feedback).await.unwrap_or_else(|e| {
            tracing::warn!(thread_id, error = %e, "Failed to store feedback in Redis");
            false
        })
    }

    async fn delete_thread(&self, thread_id: &str) -> bool {
        self.try_delete(thread_id).await.unwrap_or_else(|e| {
            tracing::warn!(thread_id, error = %e, "Failed to delete thread from Redis");
            false
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let keys = ThreadKeys::new("abc");
        assert_eq!(
            keys.all(),
            [
                "abc:conversation_history",
                "abc:user_id",
                "abc:start_conversation_time",
                "abc:last_conversation_time",
            ]
        );
    }

    #[test]
    fn test_message_codec_matches_stored_layout() {
        let raw = vec![
            r#"{"role":"user","content":"hi","timestamp":"2024-01-01 00:00:00.000000"}"#.to_string(),
            r#"{"role":"assistant","content":"hello","timestamp":1704067201.5,"feedback":1.0}"#.to_string(),
        ];
        let messages = decode_messages(&raw).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].feedback.map(|f| f.score()), Some(1.0));

        let encoded = encode_messages(&messages[..1]).unwrap();
        assert_eq!(encoded[0], raw[0]);

        assert!(decode_messages(&["not json".to_string()]).is_err());
    }
}
