use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use chatbot_types::{ConversationThread, Feedback, Message, ThreadUpdate};
use sqlx::any::{AnyPoolOptions, AnyRow};
use rand::Rng;
use sqlx::AnyPool;

use super::{ThreadDatastore, ThreadRow};
use crate::config::DatastoreConfig;
use crate::error::{PersistError, Result};

pub const CREATE_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS conversation_history (
    thread_id VARCHAR(255) PRIMARY KEY,
    user_id TEXT NOT NULL DEFAULT '',
    start_conversation_time TEXT NOT NULL,
    last_conversation_time TEXT NOT NULL,
    conversation_data TEXT NOT NULL DEFAULT '[]',
    version BIGINT NOT NULL DEFAULT 0
)
"#;

const SELECT_THREAD_SQL: &str = r#"
SELECT thread_id, user_id, start_conversation_time, last_conversation_time,
       conversation_data, version
FROM conversation_history
WHERE thread_id = $1
"#;

const INSERT_THREAD_SQL: &str = r#"
INSERT INTO conversation_history (
    thread_id, user_id, start_conversation_time, last_conversation_time,
    conversation_data, version
) VALUES ($1, $2, $3, $4, $5, $6)
"#;

// No-op write issued first in every write transaction. It takes the row lock
// on Postgres and the database write lock on SQLite, so concurrent writers
// queue instead of racing on a stale read.
const LOCK_THREAD_SQL: &str = r#"
UPDATE conversation_history SET version = version WHERE thread_id = $1
"#;

// Compare-and-swap on `version`: a concurrent writer bumps it first and this
// statement then matches no row.
const UPDATE_THREAD_SQL: &str = r#"
UPDATE conversation_history
SET user_id = $1, last_conversation_time = $2, conversation_data = $3, version = $4
WHERE thread_id = $5 AND version = $6
"#;

const DEFAULT_MAX_WRITE_ATTEMPTS: usize = 10;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(10);
const RETRY_MAX_DELAY: Duration = Duration::from_millis(320);

static INSTALL_DRIVERS: Once = Once::new();

/// Mutation applied by one read-modify-write cycle.
#[derive(Debug, Clone, Copy)]
enum WriteOp<'a> {
    Upsert(&'a ThreadUpdate),
    Feedback(Feedback),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteOutcome {
    Applied,
    /// The row exists but the operation had nothing to change.
    Unchanged,
    /// Another writer got there first; safe to retry.
    Conflict,
    Missing,
}

/// Lock waits that gave up and serialization failures. The transaction was
/// rolled back and can be replayed.
fn is_contention(err: &sqlx::Error) -> bool {
    let sqlx::Error::Database(db) = err else {
        return false;
    };
    if db.is_unique_violation() {
        return true;
    }
    // SQLite BUSY/LOCKED and their extended codes, Postgres serialization
    // failure and deadlock.
    let retryable_code = matches!(
        db.code().as_deref(),
        Some("5" | "6" | "261" | "262" | "517" | "40001" | "40P01")
    );
    retryable_code || db.message().contains("database is locked")
}

/// Exponential backoff with jitter in the upper half of the window.
fn retry_delay(attempt: usize) -> Duration {
    let exp = RETRY_BASE_DELAY.saturating_mul(1u32 << attempt.saturating_sub(1).min(16));
    let window = exp.min(RETRY_MAX_DELAY).as_millis() as u64;
    let jitter = rand::thread_rng().gen_range(0..=window / 2);
    Duration::from_millis(window / 2 + jitter)
}

/// Relational Durable Store over the sqlx `Any` driver.
///
/// Production runs on Postgres; SQLite URLs work with the same SQL.
/// History is one JSON document per row, so appends are a read-modify-write
/// guarded by a `version` column and retried on conflict.
#[derive(Clone)]
pub struct SqlThreadDatastore {
    pool: AnyPool,
    max_write_attempts: usize,
}

impl SqlThreadDatastore {
    pub async fn connect(config: &DatastoreConfig) -> Result<Self> {
        let options = AnyPoolOptions::new()
            .min_connections(config.pool_min)
            .max_connections(config.pool_max.max(1))
            .acquire_timeout(config.acquire_timeout());

        let store = Self::connect_with(&config.connection_url(), options).await?;
        tracing::info!(
            host = %config.host,
            database = %config.database,
            pool_min = config.pool_min,
            pool_max = config.pool_max,
            "Connected to durable thread store"
        );
        Ok(store)
    }

    pub async fn connect_with(url: &str, options: AnyPoolOptions) -> Result<Self> {
        INSTALL_DRIVERS.call_once(sqlx::any::install_default_drivers);
        let pool = options
            .connect(url)
            .await
            .map_err(|e| PersistError::Connection(e.to_string()))?;
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: AnyPool) -> Self {
        Self {
            pool,
            max_write_attempts: DEFAULT_MAX_WRITE_ATTEMPTS,
        }
    }

    pub fn with_max_write_attempts(mut self, attempts: usize) -> Self {
        self.max_write_attempts = attempts.max(1);
        self
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    /// Create the `conversation_history` table if it does not exist yet.
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(CREATE_TABLE_SQL).execute(&self.pool).await?;
        tracing::debug!("conversation_history schema ready");
        Ok(())
    }

    pub async fn fetch_row(&self, thread_id: &str) -> Result<Option<ThreadRow>> {
        let row: Option<AnyRow> = sqlx::query(SELECT_THREAD_SQL)
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(ThreadRow::from_any_row).transpose()
    }

    async fn write_once(&self, thread_id: &str, op: WriteOp<'_>) -> Result<WriteOutcome> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(LOCK_THREAD_SQL)
            .bind(thread_id)
            .execute(&mut *tx)
            .await?;

        let existing: Option<AnyRow> = sqlx::query(SELECT_THREAD_SQL)
            .bind(thread_id)
            .fetch_optional(&mut *tx)
            .await?;
        let existing = existing.as_ref().map(ThreadRow::from_any_row).transpose()?;

        let Some(row) = existing else {
            let WriteOp::Upsert(update) = op else {
                return Ok(WriteOutcome::Missing);
            };

            let thread = ConversationThread::from_update(thread_id, update.clone());
            let row = ThreadRow::from_thread(&thread, 0)?;
            let inserted = sqlx::query(INSERT_THREAD_SQL)
                .bind(&row.thread_id)
                .bind(&row.user_id)
                .bind(&row.start_conversation_time)
                .bind(&row.last_conversation_time)
                .bind(&row.conversation_data)
                .bind(row.version)
                .execute(&mut *tx)
                .await;

            return match inserted {
                Ok(_) => {
                    tx.commit().await?;
                    Ok(WriteOutcome::Applied)
                }
                Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(WriteOutcome::Conflict),
                Err(e) => Err(e.into()),
            };
        };

        let version = row.version;
        let mut thread = row.into_thread()?;
        match op {
            WriteOp::Upsert(update) => thread.apply_update(update.clone()),
            WriteOp::Feedback(feedback) => {
                if !thread.record_feedback(feedback) {
                    return Ok(WriteOutcome::Unchanged);
                }
            }
        }

        let updated = ThreadRow::from_thread(&thread, version + 1)?;
        let result = sqlx::query(UPDATE_THREAD_SQL)
            .bind(&updated.user_id)
            .bind(&updated.last_conversation_time)
            .bind(&updated.conversation_data)
            .bind(updated.version)
            .bind(thread_id)
            .bind(version)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Ok(WriteOutcome::Conflict);
        }
        tx.commit().await?;
        Ok(WriteOutcome::Applied)
    }

    async fn write(&self, thread_id: &str, op: WriteOp<'_>) -> Result<WriteOutcome> {
        for attempt in 1..=self.max_write_attempts {
            match self.write_once(thread_id, op).await {
                Ok(WriteOutcome::Conflict) => {
                    tracing::debug!(thread_id, attempt, "Concurrent thread write detected, retrying");
                }
                Err(PersistError::Database(e)) if is_contention(&e) => {
                    tracing::debug!(thread_id, attempt, error = %e, "Thread write contended, retrying");
                }
                result => return result,
            }
            if attempt < self.max_write_attempts {
                tokio::time::sleep(retry_delay(attempt)).await;
            }
        }
        tracing::warn!(thread_id, attempts = self.max_write_attempts, "Giving up on contended thread write");
        Err(PersistError::WriteConflict(thread_id.to_string()))
    }

    /// Upsert with the error surfaced, for callers that need the cause.
    pub async fn try_save_or_update(&self, thread_id: &str, update: &ThreadUpdate) -> Result<()> {
        self.write(thread_id, WriteOp::Upsert(update)).await.map(|_| ())
    }

    pub async fn try_record_feedback(&self, thread_id: &str, feedback: Feedback) -> Result<bool> {
        let outcome = self.write(thread_id, WriteOp::Feedback(feedback)).await?;
        Ok(outcome == WriteOutcome::Applied)
    }

    pub async fn try_delete(&self, thread_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM conversation_history WHERE thread_id = $1")
            .bind(thread_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn try_is_thread(&self, thread_id: &str) -> Result<bool> {
        let row: Option<AnyRow> = sqlx::query("SELECT 1 FROM conversation_history WHERE thread_id = $1")
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl ThreadDatastore for SqlThreadDatastore {
    async fn save_or_update_thread(&self, thread_id: &str, update: ThreadUpdate) -> bool {
        match self.try_save_or_update(thread_id, &update).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(thread_id, error = %e, "Failed to save thread to datastore");
                false
            }
        }
    }

    async fn is_thread(&self, thread_id: &str) -> bool {
        self.try_is_thread(thread_id).await.unwrap_or_else(|e| {
            tracing::warn!(thread_id, error = %e, "Failed to check thread in datastore");
            false
        })
    }

    async fn get_thread_info(&self, thread_id: &str) -> Option<ConversationThread> {
        let row = match self.fetch_row(thread_id).await {
            Ok(row) => row?,
            Err(e) => {
                tracing::warn!(thread_id, error = %e, "Failed to read thread from datastore");
                return None;
            }
        };
        row.into_thread()
            .map_err(|e| tracing::error!(thread_id, error = %e, "Stored thread is malformed"))
            .ok()
    }

    async fn get_messages(&self, thread_id: &str) -> Option<Vec<Message>> {
        let row = match self.fetch_row(thread_id).await {
            Ok(row) => row?,
            Err(e) => {
                tracing::warn!(thread_id, error = %e, "Failed to read messages from datastore");
                return None;
            }
        };
        row.messages()
            .map_err(|e| tracing::error!(thread_id, error = %e, "Stored history is malformed"))
            .ok()
    }

    async fn record_feedback(&self, thread_id: &str, feedback: Feedback) -> bool {
        self.try_record_feedback(thread_id, feedback).await.unwrap_or_else(|e| {
            tracing::error!(thread_id, error = %e, "Failed to store feedback in datastore");
            false
        })
    }

    async fn delete_thread(&self, thread_id: &str) -> bool {
        match self.try_delete(thread_id).await {
            Ok(deleted) => {
                if deleted {
                    tracing::info!(thread_id, "Deleted thread from datastore");
                }
                deleted
            }
            Err(e) => {
                tracing::error!(thread_id, error = %e, "Failed to delete thread from datastore");
                false
            }
        }
    }

    async fn ping(&self) -> bool {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Datastore ping failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_grows_and_is_capped() {
        for _ in 0..50 {
            let first = retry_delay(1);
            assert!(first >= Duration::from_millis(5) && first <= Duration::from_millis(10));

            let third = retry_delay(3);
            assert!(third >= Duration::from_millis(20) && third <= Duration::from_millis(40));

            let late = retry_delay(40);
            assert!(late >= RETRY_MAX_DELAY / 2 && late <= RETRY_MAX_DELAY);
        }
    }
}
