use chatbot_types::ValidationError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[cfg(feature = "redis")]
    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Thread not found: {0}")]
    ThreadNotFound(String),

    #[error("Unable to allocate a unique thread id after {0} attempts")]
    AllocationFailed(usize),

    #[error("Gave up writing thread {0} after repeated concurrent modifications")]
    WriteConflict(String),

    #[error("Durable write failed for thread {0}")]
    WriteFailed(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PersistError>;
