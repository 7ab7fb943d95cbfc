use thiserror::Error;

/// Input rejected at the boundary, before it reaches any store.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Message content cannot be empty")]
    EmptyContent,

    #[error("Role must be one of 'user', 'assistant' or 'system', got '{0}'")]
    InvalidRole(String),

    #[error("Feedback must be within [-1.0, 1.0], got {0}")]
    FeedbackOutOfRange(f64),
}
