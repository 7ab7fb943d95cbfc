use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;
use crate::sanitize::sanitize_content;
use crate::timestamp::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            _ => Err(ValidationError::InvalidRole(s.to_string())),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Rating in `[-1.0, 1.0]` attached to the most recent message of a thread.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Feedback(f64);

impl Feedback {
    pub fn new(score: f64) -> Result<Self, ValidationError> {
        if !score.is_finite() || !(-1.0..=1.0).contains(&score) {
            return Err(ValidationError::FeedbackOutOfRange(score));
        }
        Ok(Self(score))
    }

    pub fn score(&self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for Feedback {
    type Error = ValidationError;

    fn try_from(score: f64) -> Result<Self, Self::Error> {
        Feedback::new(score)
    }
}

impl From<Feedback> for f64 {
    fn from(feedback: Feedback) -> Self {
        feedback.0
    }
}

/// One entry of a conversation history.
///
/// Stored as `{role, content, timestamp, feedback?}` in every tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Feedback>,
}

impl Message {
    /// Sanitizes `content` and stamps the message with the current time.
    pub fn new(role: Role, content: impl AsRef<str>) -> Result<Self, ValidationError> {
        Ok(Self {
            role,
            content: sanitize_content(content.as_ref())?,
            timestamp: Timestamp::now(),
            feedback: None,
        })
    }

    /// Build a message from text that already went through
    /// [`sanitize_content`], keeping it byte for byte.
    pub fn from_sanitized(role: Role, content: String) -> Self {
        Self {
            role,
            content,
            timestamp: Timestamp::now(),
            feedback: None,
        }
    }

    pub fn user(content: impl AsRef<str>) -> Result<Self, ValidationError> {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl AsRef<str>) -> Result<Self, ValidationError> {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl AsRef<str>) -> Result<Self, ValidationError> {
        Self::new(Role::System, content)
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }
}
