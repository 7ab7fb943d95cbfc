pub mod error;
pub mod message;
pub mod sanitize;
pub mod thread;
pub mod timestamp;

pub use error::ValidationError;
pub use message::{Feedback, Message, Role};
pub use sanitize::{normalize_prompt, sanitize_content};
pub use thread::{ConversationThread, ThreadUpdate};
pub use timestamp::{Timestamp, TimestampInput, CANONICAL_FORMAT};
