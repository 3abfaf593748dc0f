use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Internal fault taxonomy. These never reach a client verbatim — the
/// orchestrator maps every failure onto an [`ErrorCode`] first.
#[derive(Debug, Error)]
pub enum PalisadeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Context registry error: {0}")]
    Context(String),

    #[error("Model backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, PalisadeError>;

/// Terminal pipeline outcomes, one-to-one with the user-visible error
/// codes in the /chat envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    RateLimited,
    InputTooLong,
    BlockedInput,
    OutOfScope,
    SafetyFailed,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::InputTooLong => "INPUT_TOO_LONG",
            ErrorCode::BlockedInput => "BLOCKED_INPUT",
            ErrorCode::OutOfScope => "OUT_OF_SCOPE",
            ErrorCode::SafetyFailed => "SAFETY_FAILED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    /// The canned reply for this code. Constant strings only — internal
    /// detail is never interpolated into a client-visible message.
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorCode::RateLimited => {
                "You're sending messages a bit too quickly. Please wait a moment and try again."
            }
            ErrorCode::InputTooLong => {
                "That message is too long for me. Could you trim it down to under 2000 characters?"
            }
            ErrorCode::BlockedInput => {
                "I can't help with that request. Feel free to ask me about Kellogg's work, projects, or interests."
            }
            ErrorCode::OutOfScope => {
                "That's outside what I can talk about — I only answer questions about Kellogg. Ask me about their experience, projects, or hobbies!"
            }
            ErrorCode::SafetyFailed => {
                "Let me rephrase that — I wasn't happy with my answer. Could you ask the question again, maybe worded a little differently?"
            }
            ErrorCode::InternalError => {
                "Something went wrong on my end. Please try again in a moment."
            }
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
