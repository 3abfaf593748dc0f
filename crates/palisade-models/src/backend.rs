use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single message in a chat-completion call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat-completion request against the local runtime.
#[derive(Debug, Clone)]
pub struct ChatCall {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    /// Sampling temperature. Classifier calls run at 0.0 so constrained
    /// JSON output stays deterministic.
    pub temperature: f32,
}

/// Completed chat call with usage accounting for the request trace.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub content: String,
    pub model: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
}

/// Common interface for the model runtime. The pipeline never talks HTTP
/// directly — it sees only this seam, which is also where tests inject a
/// scripted double.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Send one chat-completion call, wait for the whole response.
    async fn chat(&self, call: &ChatCall) -> Result<ChatOutcome, BackendError>;

    /// Embed a single text into a vector.
    async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>, BackendError>;

    /// Cheap liveness probe; used by the /health endpoint.
    async fn probe(&self) -> bool;
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Connection refused, reset, DNS failure, or timeout. Retried once.
    #[error("transport error: {0}")]
    Transport(String),

    /// The runtime answered with a non-success status. Not retried.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The response body was not what the caller required (e.g. malformed
    /// JSON where strict JSON was expected). Not retried — the content is
    /// wrong, not the transport.
    #[error("parse error: {0}")]
    Parse(String),

    /// The concurrency gate could not be entered before the deadline.
    #[error("backend gate saturated")]
    GateSaturated,

    #[error("call cancelled")]
    Cancelled,
}

impl BackendError {
    /// Only transport faults are worth a second attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::Transport(_))
    }
}
