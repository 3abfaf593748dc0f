//! Model backend adapter: the chat/embedding seam between the pipeline
//! and the locally hosted runtime, plus the per-call policies that belong
//! at that seam (timeouts, retry-once on transport faults, JSON noise
//! stripping, bounded in-flight gate).

pub mod backend;
pub mod client;
pub mod json;
pub mod ollama;

pub use backend::{BackendError, ChatCall, ChatMessage, ChatOutcome, ModelBackend, Role};
pub use client::{deadline_in, ModelClient};
pub use ollama::OllamaBackend;
