use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::backend::{BackendError, ChatCall, ChatOutcome, ModelBackend};
use crate::json::parse_model_json;

/// Deadline-aware wrapper around a [`ModelBackend`].
///
/// Adds the three behaviors every caller needs and none should reimplement:
/// a bounded concurrency gate (GPU protection), retry-once on transport
/// errors, and strict-JSON parsing for classifier calls.
pub struct ModelClient {
    backend: Arc<dyn ModelBackend>,
    gate: Arc<Semaphore>,
}

impl ModelClient {
    pub fn new(backend: Arc<dyn ModelBackend>, max_in_flight: usize) -> Self {
        Self {
            backend,
            gate: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// One chat call under the gate, honoring `deadline`.
    ///
    /// Transport errors get exactly one retry, and only while deadline
    /// headroom remains. Content errors (API status, parse) do not retry.
    pub async fn chat(&self, call: &ChatCall, deadline: Instant) -> Result<ChatOutcome, BackendError> {
        let _permit = self.enter_gate(deadline).await?;

        match self.chat_once(call, deadline).await {
            Err(e) if e.is_retryable() && Instant::now() < deadline => {
                warn!(model = %call.model, error = %e, "transport error, retrying once");
                self.chat_once(call, deadline).await
            }
            other => other,
        }
    }

    /// Chat call whose response must parse as `T` after fence stripping.
    /// Returns the outcome alongside so callers can record token usage.
    pub async fn chat_json<T: DeserializeOwned>(
        &self,
        call: &ChatCall,
        deadline: Instant,
    ) -> Result<(T, ChatOutcome), BackendError> {
        let outcome = self.chat(call, deadline).await?;
        let parsed = parse_model_json(&outcome.content)?;
        Ok((parsed, outcome))
    }

    /// Embedding call under the same gate, deadline, and retry rules as
    /// [`chat`].
    ///
    /// [`chat`]: ModelClient::chat
    pub async fn embed(
        &self,
        model: &str,
        text: &str,
        deadline: Instant,
    ) -> Result<Vec<f32>, BackendError> {
        let _permit = self.enter_gate(deadline).await?;

        match self.embed_once(model, text, deadline).await {
            Err(e) if e.is_retryable() && Instant::now() < deadline => {
                warn!(model, error = %e, "transport error, retrying once");
                self.embed_once(model, text, deadline).await
            }
            other => other,
        }
    }

    pub async fn probe(&self) -> bool {
        self.backend.probe().await
    }

    async fn chat_once(&self, call: &ChatCall, deadline: Instant) -> Result<ChatOutcome, BackendError> {
        match tokio::time::timeout_at(deadline, self.backend.chat(call)).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Transport("chat call hit deadline".to_string())),
        }
    }

    async fn embed_once(
        &self,
        model: &str,
        text: &str,
        deadline: Instant,
    ) -> Result<Vec<f32>, BackendError> {
        match tokio::time::timeout_at(deadline, self.backend.embed(model, text)).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Transport("embed call hit deadline".to_string())),
        }
    }

    /// Acquire a gate permit or fail with `GateSaturated` at the deadline.
    /// Requests waiting here share the overall request deadline — they are
    /// never queued past it.
    async fn enter_gate(
        &self,
        deadline: Instant,
    ) -> Result<tokio::sync::OwnedSemaphorePermit, BackendError> {
        match tokio::time::timeout_at(deadline, Arc::clone(&self.gate).acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(BackendError::Cancelled), // gate closed on shutdown
            Err(_) => {
                debug!("model gate not entered before deadline");
                Err(BackendError::GateSaturated)
            }
        }
    }
}

/// Convenience for callers that think in budgets rather than instants.
pub fn deadline_in(budget: Duration) -> Instant {
    Instant::now() + budget
}
