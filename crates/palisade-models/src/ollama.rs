use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::backend::{BackendError, ChatCall, ChatOutcome, ModelBackend};

/// Per-call HTTP timeout. Generation on a 7B model can take a while on
/// CPU-only hosts; the orchestrator's stage deadlines cut in sooner when
/// configured tighter.
const CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Chat + embedding client for an Ollama-compatible local runtime.
pub struct OllamaBackend {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(CALL_TIMEOUT)
                .build()
                .expect("reqwest client construction is infallible with static options"),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ModelBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn chat(&self, call: &ChatCall) -> Result<ChatOutcome, BackendError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = serde_json::json!({
            "model": call.model,
            "messages": call.messages,
            "stream": false,
            "options": {
                "num_predict": call.max_tokens,
                "temperature": call.temperature,
            },
        });

        debug!(model = %call.model, "sending chat request");

        let resp = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "chat API error");
            return Err(BackendError::Api {
                status,
                message: text,
            });
        }

        let api: ApiChatResponse = resp
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))?;

        Ok(ChatOutcome {
            content: api.message.content,
            model: api.model,
            tokens_in: api.prompt_eval_count.unwrap_or(0),
            tokens_out: api.eval_count.unwrap_or(0),
        })
    }

    async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>, BackendError> {
        let url = format!("{}/api/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": model,
            "prompt": text,
        });

        let resp = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(BackendError::Api {
                status,
                message: text,
            });
        }

        let api: ApiEmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))?;

        Ok(api.embedding)
    }

    async fn probe(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> BackendError {
    if e.is_connect() || e.is_timeout() {
        BackendError::Transport(e.to_string())
    } else {
        BackendError::Transport(format!("request failed: {e}"))
    }
}

// Runtime API response types (private — deserialization only)

#[derive(Deserialize)]
struct ApiChatResponse {
    model: String,
    message: ApiMessage,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

#[derive(Deserialize)]
struct ApiMessage {
    content: String,
}

#[derive(Deserialize)]
struct ApiEmbeddingResponse {
    embedding: Vec<f32>,
}
