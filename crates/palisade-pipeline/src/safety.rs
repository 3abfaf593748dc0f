//! L8 — output safety. A small-model classifier over the near-final text,
//! fail-closed, plus an optional embedding-based grounding check that is
//! skipped (not failed) when no embedding model is configured or the
//! embedding call itself errors.

use std::time::Instant;

use serde::Deserialize;
use tokio::time::Instant as TokioInstant;
use tracing::{debug, warn};

use palisade_models::{ChatCall, ChatMessage, ModelClient};

use crate::prompts;
use crate::trace::RequestTrace;

#[derive(Debug, Clone)]
pub struct SafetyAssessment {
    pub safe: bool,
    pub issues: Vec<String>,
}

#[derive(Deserialize)]
struct RawSafety {
    safe: bool,
    #[serde(default)]
    issues: Vec<String>,
}

/// Classifier check. Any model or parse failure reads as unsafe — this is
/// the last gate before the visitor sees text.
pub async fn check(
    client: &ModelClient,
    model: &str,
    response: &str,
    trace: &RequestTrace,
    deadline: TokioInstant,
) -> SafetyAssessment {
    let prompt = prompts::render(prompts::SAFETY, &[("response", response)]);
    let call = ChatCall {
        model: model.to_string(),
        messages: vec![ChatMessage::user(prompt)],
        max_tokens: 256,
        temperature: 0.0,
    };

    let started = Instant::now();
    match client.chat_json::<RawSafety>(&call, deadline).await {
        Ok((raw, outcome)) => {
            trace.model_call(
                &outcome.model,
                started.elapsed().as_millis() as u64,
                outcome.tokens_in,
                outcome.tokens_out,
            );
            SafetyAssessment {
                safe: raw.safe,
                issues: raw.issues,
            }
        }
        Err(e) => {
            warn!(error = %e, "safety classifier failed, treating as unsafe");
            SafetyAssessment {
                safe: false,
                issues: vec!["safety_check_unavailable".to_string()],
            }
        }
    }
}

/// Embedding grounding check. `None` means "could not check" (no model
/// configured, or the embedding call failed) — the caller skips it rather
/// than failing the response, since the classifier check already ran.
pub async fn grounding(
    client: &ModelClient,
    embedding_model: Option<&str>,
    response: &str,
    context: &str,
    threshold: f32,
    deadline: TokioInstant,
) -> Option<bool> {
    let model = embedding_model?;
    if context.trim().is_empty() {
        return None;
    }

    let response_vec = match client.embed(model, response, deadline).await {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "response embedding failed, skipping grounding check");
            return None;
        }
    };
    let context_vec = match client.embed(model, context, deadline).await {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "context embedding failed, skipping grounding check");
            return None;
        }
    };

    let similarity = cosine(&response_vec, &context_vec);
    debug!(similarity, threshold, "grounding similarity");
    Some(similarity >= threshold)
}

pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
