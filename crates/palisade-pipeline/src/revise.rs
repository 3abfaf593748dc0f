//! L7 — response revision. Advisory only: when the checker call fails or
//! returns something unparseable, the draft passes through untouched.

use std::time::Instant;

use serde::Deserialize;
use tokio::time::Instant as TokioInstant;
use tracing::{debug, warn};

use palisade_models::{ChatCall, ChatMessage, ModelClient};

use crate::prompts;
use crate::trace::RequestTrace;

#[derive(Deserialize)]
struct RawRevision {
    needs_revision: bool,
    #[serde(default)]
    issues: Vec<String>,
    #[serde(default)]
    revised_response: Option<String>,
}

/// Run the revision check, returning the (possibly replaced) draft.
pub async fn revise(
    client: &ModelClient,
    model: &str,
    draft: &str,
    context: &str,
    trace: &RequestTrace,
    deadline: TokioInstant,
) -> String {
    let prompt = prompts::render(
        prompts::REVISION,
        &[("draft", draft), ("context", context)],
    );
    let call = ChatCall {
        model: model.to_string(),
        messages: vec![ChatMessage::user(prompt)],
        max_tokens: 1024,
        temperature: 0.0,
    };

    let started = Instant::now();
    match client.chat_json::<RawRevision>(&call, deadline).await {
        Ok((raw, outcome)) => {
            trace.model_call(
                &outcome.model,
                started.elapsed().as_millis() as u64,
                outcome.tokens_in,
                outcome.tokens_out,
            );
            match (raw.needs_revision, raw.revised_response) {
                (true, Some(revised)) if !revised.trim().is_empty() => {
                    debug!(issues = ?raw.issues, "revision applied");
                    revised.trim().to_string()
                }
                (true, _) => {
                    // Claimed revision without a replacement — keep the draft.
                    debug!(issues = ?raw.issues, "revision flagged but no replacement text");
                    draft.to_string()
                }
                (false, _) => draft.to_string(),
            }
        }
        Err(e) => {
            warn!(error = %e, "revision check failed, keeping draft");
            draft.to_string()
        }
    }
}
