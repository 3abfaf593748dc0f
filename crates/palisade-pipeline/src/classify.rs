//! L2 — jailbreak classifier adapter.
//!
//! One short call to the smallest model, constrained-JSON output, and a
//! fail-closed verdict policy: anything that is not a confident SAFE —
//! model error, timeout, malformed JSON, low confidence — blocks.

use std::time::Instant;

use serde::Deserialize;
use tokio::time::Instant as TokioInstant;
use tracing::{debug, warn};

use palisade_models::{ChatCall, ChatMessage, ModelClient};

use crate::prompts;
use crate::trace::RequestTrace;

/// Reason codes the classifier may emit; unknown values clamp to
/// "manipulation" (still an attack signal, never silently safe).
const REASON_CODES: [&str; 7] = [
    "none",
    "instruction_override",
    "prompt_extraction",
    "roleplay_attack",
    "encoding_trick",
    "manipulation",
    "multi_turn_attack",
];

/// Cap on each history turn fed to the classifier prompt.
const HISTORY_TURN_CHARS: usize = 300;

#[derive(Debug)]
pub enum JailbreakDecision {
    Pass,
    Block { reason: String },
}

#[derive(Deserialize)]
struct RawVerdict {
    classification: String,
    #[serde(default)]
    reason_code: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
}

/// Run the classifier over the sanitized message plus the last user turns
/// (multi-turn attacks only show in sequence).
pub async fn classify(
    client: &ModelClient,
    model: &str,
    message: &str,
    recent_user_turns: &[String],
    trace: &RequestTrace,
    deadline: TokioInstant,
) -> JailbreakDecision {
    let history = if recent_user_turns.is_empty() {
        "(none)".to_string()
    } else {
        recent_user_turns
            .iter()
            .map(|t| format!("- {}", truncate_chars(t, HISTORY_TURN_CHARS)))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let prompt = prompts::render(
        prompts::CLASSIFIER,
        &[("message", message), ("history", &history)],
    );

    let call = ChatCall {
        model: model.to_string(),
        messages: vec![ChatMessage::user(prompt)],
        max_tokens: 128,
        temperature: 0.0,
    };

    let started = Instant::now();
    let result = client.chat_json::<RawVerdict>(&call, deadline).await;

    match result {
        Ok((raw, outcome)) => {
            trace.model_call(
                &outcome.model,
                started.elapsed().as_millis() as u64,
                outcome.tokens_in,
                outcome.tokens_out,
            );
            decide(raw)
        }
        Err(e) => {
            // Fail closed: an unanswerable classifier is a blocked input.
            warn!(error = %e, "jailbreak classifier failed, blocking");
            JailbreakDecision::Block {
                reason: "classifier_error".to_string(),
            }
        }
    }
}

fn decide(raw: RawVerdict) -> JailbreakDecision {
    let confidence = raw.confidence.unwrap_or(0.0).clamp(0.0, 1.0);
    let reason = clamp_reason(raw.reason_code.as_deref());

    match raw.classification.trim().to_uppercase().as_str() {
        "BLOCKED" if confidence >= 0.5 => {
            debug!(reason, confidence, "classifier blocked input");
            JailbreakDecision::Block {
                reason: reason.to_string(),
            }
        }
        // BLOCKED below the confidence bar is not actionable on its own.
        "BLOCKED" => JailbreakDecision::Pass,
        "SAFE" if confidence < 0.3 => {
            debug!(confidence, "SAFE verdict below confidence floor, blocking");
            JailbreakDecision::Block {
                reason: "low_confidence_safe".to_string(),
            }
        }
        "SAFE" => JailbreakDecision::Pass,
        other => {
            warn!(classification = other, "unknown classification, blocking");
            JailbreakDecision::Block {
                reason: "malformed_classification".to_string(),
            }
        }
    }
}

fn clamp_reason(raw: Option<&str>) -> &'static str {
    let raw = raw.unwrap_or("none").trim();
    REASON_CODES
        .iter()
        .find(|r| r.eq_ignore_ascii_case(raw))
        .copied()
        .unwrap_or("manipulation")
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(classification: &str, reason: Option<&str>, confidence: Option<f64>) -> RawVerdict {
        RawVerdict {
            classification: classification.to_string(),
            reason_code: reason.map(String::from),
            confidence,
        }
    }

    #[test]
    fn confident_blocked_blocks() {
        let d = decide(raw("BLOCKED", Some("prompt_extraction"), Some(0.9)));
        assert!(matches!(d, JailbreakDecision::Block { reason } if reason == "prompt_extraction"));
    }

    #[test]
    fn unconfident_blocked_passes() {
        assert!(matches!(
            decide(raw("BLOCKED", Some("manipulation"), Some(0.4))),
            JailbreakDecision::Pass
        ));
    }

    #[test]
    fn low_confidence_safe_blocks() {
        assert!(matches!(
            decide(raw("SAFE", None, Some(0.2))),
            JailbreakDecision::Block { .. }
        ));
    }

    #[test]
    fn confident_safe_passes() {
        assert!(matches!(
            decide(raw("safe", None, Some(0.95))),
            JailbreakDecision::Pass
        ));
    }

    #[test]
    fn missing_confidence_reads_as_zero_and_blocks_safe() {
        assert!(matches!(
            decide(raw("SAFE", None, None)),
            JailbreakDecision::Block { .. }
        ));
    }

    #[test]
    fn unknown_classification_blocks() {
        assert!(matches!(
            decide(raw("MAYBE", None, Some(0.9))),
            JailbreakDecision::Block { .. }
        ));
    }

    #[test]
    fn unknown_reason_code_clamps() {
        assert_eq!(clamp_reason(Some("brand_new_attack")), "manipulation");
        assert_eq!(clamp_reason(Some("Roleplay_Attack")), "roleplay_attack");
        assert_eq!(clamp_reason(None), "none");
    }
}
