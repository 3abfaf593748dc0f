//! L6 — response generation with the embedded tool loop.
//!
//! Prompt layout: persona (templated with domain + tool section), the
//! retrieved context inside trusted delimiters, the bounded history, and
//! the visitor message inside untrusted delimiters. The model may request
//! the contact tool via a fenced block; the loop executes it, feeds the
//! result back, and re-invokes — at most [`MAX_TOOL_ITERATIONS`] times.

use std::time::Instant;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::time::Instant as TokioInstant;
use tracing::{debug, warn};

use palisade_core::types::Domain;
use palisade_models::{BackendError, ChatCall, ChatMessage, ModelClient};
use palisade_sessions::{Turn, TurnRole};

use crate::inbox::{ContactInbox, ExcerptTurn, ToolRequest, TOOL_NAME};
use crate::prompts;
use crate::trace::RequestTrace;

/// Hard cap on generator↔tool round trips per visitor turn. Malformed and
/// unknown-tool attempts count toward it too.
pub const MAX_TOOL_ITERATIONS: u32 = 3;

const GENERATION_MAX_TOKENS: u32 = 1024;
const GENERATION_TEMPERATURE: f32 = 0.7;

const TRUSTED_OPEN: &str = "===== BEGIN TRUSTED CONTEXT =====";
const TRUSTED_CLOSE: &str = "===== END TRUSTED CONTEXT =====";
const UNTRUSTED_OPEN: &str = "===== BEGIN UNTRUSTED VISITOR INPUT =====";
const UNTRUSTED_CLOSE: &str = "===== END UNTRUSTED VISITOR INPUT =====";

pub struct GenerationInput<'a> {
    pub domain: Domain,
    pub context: &'a str,
    pub history: &'a [Turn],
    pub message: &'a str,
    pub conversation_id: Option<&'a str>,
    /// Extra system note for the single safety-failure regeneration.
    pub reinforcement: Option<&'a str>,
}

pub struct GenerationResult {
    pub content: String,
    pub tool_invocations: u32,
}

pub async fn generate(
    client: &ModelClient,
    model: &str,
    inbox: &ContactInbox,
    input: GenerationInput<'_>,
    trace: &RequestTrace,
    deadline: TokioInstant,
) -> Result<GenerationResult, BackendError> {
    let mut messages = build_messages(&input);
    let mut tool_invocations = 0u32;

    loop {
        let call = ChatCall {
            model: model.to_string(),
            messages: messages.clone(),
            max_tokens: GENERATION_MAX_TOKENS,
            temperature: GENERATION_TEMPERATURE,
        };

        let started = Instant::now();
        let outcome = client.chat(&call, deadline).await?;
        trace.model_call(
            &outcome.model,
            started.elapsed().as_millis() as u64,
            outcome.tokens_in,
            outcome.tokens_out,
        );

        let Some((parsed, stripped)) = extract_tool_call(&outcome.content) else {
            return Ok(GenerationResult {
                content: outcome.content.trim().to_string(),
                tool_invocations,
            });
        };

        if tool_invocations >= MAX_TOOL_ITERATIONS {
            // Loop budget spent: the visitor gets the last draft as-is.
            // The fenced block itself is never shown.
            warn!("tool loop hit iteration cap, returning last draft");
            return Ok(GenerationResult {
                content: stripped,
                tool_invocations,
            });
        }
        tool_invocations += 1;

        let result_payload = match parsed {
            Ok(req) if req.tool == TOOL_NAME => {
                let excerpt = excerpt_turns(input.history, input.message);
                match inbox.save(&req, input.conversation_id, excerpt).await {
                    Ok(id) => serde_json::json!({ "status": "ok", "id": id }),
                    Err(reason) => serde_json::json!({ "status": "error", "reason": reason }),
                }
            }
            Ok(req) => {
                debug!(tool = %req.tool, "unknown tool requested");
                serde_json::json!({ "status": "error", "reason": format!("unknown tool: {}", req.tool) })
            }
            Err(parse_err) => {
                debug!(error = %parse_err, "malformed tool call");
                serde_json::json!({ "status": "error", "reason": "malformed tool call JSON" })
            }
        };

        // Feed the exchange back and go around again.
        messages.push(ChatMessage::assistant(outcome.content.clone()));
        messages.push(ChatMessage::user(format!(
            "[tool result] {result_payload}"
        )));
    }
}

fn build_messages(input: &GenerationInput<'_>) -> Vec<ChatMessage> {
    let persona = prompts::render(
        prompts::PERSONA,
        &[
            ("domain", input.domain.as_str()),
            ("tools_section", prompts::TOOLS_SECTION),
        ],
    );

    let mut system = persona;
    system.push_str("\n\n");
    system.push_str(TRUSTED_OPEN);
    system.push('\n');
    system.push_str(input.context);
    system.push('\n');
    system.push_str(TRUSTED_CLOSE);
    if let Some(note) = input.reinforcement {
        system.push_str("\n\n# Revision requirement\n");
        system.push_str(note);
    }

    let mut messages = vec![ChatMessage::system(system)];
    for turn in input.history {
        messages.push(match turn.role {
            TurnRole::User => ChatMessage::user(turn.content.clone()),
            TurnRole::Assistant => ChatMessage::assistant(turn.content.clone()),
        });
    }
    messages.push(ChatMessage::user(format!(
        "{UNTRUSTED_OPEN}\n{}\n{UNTRUSTED_CLOSE}",
        input.message
    )));
    messages
}

/// Last two exchange halves preceding the current message, stored with a
/// saved contact record so the owner sees what the visitor was asking.
fn excerpt_turns(history: &[Turn], current_message: &str) -> Vec<ExcerptTurn> {
    let mut turns: Vec<ExcerptTurn> = history
        .iter()
        .map(|t| ExcerptTurn {
            role: match t.role {
                TurnRole::User => "user".to_string(),
                TurnRole::Assistant => "assistant".to_string(),
            },
            content: t.content.clone(),
        })
        .collect();
    turns.push(ExcerptTurn {
        role: "user".to_string(),
        content: current_message.to_string(),
    });
    let skip = turns.len().saturating_sub(2);
    turns.into_iter().skip(skip).collect()
}

static TOOL_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:tool|json)\s*\n(.*?)```").unwrap());

/// Find a fenced tool block. Returns the parse result plus the
/// surrounding text with the block removed (the "visible" draft).
///
/// A json-tagged fence only counts when its object carries a "tool" key;
/// models quote ordinary JSON in answers about the chat system itself.
pub fn extract_tool_call(text: &str) -> Option<(Result<ToolRequest, String>, String)> {
    let captures = TOOL_FENCE.captures(text)?;
    let whole = captures.get(0).expect("regex matched");
    let body = captures.get(1).expect("capture group 1").as_str().trim();

    let is_json_fence = text[whole.range()].starts_with("```json");
    let parsed: Result<ToolRequest, String> =
        serde_json::from_str::<ToolRequest>(body).map_err(|e| e.to_string());

    if is_json_fence {
        // Only claim the block when it is actually shaped like a tool call.
        let has_tool_key = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.get("tool").cloned())
            .is_some();
        if !has_tool_key {
            return None;
        }
    }

    let mut stripped = String::new();
    stripped.push_str(&text[..whole.start()]);
    stripped.push_str(&text[whole.end()..]);
    Some((parsed, stripped.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_answer_has_no_tool_call() {
        assert!(extract_tool_call("Kellogg has a decade of experience.").is_none());
    }

    #[test]
    fn tool_fence_is_extracted_and_stripped() {
        let text = "On it!\n```tool\n{\"tool\": \"save_message_for_kellogg\", \"message\": \"hi\"}\n```\n";
        let (parsed, stripped) = extract_tool_call(text).unwrap();
        let req = parsed.unwrap();
        assert_eq!(req.tool, TOOL_NAME);
        assert_eq!(req.message, "hi");
        assert_eq!(stripped, "On it!");
    }

    #[test]
    fn json_fence_with_tool_key_counts() {
        let text = "```json\n{\"tool\": \"save_message_for_kellogg\", \"message\": \"m\"}\n```";
        assert!(extract_tool_call(text).is_some());
    }

    #[test]
    fn json_fence_without_tool_key_is_just_content() {
        let text = "The health check returns:\n```json\n{\"status\": \"healthy\"}\n```";
        assert!(extract_tool_call(text).is_none());
    }

    #[test]
    fn malformed_tool_json_is_reported_not_dropped() {
        let text = "```tool\n{not json}\n```";
        let (parsed, _) = extract_tool_call(text).unwrap();
        assert!(parsed.is_err());
    }

    #[test]
    fn excerpt_keeps_at_most_two_turns_ending_with_current() {
        let history = vec![
            Turn::user("one"),
            Turn::assistant("two", Domain::Contact, 1),
            Turn::user("three"),
        ];
        let excerpt = excerpt_turns(&history, "current");
        assert_eq!(excerpt.len(), 2);
        assert_eq!(excerpt[0].content, "three");
        assert_eq!(excerpt[1].content, "current");
    }

    #[test]
    fn prompt_wraps_message_in_untrusted_delimiters() {
        let input = GenerationInput {
            domain: Domain::Meta,
            context: "ctx",
            history: &[],
            message: "hello",
            conversation_id: None,
            reinforcement: None,
        };
        let messages = build_messages(&input);
        let system = &messages[0].content;
        assert!(system.contains(TRUSTED_OPEN));
        assert!(system.contains("ctx"));
        assert!(system.contains("META"));
        let user = &messages.last().unwrap().content;
        assert!(user.contains(UNTRUSTED_OPEN));
        assert!(user.contains("hello"));
    }

    #[test]
    fn reinforcement_note_lands_in_system_prompt() {
        let input = GenerationInput {
            domain: Domain::Meta,
            context: "",
            history: &[],
            message: "m",
            conversation_id: None,
            reinforcement: Some("avoid: hallucination"),
        };
        let messages = build_messages(&input);
        assert!(messages[0].content.contains("avoid: hallucination"));
    }
}
