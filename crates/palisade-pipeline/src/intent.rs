//! L3/L4 — intent parsing and domain routing, one combined model call.
//!
//! The model proposes free-form-ish JSON; post-processing clamps every
//! field onto the closed enums, then a fixed routing table maps topic to
//! domain. The model's own domain proposal is advisory — the table wins.

use std::time::Instant;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tokio::time::Instant as TokioInstant;

use palisade_core::types::{Domain, EmotionalTone, Intent, QuestionType, Topic};
use palisade_models::{BackendError, ChatCall, ChatMessage, ModelClient};

use crate::prompts;
use crate::trace::RequestTrace;

/// Confidence floor: below this the message routes out of scope unless it
/// is an obvious greeting.
const MIN_CONFIDENCE: f64 = 0.3;

/// Entities are short strings; anything longer is model rambling.
const MAX_ENTITY_CHARS: usize = 64;
const MAX_ENTITIES: usize = 8;

#[derive(Deserialize)]
struct RawIntent {
    #[serde(default)]
    topic: String,
    #[serde(default)]
    question_type: String,
    #[serde(default)]
    entities: Vec<String>,
    #[serde(default)]
    emotional_tone: String,
    #[serde(default)]
    confidence: Option<f64>,
    // Proposed domain is parsed but deliberately unused for routing.
    #[serde(default, rename = "domain")]
    _domain: String,
}

/// Parse the message into an [`Intent`]. Errors bubble as backend errors —
/// the orchestrator maps them to INTERNAL_ERROR (this is not a
/// classification stage; it does not fail closed to a refusal).
pub async fn parse_intent(
    client: &ModelClient,
    model: &str,
    message: &str,
    trace: &RequestTrace,
    deadline: TokioInstant,
) -> Result<Intent, BackendError> {
    let prompt = prompts::render(prompts::INTENT, &[("message", message)]);
    let call = ChatCall {
        model: model.to_string(),
        messages: vec![ChatMessage::user(prompt)],
        max_tokens: 256,
        temperature: 0.0,
    };

    let started = Instant::now();
    let (raw, outcome) = client.chat_json::<RawIntent>(&call, deadline).await?;
    trace.model_call(
        &outcome.model,
        started.elapsed().as_millis() as u64,
        outcome.tokens_in,
        outcome.tokens_out,
    );

    Ok(clamp(raw))
}

fn clamp(raw: RawIntent) -> Intent {
    Intent {
        topic: Topic::parse_lenient(&raw.topic),
        question_type: QuestionType::parse_lenient(&raw.question_type),
        entities: raw
            .entities
            .into_iter()
            .filter(|e| !e.trim().is_empty())
            .map(|e| {
                let e = e.trim().to_string();
                if e.chars().count() > MAX_ENTITY_CHARS {
                    e.chars().take(MAX_ENTITY_CHARS).collect()
                } else {
                    e
                }
            })
            .take(MAX_ENTITIES)
            .collect(),
        emotional_tone: EmotionalTone::parse_lenient(&raw.emotional_tone),
        confidence: raw.confidence.unwrap_or(0.0).clamp(0.0, 1.0),
    }
}

/// The L4 routing table. Pure and total over the closed enums.
pub fn route(intent: &Intent, message: &str) -> Domain {
    if intent.confidence < MIN_CONFIDENCE && !is_obvious_greeting(message) {
        return Domain::OutOfScope;
    }

    match intent.topic {
        Topic::WorkExperience | Topic::Skills | Topic::Education | Topic::Achievements => {
            Domain::Professional
        }
        Topic::Projects => Domain::Projects,
        Topic::Hobbies => Domain::Hobbies,
        Topic::Philosophy => Domain::Philosophy,
        Topic::Contact => Domain::Contact,
        Topic::ChatSystem => Domain::Meta,
        Topic::General => {
            if intent.question_type == QuestionType::Greeting || is_obvious_greeting(message) {
                Domain::Meta
            } else {
                Domain::OutOfScope
            }
        }
    }
}

/// Deterministic greeting check — short salutations should never be at
/// the mercy of a 1B model's confidence calibration.
pub fn is_obvious_greeting(message: &str) -> bool {
    static GREETING: Lazy<Regex> = Lazy::new(|| {
        Regex::new(
            r"(?i)^(hi|hiya|hello|hey|howdy|yo|greetings|good\s+(morning|afternoon|evening))[\s.!?,]*$",
        )
        .unwrap()
    });
    GREETING.is_match(message.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent(topic: Topic, qt: QuestionType, confidence: f64) -> Intent {
        Intent {
            topic,
            question_type: qt,
            entities: vec![],
            emotional_tone: EmotionalTone::Neutral,
            confidence,
        }
    }

    #[test]
    fn professional_topics_route_together() {
        for topic in [
            Topic::WorkExperience,
            Topic::Skills,
            Topic::Education,
            Topic::Achievements,
        ] {
            let i = intent(topic, QuestionType::Factual, 0.9);
            assert_eq!(route(&i, "tell me"), Domain::Professional);
        }
    }

    #[test]
    fn routing_table_matches_spec_rows() {
        assert_eq!(
            route(&intent(Topic::Projects, QuestionType::Factual, 0.9), "x"),
            Domain::Projects
        );
        assert_eq!(
            route(&intent(Topic::Hobbies, QuestionType::Factual, 0.9), "x"),
            Domain::Hobbies
        );
        assert_eq!(
            route(&intent(Topic::Philosophy, QuestionType::Opinion, 0.9), "x"),
            Domain::Philosophy
        );
        assert_eq!(
            route(&intent(Topic::Contact, QuestionType::Procedural, 0.9), "x"),
            Domain::Contact
        );
        assert_eq!(
            route(&intent(Topic::ChatSystem, QuestionType::Factual, 0.9), "x"),
            Domain::Meta
        );
    }

    #[test]
    fn general_is_out_of_scope_unless_greeting() {
        let i = intent(Topic::General, QuestionType::Factual, 0.9);
        assert_eq!(route(&i, "what's the weather in Tokyo?"), Domain::OutOfScope);

        let g = intent(Topic::General, QuestionType::Greeting, 0.9);
        assert_eq!(route(&g, "hi"), Domain::Meta);
    }

    #[test]
    fn low_confidence_defaults_out_of_scope() {
        let i = intent(Topic::Projects, QuestionType::Factual, 0.1);
        assert_eq!(route(&i, "hmm"), Domain::OutOfScope);
    }

    #[test]
    fn low_confidence_greeting_still_routes_meta() {
        let i = intent(Topic::General, QuestionType::Ambiguous, 0.05);
        assert_eq!(route(&i, "hello!"), Domain::Meta);
    }

    #[test]
    fn obvious_greetings_match() {
        for m in ["hi", "Hello!", "hey there"] {
            // "hey there" has a trailing word — only bare salutations count.
            let expected = m != "hey there";
            assert_eq!(is_obvious_greeting(m), expected, "{m:?}");
        }
        assert!(is_obvious_greeting("good morning"));
        assert!(!is_obvious_greeting("hi, what's the weather?"));
    }

    #[test]
    fn clamp_truncates_and_bounds_entities() {
        let raw = RawIntent {
            topic: "projects".to_string(),
            question_type: "factual".to_string(),
            entities: vec!["  rust  ".to_string(), "x".repeat(200), String::new()],
            emotional_tone: "curious".to_string(),
            confidence: Some(1.7),
            _domain: "PROJECTS".to_string(),
        };
        let intent = clamp(raw);
        assert_eq!(intent.entities[0], "rust");
        assert_eq!(intent.entities[1].chars().count(), MAX_ENTITY_CHARS);
        assert_eq!(intent.entities.len(), 2);
        assert_eq!(intent.confidence, 1.0);
    }
}
