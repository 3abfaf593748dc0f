use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for one inbound request (random UUID, not persisted
/// beyond the request log).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque conversation identifier (UUIDv7 — time-sortable for easier log
/// correlation).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ConversationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Coarse topic class that selects which static context is injected.
///
/// Closed set — router output is clamped onto it, unknown values become
/// `OutOfScope`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Domain {
    Professional,
    Projects,
    Hobbies,
    Philosophy,
    Contact,
    Meta,
    OutOfScope,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Professional => "PROFESSIONAL",
            Domain::Projects => "PROJECTS",
            Domain::Hobbies => "HOBBIES",
            Domain::Philosophy => "PHILOSOPHY",
            Domain::Contact => "CONTACT",
            Domain::Meta => "META",
            Domain::OutOfScope => "OUT_OF_SCOPE",
        }
    }

    /// All domains that carry context documents (everything except
    /// `OutOfScope`, which terminates the pipeline).
    pub fn routable() -> &'static [Domain] {
        &[
            Domain::Professional,
            Domain::Projects,
            Domain::Hobbies,
            Domain::Philosophy,
            Domain::Contact,
            Domain::Meta,
        ]
    }

    /// Clamp an arbitrary model-produced string onto the closed set.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "PROFESSIONAL" => Domain::Professional,
            "PROJECTS" => Domain::Projects,
            "HOBBIES" => Domain::Hobbies,
            "PHILOSOPHY" => Domain::Philosophy,
            "CONTACT" => Domain::Contact,
            "META" => Domain::Meta,
            _ => Domain::OutOfScope,
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subject areas a question can be about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    WorkExperience,
    Skills,
    Projects,
    Education,
    Achievements,
    Hobbies,
    Philosophy,
    Contact,
    ChatSystem,
    #[default]
    General,
}

impl Topic {
    /// Clamp a model-produced string onto the closed set; unknown → General.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "work_experience" => Topic::WorkExperience,
            "skills" => Topic::Skills,
            "projects" => Topic::Projects,
            "education" => Topic::Education,
            "achievements" => Topic::Achievements,
            "hobbies" => Topic::Hobbies,
            "philosophy" => Topic::Philosophy,
            "contact" => Topic::Contact,
            "chat_system" => Topic::ChatSystem,
            _ => Topic::General,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    Factual,
    Experience,
    Opinion,
    Comparison,
    Procedural,
    Clarification,
    Greeting,
    #[default]
    Ambiguous,
}

impl QuestionType {
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "factual" => QuestionType::Factual,
            "experience" => QuestionType::Experience,
            "opinion" => QuestionType::Opinion,
            "comparison" => QuestionType::Comparison,
            "procedural" => QuestionType::Procedural,
            "clarification" => QuestionType::Clarification,
            "greeting" => QuestionType::Greeting,
            _ => QuestionType::Ambiguous,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmotionalTone {
    #[default]
    Neutral,
    Curious,
    Professional,
    Casual,
    Skeptical,
    Enthusiastic,
}

impl EmotionalTone {
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "neutral" => EmotionalTone::Neutral,
            "curious" => EmotionalTone::Curious,
            "professional" => EmotionalTone::Professional,
            "casual" => EmotionalTone::Casual,
            "skeptical" => EmotionalTone::Skeptical,
            "enthusiastic" => EmotionalTone::Enthusiastic,
            _ => EmotionalTone::Neutral,
        }
    }
}

/// Structured understanding of one user message, produced by the intent
/// parser and consumed by the router and generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub topic: Topic,
    pub question_type: QuestionType,
    /// Short entity strings in mention order; may be empty.
    #[serde(default)]
    pub entities: Vec<String>,
    pub emotional_tone: EmotionalTone,
    /// Parser self-confidence in [0,1]; clamped on ingestion.
    pub confidence: f64,
}

impl Default for Intent {
    fn default() -> Self {
        Self {
            topic: Topic::General,
            question_type: QuestionType::Ambiguous,
            entities: Vec::new(),
            emotional_tone: EmotionalTone::Neutral,
            confidence: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_clamps_unknown_to_out_of_scope() {
        assert_eq!(Domain::parse_lenient("WEATHER"), Domain::OutOfScope);
        assert_eq!(Domain::parse_lenient(" projects "), Domain::Projects);
    }

    #[test]
    fn domain_wire_format_is_screaming_snake() {
        let json = serde_json::to_string(&Domain::OutOfScope).unwrap();
        assert_eq!(json, "\"OUT_OF_SCOPE\"");
    }

    #[test]
    fn topic_clamps_unknown_to_general() {
        assert_eq!(Topic::parse_lenient("quantum_flavor"), Topic::General);
        assert_eq!(Topic::parse_lenient("work_experience"), Topic::WorkExperience);
    }

    #[test]
    fn question_type_clamps_unknown_to_ambiguous() {
        assert_eq!(QuestionType::parse_lenient("riddle"), QuestionType::Ambiguous);
    }

    #[test]
    fn tone_clamps_unknown_to_neutral() {
        assert_eq!(EmotionalTone::parse_lenient("furious"), EmotionalTone::Neutral);
    }
}
