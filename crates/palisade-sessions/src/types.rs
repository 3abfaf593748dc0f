use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use palisade_core::types::{ConversationId, Domain};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One exchange half inside a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Domain the response was generated under (assistant turns only).
    #[serde(default)]
    pub domain: Option<Domain>,
    #[serde(default)]
    pub response_time_ms: Option<u64>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
            timestamp: Utc::now(),
            domain: None,
            response_time_ms: None,
        }
    }

    pub fn assistant(content: impl Into<String>, domain: Domain, response_time_ms: u64) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
            domain: Some(domain),
            response_time_ms: Some(response_time_ms),
        }
    }
}

/// A live conversation. Owned exclusively by the store; the pipeline only
/// ever sees cloned snapshots.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: ConversationId,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Cumulative user-turn counter (not reduced by eviction).
    pub turn_counter: u64,
    pub turns: Vec<Turn>,
}

impl Conversation {
    pub fn new(id: ConversationId) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            last_activity: now,
            turn_counter: 0,
            turns: Vec::new(),
        }
    }

    pub fn user_turns(&self) -> usize {
        self.turns.iter().filter(|t| t.role == TurnRole::User).count()
    }

    /// The last `n` user turns, oldest first. Fed to the jailbreak
    /// classifier for multi-turn attack detection.
    pub fn recent_user_turns(&self, n: usize) -> Vec<&Turn> {
        let users: Vec<&Turn> = self
            .turns
            .iter()
            .filter(|t| t.role == TurnRole::User)
            .collect();
        let skip = users.len().saturating_sub(n);
        users.into_iter().skip(skip).collect()
    }
}
