use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

// Hard limits enforced at L0 — changing these widens the attack surface
pub const DEFAULT_MAX_INPUT_LENGTH: usize = 2000;
pub const DEFAULT_MAX_REQUEST_SIZE: usize = 8192; // 8 KB body cap
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_PORT: u16 = 18200;
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// Top-level config (palisade.toml + PALISADE_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PalisadeConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for PalisadeConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            limits: LimitsConfig::default(),
            rate_limits: RateLimitConfig::default(),
            conversation: ConversationConfig::default(),
            models: ModelsConfig::default(),
            security: SecurityConfig::default(),
            storage: StorageConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum message length in characters, measured after JSON decoding.
    #[serde(default = "default_max_input_length")]
    pub max_input_length: usize,
    /// Maximum request body size in bytes.
    #[serde(default = "default_max_request_size")]
    pub max_request_size: usize,
    /// Whole-request deadline. Exceeding it returns INTERNAL_ERROR.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_input_length: DEFAULT_MAX_INPUT_LENGTH,
            max_request_size: DEFAULT_MAX_REQUEST_SIZE,
            request_timeout_seconds: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_per_ip_per_minute")]
    pub per_ip_per_minute: u32,
    #[serde(default = "default_per_ip_per_hour")]
    pub per_ip_per_hour: u32,
    #[serde(default = "default_global_per_minute")]
    pub global_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_ip_per_minute: 10,
            per_ip_per_hour: 100,
            global_per_minute: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Maximum user turns kept per conversation.
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    /// Idle lifetime; a conversation past this is expired and swept.
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
    /// Token budget for history sent to models.
    #[serde(default = "default_max_history_tokens")]
    pub max_history_tokens: usize,
    /// Global cap on live conversations (LRU-evicted when full).
    #[serde(default = "default_max_conversations")]
    pub max_conversations: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_turns: 10,
            ttl_seconds: 1800,
            max_history_tokens: 4000,
            max_conversations: 10_000,
        }
    }
}

/// Model names are opaque to the pipeline — they are whatever the local
/// runtime (Ollama-compatible) has pulled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_model_base_url")]
    pub base_url: String,
    #[serde(default = "default_classifier_model")]
    pub classifier_model: String,
    #[serde(default = "default_router_model")]
    pub router_model: String,
    #[serde(default = "default_generator_model")]
    pub generator_model: String,
    #[serde(default = "default_verifier_model")]
    pub verifier_model: String,
    /// Embedding model for the grounding check. `None` disables the check.
    #[serde(default)]
    pub embedding_model: Option<String>,
    /// Bounded concurrency gate around the backend — protects the GPU.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Cosine-similarity floor below which a response is treated as
    /// ungrounded (hallucination suspicion).
    #[serde(default = "default_grounding_threshold")]
    pub grounding_threshold: f32,
    /// Token budget for the trusted-context block in the generation prompt.
    #[serde(default = "default_context_token_budget")]
    pub context_token_budget: usize,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            base_url: default_model_base_url(),
            classifier_model: default_classifier_model(),
            router_model: default_router_model(),
            generator_model: default_generator_model(),
            verifier_model: default_verifier_model(),
            embedding_model: None,
            max_in_flight: 4,
            grounding_threshold: 0.3,
            context_token_budget: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Proxies allowed to supply X-Forwarded-For. Entries are plain IPs or
    /// CIDR blocks. Requests from any other peer have their forwarded
    /// headers ignored.
    #[serde(default)]
    pub trusted_proxies: Vec<String>,
    /// Salt for the ip hash. The raw ip never leaves L0.
    #[serde(default = "default_ip_hash_salt")]
    pub ip_hash_salt: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            trusted_proxies: Vec::new(),
            ip_hash_salt: default_ip_hash_salt(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory of per-domain context documents (`<domain>.md`).
    #[serde(default = "default_context_dir")]
    pub context_dir: String,
    /// Directory for persisted contact messages (one file each, mode 0600).
    #[serde(default = "default_inbox_dir")]
    pub inbox_dir: String,
    /// Append-only JSONL request log.
    #[serde(default = "default_request_log_path")]
    pub request_log_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            context_dir: default_context_dir(),
            inbox_dir: default_inbox_dir(),
            request_log_path: default_request_log_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MetricsConfig {
    /// When true, per-layer timings are included in response metadata.
    #[serde(default)]
    pub enabled: bool,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_max_input_length() -> usize {
    DEFAULT_MAX_INPUT_LENGTH
}
fn default_max_request_size() -> usize {
    DEFAULT_MAX_REQUEST_SIZE
}
fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}
fn default_per_ip_per_minute() -> u32 {
    10
}
fn default_per_ip_per_hour() -> u32 {
    100
}
fn default_global_per_minute() -> u32 {
    1000
}
fn default_max_turns() -> usize {
    10
}
fn default_ttl_seconds() -> u64 {
    1800
}
fn default_max_history_tokens() -> usize {
    4000
}
fn default_max_conversations() -> usize {
    10_000
}
fn default_model_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_classifier_model() -> String {
    "qwen2.5:0.5b".to_string()
}
fn default_router_model() -> String {
    "qwen2.5:1.5b".to_string()
}
fn default_generator_model() -> String {
    "qwen2.5:7b".to_string()
}
fn default_verifier_model() -> String {
    "qwen2.5:0.5b".to_string()
}
fn default_max_in_flight() -> usize {
    4
}
fn default_grounding_threshold() -> f32 {
    0.3
}
fn default_context_token_budget() -> usize {
    2000
}
fn default_ip_hash_salt() -> String {
    // Overridden in any real deployment via PALISADE_SECURITY__IP_HASH_SALT.
    "change-me".to_string()
}
fn default_context_dir() -> String {
    "./context".to_string()
}
fn default_inbox_dir() -> String {
    "./inbox".to_string()
}
fn default_request_log_path() -> String {
    "./logs/requests.jsonl".to_string()
}

impl PalisadeConfig {
    /// Load config from a TOML file with PALISADE_* env var overrides.
    ///
    /// Nested keys use a double underscore in the environment, e.g.
    /// `PALISADE_LIMITS__MAX_INPUT_LENGTH=4000`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path.unwrap_or("palisade.toml");

        let config: PalisadeConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("PALISADE_").split("__"))
            .extract()
            .map_err(|e| crate::error::PalisadeError::Config(e.to_string()))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = PalisadeConfig::default();
        assert_eq!(cfg.limits.max_input_length, 2000);
        assert_eq!(cfg.limits.max_request_size, 8192);
        assert_eq!(cfg.limits.request_timeout_seconds, 30);
        assert_eq!(cfg.rate_limits.per_ip_per_minute, 10);
        assert_eq!(cfg.rate_limits.per_ip_per_hour, 100);
        assert_eq!(cfg.rate_limits.global_per_minute, 1000);
        assert_eq!(cfg.conversation.max_turns, 10);
        assert_eq!(cfg.conversation.ttl_seconds, 1800);
        assert_eq!(cfg.conversation.max_history_tokens, 4000);
        assert!(!cfg.metrics.enabled);
    }

    #[test]
    fn embedding_model_defaults_to_none() {
        // The grounding check is optional; absent model means skip it.
        assert!(PalisadeConfig::default().models.embedding_model.is_none());
    }
}
