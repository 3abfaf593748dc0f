//! The orchestrator drives L0→L9 in order for one request.
//!
//! Contract: stages never raise through it — every failure is mapped to
//! one of the six refusal codes, the trace records every path including
//! short-circuits, and the request log is written whether the pipeline
//! finished, refused, or timed out. Fail closed: an unexplained fault is
//! INTERNAL_ERROR with no detail attached.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::time::Instant as TokioInstant;
use tracing::{info, warn};

use palisade_core::config::PalisadeConfig;
use palisade_core::error::ErrorCode;
use palisade_core::types::{ConversationId, Domain, RequestId};
use palisade_models::ModelClient;
use palisade_sessions::{ConversationStore, StoreError, Turn};

use crate::classify::{self, JailbreakDecision};
use crate::context::ContextRegistry;
use crate::gate::{ip_hash, resolve_client_ip, TrustedProxies};
use crate::generate::{self, GenerationInput};
use crate::inbox::ContactInbox;
use crate::intent;
use crate::ratelimit::RateLimiter;
use crate::reqlog::{LogRecord, RequestLog};
use crate::revise;
use crate::safety;
use crate::sanitize;
use crate::trace::RequestTrace;

/// Per-stage budgets. L0/L1 are pure CPU and need none; classifier stages
/// are medium; generation and revision dominate and get the long budget.
/// Every stage deadline is additionally capped by the whole-request one.
const BUDGET_CLASSIFY: Duration = Duration::from_secs(10);
const BUDGET_GENERATE: Duration = Duration::from_secs(20);

/// Raw inbound request as the transport hands it over. Body size is in
/// bytes before JSON decoding; the message is already decoded.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub message: String,
    pub conversation_id: Option<String>,
    pub body_bytes: usize,
    pub peer_ip: IpAddr,
    pub forwarded_for: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChatSuccess {
    pub content: String,
    pub domain: Domain,
}

/// Everything the transport needs to build the response envelope.
#[derive(Debug)]
pub struct ChatOutcome {
    pub result: Result<ChatSuccess, ErrorCode>,
    pub request_id: String,
    /// Always populated: the checked-out conversation on success, the
    /// client-supplied id on a refusal, or a freshly minted id when the
    /// pipeline refused before any conversation was touched. The store
    /// reuses client-supplied ids, so a minted one stays valid for a
    /// follow-up request.
    pub conversation_id: String,
    pub response_time_ms: u64,
    /// Present only when metrics are enabled.
    pub layer_timings_ms: Option<BTreeMap<String, u64>>,
}

/// Shared pipeline state, composed once at process start and threaded
/// explicitly — the only process-wide mutable things live inside it.
pub struct Pipeline {
    config: PalisadeConfig,
    client: ModelClient,
    registry: ContextRegistry,
    store: Arc<ConversationStore>,
    limiter: RateLimiter,
    inbox: ContactInbox,
    log: RequestLog,
    trusted: TrustedProxies,
}

impl Pipeline {
    pub fn new(
        config: PalisadeConfig,
        client: ModelClient,
        registry: ContextRegistry,
        store: Arc<ConversationStore>,
        inbox: ContactInbox,
        log: RequestLog,
    ) -> Self {
        let limiter = RateLimiter::new(config.rate_limits.clone());
        let trusted = TrustedProxies::parse(&config.security.trusted_proxies);
        Self {
            config,
            client,
            registry,
            store,
            limiter,
            inbox,
            log,
            trusted,
        }
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn inbox(&self) -> &ContactInbox {
        &self.inbox
    }

    pub fn log(&self) -> &RequestLog {
        &self.log
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn registry(&self) -> &ContextRegistry {
        &self.registry
    }

    pub async fn probe_backend(&self) -> bool {
        self.client.probe().await
    }

    /// Process one request end to end: whole-request deadline, stage
    /// dispatch, trace capture, and the log record on every path.
    pub async fn handle(&self, req: InboundRequest) -> ChatOutcome {
        let request_id = RequestId::new();
        let trace = Arc::new(RequestTrace::new());
        let input_chars = req.message.chars().count();

        // The raw ip stops here: resolve, hash, drop.
        let client_ip = resolve_client_ip(req.peer_ip, req.forwarded_for.as_deref(), &self.trusted);
        let client_hash = ip_hash(&client_ip, &self.config.security.ip_hash_salt);

        let overall_deadline = TokioInstant::now()
            + Duration::from_secs(self.config.limits.request_timeout_seconds);

        let run = self.run(&req, &client_hash, Arc::clone(&trace), overall_deadline);
        let result = match tokio::time::timeout_at(overall_deadline, run).await {
            Ok(result) => result,
            Err(_) => {
                // Dropping the run future cancels in-flight model calls
                // and releases the conversation lease.
                warn!(request_id = %request_id, "request deadline exceeded");
                Err(ErrorCode::InternalError)
            }
        };

        let conversation_id = match &result {
            Ok((_, _, id)) => id.clone(),
            Err(_) => req
                .conversation_id
                .clone()
                .unwrap_or_else(|| ConversationId::new().to_string()),
        };

        let response_time_ms = trace.elapsed_ms();
        self.log
            .write(&LogRecord {
                timestamp: Utc::now().to_rfc3339(),
                request_id: request_id.to_string(),
                client_ip_hash: client_hash,
                input_length: input_chars,
                layers_passed: trace.layers_passed().iter().map(|s| s.to_string()).collect(),
                blocked_at_layer: trace.blocked_at().map(String::from),
                block_reason: trace.block_reason(),
                domain_matched: result.as_ref().ok().map(|(_, d, _)| d.to_string()),
                response_time_ms,
                model_calls: trace.model_calls(),
            })
            .await;

        let outcome_label = match &result {
            Ok(_) => "success".to_string(),
            Err(code) => code.to_string(),
        };
        info!(
            request_id = %request_id,
            outcome = %outcome_label,
            response_time_ms,
            "request complete"
        );

        ChatOutcome {
            result: result.map(|(content, domain, _)| ChatSuccess { content, domain }),
            request_id: request_id.to_string(),
            conversation_id,
            response_time_ms,
            layer_timings_ms: self
                .config
                .metrics
                .enabled
                .then(|| trace.layer_timings_ms()),
        }
    }

    /// The staged pipeline proper. Returns (content, domain,
    /// conversation_id) or the refusal code already recorded in the trace.
    async fn run(
        &self,
        req: &InboundRequest,
        client_hash: &str,
        trace: Arc<RequestTrace>,
        overall_deadline: TokioInstant,
    ) -> Result<(String, Domain, String), ErrorCode> {
        let cfg = &self.config;

        // ── L0: network gateway ─────────────────────────────────────────
        let entered = Instant::now();
        if req.body_bytes > cfg.limits.max_request_size {
            trace.stage_halted("L0", entered, ErrorCode::InputTooLong, "body over size cap");
            return Err(ErrorCode::InputTooLong);
        }
        if req.message.chars().count() > cfg.limits.max_input_length {
            trace.stage_halted("L0", entered, ErrorCode::InputTooLong, "message over length cap");
            return Err(ErrorCode::InputTooLong);
        }
        if !self.limiter.admit(client_hash) {
            trace.stage_halted("L0", entered, ErrorCode::RateLimited, "rate window exceeded");
            return Err(ErrorCode::RateLimited);
        }
        trace.stage_passed("L0", entered);

        // ── L1: sanitization + blocklist ────────────────────────────────
        let entered = Instant::now();
        let sanitized = sanitize::sanitize(&req.message);
        if sanitized.text.is_empty() {
            trace.stage_halted("L1", entered, ErrorCode::BlockedInput, "empty after sanitization");
            return Err(ErrorCode::BlockedInput);
        }
        if let Some(rule) = sanitize::blocklist_hit(&sanitized.text) {
            trace.stage_halted("L1", entered, ErrorCode::BlockedInput, format!("rule {rule}"));
            return Err(ErrorCode::BlockedInput);
        }
        trace.stage_passed("L1", entered);

        // ── L2: jailbreak classifier ────────────────────────────────────
        // The conversation is checked out here because multi-turn attack
        // detection needs the recent user turns; a concurrent request on
        // the same id is a per-conversation burst and is rejected.
        let entered = Instant::now();
        let (lease, snapshot) = match self.store.checkout(req.conversation_id.as_deref()) {
            Ok(pair) => pair,
            Err(StoreError::Busy { .. }) => {
                trace.stage_halted("L2", entered, ErrorCode::RateLimited, "conversation busy");
                return Err(ErrorCode::RateLimited);
            }
            Err(e) => {
                warn!(error = %e, "conversation checkout failed");
                trace.stage_halted("L2", entered, ErrorCode::InternalError, "store error");
                return Err(ErrorCode::InternalError);
            }
        };

        let recent: Vec<String> = snapshot
            .recent_user_turns(2)
            .into_iter()
            .map(|t| t.content.clone())
            .collect();
        let decision = classify::classify(
            &self.client,
            &cfg.models.classifier_model,
            &sanitized.text,
            &recent,
            &trace,
            stage_deadline(overall_deadline, BUDGET_CLASSIFY),
        )
        .await;
        if let JailbreakDecision::Block { reason } = decision {
            trace.stage_halted("L2", entered, ErrorCode::BlockedInput, reason);
            return Err(ErrorCode::BlockedInput);
        }
        trace.stage_passed("L2", entered);

        // ── L3: intent parsing ──────────────────────────────────────────
        let entered = Instant::now();
        let parsed = intent::parse_intent(
            &self.client,
            &cfg.models.router_model,
            &sanitized.text,
            &trace,
            stage_deadline(overall_deadline, BUDGET_CLASSIFY),
        )
        .await;
        let parsed = match parsed {
            Ok(i) => i,
            Err(e) => {
                let code = backend_error_code(&e);
                warn!(error = %e, "intent parse failed");
                trace.stage_halted("L3", entered, code, "intent parse failed");
                return Err(code);
            }
        };
        trace.stage_passed("L3", entered);

        // ── L4: domain routing ──────────────────────────────────────────
        let entered = Instant::now();
        let domain = intent::route(&parsed, &sanitized.text);
        if domain == Domain::OutOfScope {
            trace.stage_halted(
                "L4",
                entered,
                ErrorCode::OutOfScope,
                format!("topic {:?}", parsed.topic),
            );
            return Err(ErrorCode::OutOfScope);
        }
        trace.stage_passed("L4", entered);

        // ── L5: context retrieval ───────────────────────────────────────
        let entered = Instant::now();
        let context = self.registry.context_for(domain);
        trace.stage_passed("L5", entered);

        let history = palisade_sessions::history::bounded_window(
            &snapshot.turns,
            cfg.conversation.max_history_tokens,
        );

        // ── L6: generation + tool loop ──────────────────────────────────
        let entered = Instant::now();
        let generated = generate::generate(
            &self.client,
            &cfg.models.generator_model,
            &self.inbox,
            GenerationInput {
                domain,
                context: &context,
                history: &history,
                message: &sanitized.text,
                conversation_id: Some(lease.id().as_str()),
                reinforcement: None,
            },
            &trace,
            stage_deadline(overall_deadline, BUDGET_GENERATE),
        )
        .await;
        let generated = match generated {
            Ok(g) => g,
            Err(e) => {
                let code = backend_error_code(&e);
                warn!(error = %e, "generation failed");
                trace.stage_halted("L6", entered, code, "generation failed");
                return Err(code);
            }
        };
        trace.stage_passed("L6", entered);

        // ── L7: revision (advisory) ─────────────────────────────────────
        let entered = Instant::now();
        let draft = revise::revise(
            &self.client,
            &cfg.models.generator_model,
            &generated.content,
            &context,
            &trace,
            stage_deadline(overall_deadline, BUDGET_GENERATE),
        )
        .await;
        trace.stage_passed("L7", entered);

        // ── L8: output safety, one reinforced retry ─────────────────────
        let entered = Instant::now();
        let final_text = match self
            .safety_gate(&draft, domain, &context, &history, &sanitized.text, &lease, &trace, overall_deadline)
            .await
        {
            Ok(text) => text,
            Err(issues) => {
                trace.stage_halted("L8", entered, ErrorCode::SafetyFailed, issues);
                return Err(ErrorCode::SafetyFailed);
            }
        };
        trace.stage_passed("L8", entered);

        // ── L9: delivery ────────────────────────────────────────────────
        let entered = Instant::now();
        let append = self.store.append(
            lease.id(),
            Turn::user(sanitized.text.clone()),
            Turn::assistant(final_text.clone(), domain, trace.elapsed_ms()),
        );
        if let Err(e) = append {
            // The response is already final; losing history is logged but
            // does not turn a good answer into an error.
            warn!(error = %e, "conversation append failed");
        }
        trace.stage_passed("L9", entered);

        Ok((final_text, domain, lease.id().to_string()))
    }

    /// Safety check with the single reinforced regeneration permitted per
    /// request. Ok(text) is the approved response; Err(issues) means both
    /// attempts failed and the caller returns the canned reply.
    #[allow(clippy::too_many_arguments)]
    async fn safety_gate(
        &self,
        draft: &str,
        domain: Domain,
        context: &str,
        history: &[Turn],
        message: &str,
        lease: &palisade_sessions::ConversationLease,
        trace: &RequestTrace,
        overall_deadline: TokioInstant,
    ) -> Result<String, String> {
        let cfg = &self.config;

        let assessment = self
            .assess(draft, context, trace, overall_deadline)
            .await;
        if assessment.safe {
            return Ok(draft.to_string());
        }

        let note = format!(
            "Your previous answer was rejected by the output check for: {}. \
             Write a fresh answer that avoids every listed problem. Stay \
             strictly within the trusted context.",
            assessment.issues.join("; ")
        );
        let retry = generate::generate(
            &self.client,
            &cfg.models.generator_model,
            &self.inbox,
            GenerationInput {
                domain,
                context,
                history,
                message,
                conversation_id: Some(lease.id().as_str()),
                reinforcement: Some(&note),
            },
            trace,
            stage_deadline(overall_deadline, BUDGET_GENERATE),
        )
        .await;

        let retry = match retry {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "safety regeneration failed");
                return Err("regeneration failed".to_string());
            }
        };

        let second = self
            .assess(&retry.content, context, trace, overall_deadline)
            .await;
        if second.safe {
            Ok(retry.content)
        } else {
            Err(second.issues.join("; "))
        }
    }

    /// Classifier verdict plus the optional embedding grounding check.
    async fn assess(
        &self,
        text: &str,
        context: &str,
        trace: &RequestTrace,
        overall_deadline: TokioInstant,
    ) -> safety::SafetyAssessment {
        let cfg = &self.config;
        let deadline = stage_deadline(overall_deadline, BUDGET_CLASSIFY);
        let mut assessment =
            safety::check(&self.client, &cfg.models.verifier_model, text, trace, deadline).await;

        if assessment.safe {
            if let Some(false) = safety::grounding(
                &self.client,
                cfg.models.embedding_model.as_deref(),
                text,
                context,
                cfg.models.grounding_threshold,
                deadline,
            )
            .await
            {
                assessment.safe = false;
                assessment.issues.push("ungrounded_response".to_string());
            }
        }
        assessment
    }
}

fn stage_deadline(overall: TokioInstant, budget: Duration) -> TokioInstant {
    overall.min(TokioInstant::now() + budget)
}

/// Gate saturation is backpressure, not breakage — it maps to
/// RATE_LIMITED. Every other backend fault is an internal error.
fn backend_error_code(e: &palisade_models::BackendError) -> ErrorCode {
    match e {
        palisade_models::BackendError::GateSaturated => ErrorCode::RateLimited,
        _ => ErrorCode::InternalError,
    }
}
