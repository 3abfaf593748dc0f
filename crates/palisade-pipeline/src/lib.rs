//! The Palisade request pipeline: ten ordered stages between an untrusted
//! visitor message and a model-generated answer, each stage assuming the
//! one before it failed.
//!
//! Layers: L0 network gate → L1 sanitization → L2 jailbreak classifier →
//! L3 intent → L4 domain route → L5 context → L6 generation (+ tool loop)
//! → L7 revision → L8 output safety → L9 delivery. The [`orchestrator`]
//! drives them; everything else here is one stage or one shared service.

pub mod classify;
pub mod context;
pub mod gate;
pub mod generate;
pub mod inbox;
pub mod intent;
pub mod orchestrator;
pub mod prompts;
pub mod ratelimit;
pub mod reqlog;
pub mod revise;
pub mod safety;
pub mod sanitize;
pub mod trace;

pub use context::ContextRegistry;
pub use inbox::ContactInbox;
pub use orchestrator::{ChatOutcome, ChatSuccess, InboundRequest, Pipeline};
pub use ratelimit::RateLimiter;
pub use reqlog::RequestLog;
