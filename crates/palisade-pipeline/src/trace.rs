//! Per-request trace: which stages ran, how long they took, what they
//! decided, and every model call made on the request's behalf.
//!
//! The trace lives behind a mutex inside an `Arc` so the orchestrator can
//! keep reading it even when the request future is dropped at the
//! deadline — the short-circuit log record still gets written.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use palisade_core::error::ErrorCode;

#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    pub layer: &'static str,
    pub duration_ms: u64,
    pub verdict: StageVerdict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageVerdict {
    Pass,
    Halt,
}

/// One model invocation, as it appears in the request log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCallRecord {
    pub model: String,
    pub duration_ms: u64,
    pub tokens_in: u32,
    pub tokens_out: u32,
}

#[derive(Debug, Default)]
struct TraceInner {
    stages: Vec<StageRecord>,
    model_calls: Vec<ModelCallRecord>,
    blocked_at: Option<&'static str>,
    block_reason: Option<String>,
}

#[derive(Debug)]
pub struct RequestTrace {
    started: Instant,
    inner: Mutex<TraceInner>,
}

impl RequestTrace {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            inner: Mutex::new(TraceInner::default()),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn stage_passed(&self, layer: &'static str, entered: Instant) {
        let mut inner = self.inner.lock().unwrap();
        inner.stages.push(StageRecord {
            layer,
            duration_ms: entered.elapsed().as_millis() as u64,
            verdict: StageVerdict::Pass,
        });
    }

    pub fn stage_halted(
        &self,
        layer: &'static str,
        entered: Instant,
        code: ErrorCode,
        reason: impl Into<String>,
    ) {
        let mut inner = self.inner.lock().unwrap();
        inner.stages.push(StageRecord {
            layer,
            duration_ms: entered.elapsed().as_millis() as u64,
            verdict: StageVerdict::Halt,
        });
        inner.blocked_at = Some(layer);
        inner.block_reason = Some(format!("{}: {}", code.as_str(), reason.into()));
    }

    pub fn model_call(&self, model: &str, duration_ms: u64, tokens_in: u32, tokens_out: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.model_calls.push(ModelCallRecord {
            model: model.to_string(),
            duration_ms,
            tokens_in,
            tokens_out,
        });
    }

    /// Layers that ran to a Pass verdict, in order.
    pub fn layers_passed(&self) -> Vec<&'static str> {
        self.inner
            .lock()
            .unwrap()
            .stages
            .iter()
            .filter(|s| s.verdict == StageVerdict::Pass)
            .map(|s| s.layer)
            .collect()
    }

    pub fn blocked_at(&self) -> Option<&'static str> {
        self.inner.lock().unwrap().blocked_at
    }

    pub fn block_reason(&self) -> Option<String> {
        self.inner.lock().unwrap().block_reason.clone()
    }

    pub fn model_calls(&self) -> Vec<ModelCallRecord> {
        self.inner.lock().unwrap().model_calls.clone()
    }

    /// Per-layer durations for response metadata (METRICS_ENABLED only).
    pub fn layer_timings_ms(&self) -> BTreeMap<String, u64> {
        self.inner
            .lock()
            .unwrap()
            .stages
            .iter()
            .map(|s| (s.layer.to_string(), s.duration_ms))
            .collect()
    }

    /// True if any stage record exists for `layer` (pass or halt).
    pub fn entered(&self, layer: &str) -> bool {
        self.inner
            .lock()
            .unwrap()
            .stages
            .iter()
            .any(|s| s.layer == layer)
    }
}

impl Default for RequestTrace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halt_records_layer_and_reason() {
        let trace = RequestTrace::new();
        let t = Instant::now();
        trace.stage_passed("L0", t);
        trace.stage_halted("L1", t, ErrorCode::BlockedInput, "rule instruction_override");
        assert_eq!(trace.layers_passed(), vec!["L0"]);
        assert_eq!(trace.blocked_at(), Some("L1"));
        assert!(trace.block_reason().unwrap().contains("BLOCKED_INPUT"));
        assert!(trace.entered("L1"));
        assert!(!trace.entered("L2"));
    }
}
