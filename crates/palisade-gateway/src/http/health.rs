use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::app::ServerState;

/// GET /health — liveness probe. "degraded" means the process is up but
/// the model backend failed its most recent probe.
pub async fn health_handler(State(state): State<Arc<ServerState>>) -> Json<Value> {
    let models_loaded = state.models_loaded.load(Ordering::Relaxed);
    Json(json!({
        "status": if models_loaded { "healthy" } else { "degraded" },
        "models_loaded": models_loaded,
        "uptime_seconds": state.uptime_seconds(),
    }))
}
