use axum::{
    routing::{get, post},
    Router,
};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use palisade_pipeline::Pipeline;

/// Central shared state — passed as Arc<ServerState> to all Axum handlers.
pub struct ServerState {
    pub pipeline: Pipeline,
    pub started: Instant,
    /// Flipped by the background prober; /health reports "degraded" when
    /// the most recent probe failed.
    pub models_loaded: AtomicBool,
}

impl ServerState {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            started: Instant::now(),
            models_loaded: AtomicBool::new(false),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/chat", post(crate::http::chat::chat_handler))
        .route("/health", get(crate::http::health::health_handler))
        .route(
            "/admin/analytics/summary",
            get(crate::http::admin::analytics_summary),
        )
        .route("/admin/inbox", get(crate::http::admin::inbox_list))
        .route("/admin/inbox/{id}", get(crate::http::admin::inbox_read))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
