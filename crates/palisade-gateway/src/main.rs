use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use palisade_models::{ModelClient, OllamaBackend};
use palisade_pipeline::{ContactInbox, ContextRegistry, Pipeline, RequestLog};
use palisade_sessions::ConversationStore;

mod app;
mod http;

/// Cadence for the background conversation sweep and rate-shard pruning.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// Cadence for the backend liveness probe feeding /health.
const PROBE_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "palisade_gateway=info,palisade_pipeline=info,tower_http=warn".into()),
        )
        .init();

    // load config: PALISADE_CONFIG env > ./palisade.toml > defaults
    let config_path = std::env::var("PALISADE_CONFIG").ok();
    let config = palisade_core::config::PalisadeConfig::load(config_path.as_deref())
        .unwrap_or_else(|e| {
            warn!("Config load failed ({}), using defaults", e);
            palisade_core::config::PalisadeConfig::default()
        });

    if config.security.ip_hash_salt == "change-me" {
        warn!("ip_hash_salt is the default value; set PALISADE_SECURITY__IP_HASH_SALT");
    }

    let backend = Arc::new(OllamaBackend::new(config.models.base_url.clone()));
    let client = ModelClient::new(backend, config.models.max_in_flight);
    let registry = ContextRegistry::load(
        &config.storage.context_dir,
        config.models.context_token_budget,
    )?;
    let store = Arc::new(ConversationStore::new(config.conversation.clone()));
    let inbox = ContactInbox::new(&config.storage.inbox_dir)?;
    let log = RequestLog::new(&config.storage.request_log_path)?;

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;

    let pipeline = Pipeline::new(config, client, registry, store, inbox, log);
    let state = Arc::new(app::ServerState::new(pipeline));
    let shutdown = CancellationToken::new();

    spawn_sweeper(Arc::clone(&state), shutdown.clone());
    spawn_prober(Arc::clone(&state), shutdown.clone());

    let router = app::build_router(Arc::clone(&state));
    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("Palisade gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    shutdown.cancel();
    Ok(())
}

/// Proactive sweep of expired conversations and drained rate shards. The
/// lazy sweep on access keeps correctness; this keeps memory flat.
fn spawn_sweeper(state: Arc<app::ServerState>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let removed = state.pipeline.store().sweep();
                    state.pipeline.limiter().prune_idle();
                    if removed > 0 {
                        info!(removed, "swept expired conversations");
                    }
                }
                _ = shutdown.cancelled() => return,
            }
        }
    });
}

/// Background backend probe. /health reports "degraded" between a failed
/// probe and the next successful one.
fn spawn_prober(state: Arc<app::ServerState>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(PROBE_INTERVAL);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let up = state.pipeline.probe_backend().await;
                    let was = state.models_loaded.swap(up, Ordering::Relaxed);
                    if was != up {
                        if up {
                            info!("model backend reachable");
                        } else {
                            warn!("model backend probe failed");
                        }
                    }
                }
                _ = shutdown.cancelled() => return,
            }
        }
    });
}
