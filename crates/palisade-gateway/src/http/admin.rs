//! Read-only admin surface: request-log aggregates and the contact inbox.
//! Exposure is a deployment concern (bind these behind the private
//! interface); no write operations exist here.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::app::ServerState;

/// GET /admin/analytics/summary — aggregates over the JSONL request log.
pub async fn analytics_summary(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<Value>, StatusCode> {
    let records = state
        .pipeline
        .log()
        .read_all()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let total = records.len() as u64;
    let mut blocked_by_layer: BTreeMap<String, u64> = BTreeMap::new();
    let mut by_domain: BTreeMap<String, u64> = BTreeMap::new();
    let mut completed = 0u64;
    let mut latency_sum = 0u64;

    for record in &records {
        latency_sum += record.response_time_ms;
        match &record.blocked_at_layer {
            Some(layer) => *blocked_by_layer.entry(layer.clone()).or_insert(0) += 1,
            None => completed += 1,
        }
        if let Some(domain) = &record.domain_matched {
            *by_domain.entry(domain.clone()).or_insert(0) += 1;
        }
    }

    Ok(Json(json!({
        "total_requests": total,
        "completed": completed,
        "blocked_by_layer": blocked_by_layer,
        "domains": by_domain,
        "avg_response_time_ms": if total == 0 { 0 } else { latency_sum / total },
    })))
}

/// GET /admin/inbox — all contact messages, newest first.
pub async fn inbox_list(State(state): State<Arc<ServerState>>) -> Result<Json<Value>, StatusCode> {
    let messages = state
        .pipeline
        .inbox()
        .list()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(json!({ "messages": messages })))
}

/// GET /admin/inbox/{id} — one contact message.
pub async fn inbox_read(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    match state.pipeline.inbox().read(&id) {
        Some(msg) => Ok(Json(json!(msg))),
        None => Err(StatusCode::NOT_FOUND),
    }
}
