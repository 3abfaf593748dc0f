//! POST /chat — the single public entry point.
//!
//! Transport concerns (content type, JSON shape) answer with 4xx here;
//! everything past that is a pipeline outcome and returns HTTP 200 with
//! the verdict in the body, refusals included.

use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;

use palisade_pipeline::InboundRequest;

use crate::app::ServerState;

#[derive(Deserialize)]
struct ChatBody {
    message: String,
    #[serde(default)]
    conversation_id: Option<String>,
}

pub async fn chat_handler(
    State(state): State<Arc<ServerState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // ── Transport validation: 4xx territory ───────────────────────────────
    let is_json = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().starts_with("application/json"))
        .unwrap_or(false);
    if !is_json {
        return transport_error(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "content type must be application/json",
        );
    }

    let parsed: ChatBody = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(_) => return transport_error(StatusCode::BAD_REQUEST, "malformed JSON body"),
    };

    let forwarded_for = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    // ── Pipeline: always HTTP 200 from here ───────────────────────────────
    let outcome = state
        .pipeline
        .handle(InboundRequest {
            message: parsed.message,
            conversation_id: parsed.conversation_id,
            body_bytes: body.len(),
            peer_ip: peer.ip(),
            forwarded_for,
        })
        .await;

    let mut metadata = json!({
        "response_time_ms": outcome.response_time_ms,
        "request_id": outcome.request_id,
        "conversation_id": outcome.conversation_id,
    });
    if let Some(timings) = &outcome.layer_timings_ms {
        metadata["layer_timings_ms"] = json!(timings);
    }

    let body = match outcome.result {
        Ok(success) => json!({
            "success": true,
            "response": {
                "content": success.content,
                "domain": success.domain.as_str(),
            },
            "metadata": metadata,
        }),
        Err(code) => json!({
            "success": false,
            "error": {
                "code": code.as_str(),
                "message": code.user_message(),
            },
            "metadata": metadata,
        }),
    };

    (StatusCode::OK, Json(body)).into_response()
}

fn transport_error(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({
            "success": false,
            "error": { "code": "BAD_REQUEST", "message": message },
        })),
    )
        .into_response()
}
