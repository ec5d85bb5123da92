//! Preview proxy: forwards HTTP requests and WebSocket frames from the
//! client-facing endpoint to a session's dev server, same-origin.
//!
//! The upstream is the URL discovered from the dev process's logs; until one
//! is known the proxy answers `502` with an `E_PROXY_UPSTREAM` body rather
//! than guessing at a port that may not be bound.

use axum::body::Body;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{Path, Request, State, WebSocketUpgrade};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;
use tracing::{debug, warn};

use crate::errors::WsError;
use crate::server::app::{AppState, SharedState};

/// Hop-by-hop request headers never forwarded upstream.
const HOP_BY_HOP: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Response headers dropped on the way back to the client.
const RESPONSE_STRIP: &[&str] = &["content-encoding", "transfer-encoding", "connection"];

const UPSTREAM_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

/// Resolve the discovered dev URL for a session.
fn upstream_base(state: &AppState, session_id: &str) -> Result<String, WsError> {
    let endpoint = state
        .registry
        .endpoint(session_id)
        .ok_or_else(|| WsError::ProxyUpstreamFailed(format!("unknown session {session_id}")))?;
    endpoint
        .url()
        .ok_or_else(|| WsError::ProxyUpstreamFailed("dev server URL not discovered yet".into()))
}

fn join_target(base: &str, path: &str, query: Option<&str>) -> String {
    let mut target = format!("{}/{}", base.trim_end_matches('/'), path);
    if let Some(query) = query {
        target.push('?');
        target.push_str(query);
    }
    target
}

/// Rewrite an http(s) base into the matching ws(s) URL.
fn ws_scheme(base: &str) -> String {
    if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        format!("ws://{base}")
    }
}

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.contains(&name.to_ascii_lowercase().as_str())
}

fn is_response_stripped(name: &str) -> bool {
    RESPONSE_STRIP.contains(&name.to_ascii_lowercase().as_str())
}

fn proxy_error_response(err: &WsError) -> Response {
    (
        StatusCode::BAD_GATEWAY,
        axum::Json(serde_json::json!({
            "error": err.code(),
            "message": err.to_string(),
        })),
    )
        .into_response()
}

// ── HTTP forwarding ──────────────────────────────────────────────────

pub async fn preview_http(
    State(state): State<SharedState>,
    Path((session_id, path)): Path<(String, String)>,
    req: Request,
) -> Response {
    match forward_http(&state, &session_id, &path, req).await {
        Ok(response) => response,
        Err(e) => {
            debug!(session = %session_id, "preview proxy failed: {e}");
            proxy_error_response(&e)
        }
    }
}

async fn forward_http(
    state: &AppState,
    session_id: &str,
    path: &str,
    req: Request,
) -> Result<Response, WsError> {
    let base = upstream_base(state, session_id)?;
    let (parts, body) = req.into_parts();
    let target = join_target(&base, path, parts.uri.query());

    let method = reqwest::Method::from_bytes(parts.method.as_str().as_bytes())
        .map_err(|e| WsError::ProxyUpstreamFailed(e.to_string()))?;

    let mut headers = reqwest::header::HeaderMap::new();
    for (name, value) in parts.headers.iter() {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }
        let Ok(name) = reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes()) else {
            continue;
        };
        let Ok(value) = reqwest::header::HeaderValue::from_bytes(value.as_bytes()) else {
            continue;
        };
        headers.insert(name, value);
    }

    let body = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| WsError::ProxyUpstreamFailed(format!("failed to read request body: {e}")))?;

    let upstream = state
        .http
        .request(method, &target)
        .headers(headers)
        .body(body.to_vec())
        .timeout(UPSTREAM_TIMEOUT)
        .send()
        .await
        .map_err(|e| WsError::ProxyUpstreamFailed(e.to_string()))?;

    let status = StatusCode::from_u16(upstream.status().as_u16())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let response_headers: Vec<(String, Vec<u8>)> = upstream
        .headers()
        .iter()
        .filter(|(name, _)| !is_response_stripped(name.as_str()))
        .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
        .collect();
    let body = upstream
        .bytes()
        .await
        .map_err(|e| WsError::ProxyUpstreamFailed(e.to_string()))?;

    let mut builder = Response::builder().status(status);
    for (name, value) in response_headers {
        builder = builder.header(name, value);
    }
    builder
        .body(Body::from(body.to_vec()))
        .map_err(|e| WsError::ProxyUpstreamFailed(e.to_string()))
}

// ── WebSocket forwarding ─────────────────────────────────────────────

pub async fn preview_ws(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
    Path((session_id, path)): Path<(String, String)>,
    uri: Uri,
) -> Response {
    let query = uri.query().map(String::from);
    ws.on_upgrade(move |client| run_ws_proxy(client, state, session_id, path, query))
}

async fn run_ws_proxy(
    mut client: WebSocket,
    state: SharedState,
    session_id: String,
    path: String,
    query: Option<String>,
) {
    let target = match upstream_base(&state, &session_id) {
        Ok(base) => join_target(&ws_scheme(&base), &path, query.as_deref()),
        Err(e) => {
            let _ = send_proxy_error(&mut client, &e).await;
            return;
        }
    };

    let upstream = match tokio_tungstenite::connect_async(target.as_str()).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            warn!(session = %session_id, %target, "upstream websocket failed: {e}");
            let err = WsError::ProxyUpstreamFailed(e.to_string());
            let _ = send_proxy_error(&mut client, &err).await;
            return;
        }
    };

    let (mut upstream_tx, mut upstream_rx) = upstream.split();
    let (mut client_tx, mut client_rx) = client.split();

    // pump frames both ways until either side hangs up
    loop {
        tokio::select! {
            frame = client_rx.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    if upstream_tx
                        .send(tungstenite::Message::Text(text.to_string()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Some(Ok(WsMessage::Binary(data))) => {
                    if upstream_tx
                        .send(tungstenite::Message::Binary(data.to_vec()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            },

            frame = upstream_rx.next() => match frame {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    if client_tx.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Some(Ok(tungstenite::Message::Binary(data))) => {
                    if client_tx.send(WsMessage::Binary(data.into())).await.is_err() {
                        break;
                    }
                }
                Some(Ok(tungstenite::Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            },
        }
    }

    let _ = client_tx.send(WsMessage::Close(None)).await;
    let _ = upstream_tx.send(tungstenite::Message::Close(None)).await;
}

async fn send_proxy_error(client: &mut WebSocket, err: &WsError) -> Result<(), axum::Error> {
    let payload = serde_json::json!({
        "type": "proxy_error",
        "code": err.code(),
        "message": err.to_string(),
    })
    .to_string();
    client.send(WsMessage::Text(payload.into())).await?;
    client.send(WsMessage::Close(None)).await
}
