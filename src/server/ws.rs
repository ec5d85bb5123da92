//! Per-connection protocol dispatcher.
//!
//! One loop per client: inbound frames are handled strictly in order, the
//! keepalive fires on an interval, and everything any producer wants to send
//! (responses, dev logs, watcher batches, setup events) flows through one
//! mpsc channel so socket writes are serialized. A failed message reports an
//! `error` and the loop continues; only transport failure ends the session.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use chrono::Utc;
use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dev;
use crate::errors::WsError;
use crate::protocol::{ClientRequest, ServerMessage, is_known_type};
use crate::server::app::{AppState, SharedState};
use crate::session::{Session, TaskSlot};
use crate::workspace::{files, paths, setup, tree, watch};

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: SharedState) {
    let (mut sender, mut receiver) = socket.split();
    let mut session = state.registry.create_at(&state.config.workspace_root);
    info!(session = %session.id, "client connected");

    // The send lock: producers push here, only this loop writes the socket.
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let _ = tx.send(ServerMessage::SessionInit {
        session_id: session.id.clone(),
        cwd: session.cwd.display().to_string(),
    });

    let mut keepalive = tokio::time::interval(state.config.keepalive_interval);
    // the first tick completes immediately; consume it
    keepalive.tick().await;

    loop {
        tokio::select! {
            _ = keepalive.tick() => {
                let ping = ServerMessage::Ping {
                    ts: Utc::now().timestamp_millis() as f64 / 1000.0,
                };
                if send_json(&mut sender, &ping).await.is_err() {
                    break;
                }
            }

            outbound = rx.recv() => {
                // tx is held by this loop, so the channel never closes here
                let Some(msg) = outbound else { break };
                if send_json(&mut sender, &msg).await.is_err() {
                    break;
                }
            }

            frame = receiver.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&state, &mut session, &tx, text.as_str()).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // ping/pong/binary from client: ignored
                    Some(Err(e)) => {
                        debug!(session = %session.id, "socket error: {e}");
                        break;
                    }
                }
            }
        }
    }

    // Stop producers before the session leaves the registry so nothing
    // writes into a dead connection's channel.
    info!(session = %session.id, "client disconnected, tearing down");
    session.teardown().await;
    state.registry.remove(&session.id);
}

async fn send_json(
    sender: &mut SplitSink<WebSocket, Message>,
    msg: &ServerMessage,
) -> Result<(), axum::Error> {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await,
        Err(e) => {
            warn!("failed to serialize outbound message: {e}");
            Ok(())
        }
    }
}

/// Parse and route one inbound frame. Per-message failures are reported as
/// `error` messages; they never terminate the connection.
pub async fn handle_frame(
    state: &AppState,
    session: &mut Session,
    tx: &UnboundedSender<ServerMessage>,
    text: &str,
) {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(_) => {
            let err = WsError::BadRequest("invalid JSON".into());
            let _ = tx.send(ServerMessage::error(None, &err));
            return;
        }
    };
    let req_id = value
        .get("req_id")
        .and_then(|v| v.as_str())
        .map(String::from);

    let Some(msg_type) = value.get("type").and_then(|v| v.as_str()).map(String::from) else {
        let err = WsError::BadRequest("missing 'type'".into());
        let _ = tx.send(ServerMessage::error(req_id, &err));
        return;
    };
    if !is_known_type(&msg_type) {
        let err = WsError::UnknownMessageType(msg_type);
        let _ = tx.send(ServerMessage::error(req_id, &err));
        return;
    }

    let request: ClientRequest = match serde_json::from_value(value) {
        Ok(request) => request,
        Err(e) => {
            let err = WsError::BadRequest(e.to_string());
            let _ = tx.send(ServerMessage::error(req_id, &err));
            return;
        }
    };

    if let Err(e) = handle_request(state, session, tx, req_id.clone(), request).await {
        let _ = tx.send(ServerMessage::error(req_id, &e));
    }
}

fn require_init(session: &Session) -> Result<&str, WsError> {
    session
        .owner
        .as_deref()
        .ok_or(WsError::NotInitialized)
}

/// Route one parsed request.
pub async fn handle_request(
    state: &AppState,
    session: &mut Session,
    tx: &UnboundedSender<ServerMessage>,
    req_id: Option<String>,
    request: ClientRequest,
) -> Result<(), WsError> {
    match request {
        ClientRequest::Init {
            email,
            project_id,
            repo_url,
            setup: mode,
        } => {
            let folder = paths::owner_folder(&email);
            let user_root = paths::safe_join(&state.config.workspace_root, &folder)?;
            tokio::fs::create_dir_all(&user_root).await?;

            session.owner = Some(email.clone());
            session.cwd = user_root.clone();
            let _ = tx.send(ServerMessage::InitOk {
                req_id,
                email: email.clone(),
                cwd: user_root.display().to_string(),
            });

            let slot = state.registry.owner_slot(&email);
            let empty = setup::workspace_is_empty(&user_root);
            let active = slot.active_project();
            if setup::should_run_setup(mode, empty, active.as_deref(), project_id.as_deref()) {
                match repo_url.or_else(|| state.config.default_clone_url.clone()) {
                    Some(url) => spawn_setup(state, session, url, project_id, None, tx),
                    None => warn!(
                        session = %session.id,
                        "workspace reset wanted but no repository URL configured"
                    ),
                }
            }

            // (re)start the watcher on the freshly bound workspace; notify's
            // recursive mode picks up directories the setup clone creates
            restart_watcher(state, session, tx).await;
            Ok(())
        }

        ClientRequest::SetupWorkspace {
            repo_url,
            project_id,
        } => {
            require_init(session)?;
            let url = repo_url
                .or_else(|| state.config.default_clone_url.clone())
                .ok_or_else(|| WsError::SetupFailed("no repository URL configured".into()))?;
            spawn_setup(state, session, url, project_id, req_id, tx);
            Ok(())
        }

        ClientRequest::ListTree { path, max_depth } => {
            require_init(session)?;
            let cwd = session.cwd.clone();
            let excludes = state.config.excludes.clone();
            let items = tokio::task::spawn_blocking(move || {
                tree::list_tree(&cwd, &path, max_depth, &excludes)
            })
            .await
            .map_err(|e| WsError::Other(anyhow::anyhow!("list_tree task failed: {e}")))??;
            let _ = tx.send(ServerMessage::ListTreeOk { req_id, items });
            Ok(())
        }

        ClientRequest::ReadFile { path } => {
            require_init(session)?;
            let content = files::read_file(&state.config, &session.cwd, &path).await?;
            let _ = tx.send(ServerMessage::ReadFileOk {
                req_id,
                path,
                content,
            });
            Ok(())
        }

        ClientRequest::WriteFile {
            path,
            content,
            create_if_missing,
        } => {
            require_init(session)?;
            files::write_file(&state.config, &session.cwd, &path, &content, create_if_missing)
                .await?;
            let _ = tx.send(ServerMessage::WriteFileOk { req_id, path });
            Ok(())
        }

        ClientRequest::Chat { message } => {
            let reply = format!(
                "(demo) email={} | msg= {}",
                session.owner.as_deref().unwrap_or("-"),
                message.trim()
            );
            let _ = tx.send(ServerMessage::ChatOk {
                req_id,
                message: reply,
            });
            Ok(())
        }

        ClientRequest::StartDev => {
            require_init(session)?;
            let outcome = dev::start_dev(&state.config, session).await?;
            if let Some(output) = outcome.spawned {
                // a previous pump drains to EOF on its own once the old
                // process dies; cancel it anyway so only one is live
                if let Some(old) = session.log_pump.take() {
                    old.token.cancel();
                }
                let token = CancellationToken::new();
                let handle = tokio::spawn(dev::logs::pump_logs(
                    output,
                    session.endpoint.clone(),
                    tx.clone(),
                    token.clone(),
                ));
                session.log_pump = Some(TaskSlot::new(token, handle));
            }
            let _ = tx.send(ServerMessage::StartDevOk {
                req_id,
                ok: outcome.ok,
                message: outcome.message,
                cwd: session.cwd.display().to_string(),
                dev_port: outcome.dev_port,
                dev_url: outcome.dev_url,
            });
            Ok(())
        }

        ClientRequest::StopDev => {
            require_init(session)?;
            dev::stop_dev(session).await;
            let _ = tx.send(ServerMessage::StopDevOk { req_id });
            Ok(())
        }

        ClientRequest::SetCwd { cwd } => {
            let new_cwd = paths::safe_join(&state.config.workspace_root, &cwd)?;
            if !new_cwd.is_dir() {
                return Err(WsError::CwdNotFound);
            }
            session.cwd = new_cwd.clone();
            let _ = tx.send(ServerMessage::SetCwdOk {
                req_id,
                cwd: new_cwd.display().to_string(),
            });
            Ok(())
        }
    }
}

/// Spawn a background setup job for the session's workspace, superseding any
/// in-flight one (for this session immediately; for other sessions of the
/// same owner via the owner slot's cancel-and-await protocol).
fn spawn_setup(
    state: &AppState,
    session: &mut Session,
    repo_url: String,
    project_id: Option<String>,
    req_id: Option<String>,
    tx: &UnboundedSender<ServerMessage>,
) {
    if let Some(old) = session.setup.take() {
        old.token.cancel();
    }
    let slot = state
        .registry
        .owner_slot(session.owner.as_deref().unwrap_or_default());
    let token = CancellationToken::new();
    let handle = tokio::spawn(setup::run_setup(
        slot,
        session.cwd.clone(),
        repo_url,
        project_id,
        req_id,
        tx.clone(),
        token.clone(),
    ));
    session.setup = Some(TaskSlot::new(token, handle));
}

/// Replace the session's watcher with one rooted at the current cwd.
async fn restart_watcher(
    state: &AppState,
    session: &mut Session,
    tx: &UnboundedSender<ServerMessage>,
) {
    if !state.config.watch_enabled {
        return;
    }
    if let Some(old) = session.watcher.take() {
        old.cancel_and_wait().await;
    }
    let token = CancellationToken::new();
    let handle = tokio::spawn(watch::watch_workspace(
        session.id.clone(),
        session.cwd.clone(),
        state.config.excludes.clone(),
        tx.clone(),
        token.clone(),
    ));
    session.watcher = Some(TaskSlot::new(token, handle));
}
