//! Application state, router assembly, and server startup.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::State,
    routing::{any, get},
};
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::config::Config;
use crate::proxy;
use crate::server::ws;
use crate::session::SessionRegistry;

/// Shared application state: configuration, the session registry, and the
/// upstream HTTP client used by the preview proxy.
pub struct AppState {
    pub config: Config,
    pub registry: SessionRegistry,
    pub http: reqwest::Client,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(config: Config) -> Result<Self> {
        // the proxy must relay redirects unmodified, never follow them
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("failed to build upstream HTTP client")?;
        Ok(Self {
            config,
            registry: SessionRegistry::default(),
            http,
        })
    }
}

/// Build the full application router.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/ws", get(ws::ws_handler))
        .route("/preview/{session_id}/{*path}", any(proxy::preview_http))
        .route("/preview-ws/{session_id}/{*path}", get(proxy::preview_ws))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Liveness endpoint reporting configured limits and root path.
async fn healthz(State(state): State<SharedState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "ok": true,
        "workspace_root": state.config.workspace_root.display().to_string(),
        "watch_enabled": state.config.watch_enabled,
        "limits": {
            "read": state.config.max_read_bytes,
            "write": state.config.max_write_bytes,
        },
    }))
}

/// Bind and serve until ctrl-c.
pub async fn start_server(config: Config, host: &str, port: u16) -> Result<()> {
    let state = Arc::new(AppState::new(config)?);
    let app = build_router(state);

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    info!("workbench listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install ctrl-c handler");
    info!("shutting down ...");
}
