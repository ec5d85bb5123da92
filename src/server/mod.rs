//! HTTP/WebSocket server — the client-facing surface of the workbench.
//!
//! ```text
//! ┌──────────┐    /ws      ┌────────────────────────────────────────────┐
//! │  Client  │ ──────────> │  ws.rs     per-connection dispatcher loop  │
//! │ (editor) │ <────────── │    ├─ session::Session (single writer)     │
//! └──────────┘  messages   │    ├─ workspace::{paths,files,tree}        │
//!      │                   │    ├─ workspace::setup  (background task)  │
//!      │ /preview/{sid}/.. │    ├─ workspace::watch  (background task)  │
//!      └─────────────────> │    └─ dev::{start,stop} + logs pump        │
//!                          │  proxy.rs  HTTP/WS forwarding to dev URL   │
//!                          │  app.rs    Router, AppState, /healthz      │
//!                          └────────────────────────────────────────────┘
//! ```
//!
//! The dispatcher loop owns its `Session` outright: every inbound message is
//! handled in order, background producers funnel their output through one
//! mpsc channel, and only the loop writes the socket. Disconnect tears down
//! setup job, dev process, watcher and log pump — in that order — before the
//! session leaves the registry.

pub mod app;
pub mod ws;

pub use app::{AppState, SharedState, build_router, start_server};
