//! Wire protocol for the workspace WebSocket endpoint.
//!
//! Every frame is a flat JSON object with a `type` discriminator and an
//! optional client-supplied `req_id` echoed back on the matching response.
//! Requests are answered with `<type>_ok` messages or an `error`; background
//! producers (log pump, watcher, setup pipeline, keepalive) interleave
//! unsolicited messages on the same connection.

use serde::{Deserialize, Serialize};

// ── Inbound ──────────────────────────────────────────────────────────

/// Whether `init` should reset the workspace from the remote source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SetupMode {
    /// Reset when the workspace is empty or the active project changed.
    #[default]
    Auto,
    /// Always reset.
    Force,
    /// Never reset; only ensure the watcher is running.
    Skip,
}

fn default_true() -> bool {
    true
}

fn default_depth() -> u32 {
    2
}

/// Client requests, routed by the dispatcher.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    Init {
        email: String,
        #[serde(default)]
        project_id: Option<String>,
        #[serde(default)]
        repo_url: Option<String>,
        #[serde(default)]
        setup: SetupMode,
    },
    SetupWorkspace {
        #[serde(default)]
        repo_url: Option<String>,
        #[serde(default)]
        project_id: Option<String>,
    },
    ListTree {
        #[serde(default)]
        path: String,
        #[serde(default = "default_depth")]
        max_depth: u32,
    },
    ReadFile {
        path: String,
    },
    WriteFile {
        path: String,
        content: String,
        #[serde(default = "default_true")]
        create_if_missing: bool,
    },
    Chat {
        message: String,
    },
    StartDev,
    StopDev,
    SetCwd {
        cwd: String,
    },
}

/// Message types the dispatcher accepts. Anything else is rejected with
/// `E_UNKNOWN_TYPE` rather than a generic deserialization error.
pub const KNOWN_TYPES: &[&str] = &[
    "init",
    "setup_workspace",
    "list_tree",
    "read_file",
    "write_file",
    "chat",
    "start_dev",
    "stop_dev",
    "set_cwd",
];

pub fn is_known_type(t: &str) -> bool {
    KNOWN_TYPES.contains(&t)
}

// ── Outbound ─────────────────────────────────────────────────────────

/// One entry of a `list_tree_ok` response.
#[derive(Debug, Clone, Serialize)]
pub struct TreeEntry {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub mtime: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
}

/// One filesystem change inside an `fs_batch` message.
#[derive(Debug, Clone, Serialize)]
pub struct WatchEvent {
    pub event: ChangeKind,
    pub path: String,
    pub is_dir: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtime: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

/// Everything the server writes to the socket. Producers send these into the
/// session's outbound channel; only the dispatcher loop touches the socket,
/// which serializes concurrent writers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    SessionInit {
        session_id: String,
        cwd: String,
    },
    Ping {
        ts: f64,
    },
    InitOk {
        #[serde(skip_serializing_if = "Option::is_none")]
        req_id: Option<String>,
        email: String,
        cwd: String,
    },
    SetupLog {
        line: String,
    },
    SetupOk {
        #[serde(skip_serializing_if = "Option::is_none")]
        req_id: Option<String>,
        cwd: String,
    },
    ListTreeOk {
        #[serde(skip_serializing_if = "Option::is_none")]
        req_id: Option<String>,
        items: Vec<TreeEntry>,
    },
    ReadFileOk {
        #[serde(skip_serializing_if = "Option::is_none")]
        req_id: Option<String>,
        path: String,
        content: String,
    },
    WriteFileOk {
        #[serde(skip_serializing_if = "Option::is_none")]
        req_id: Option<String>,
        path: String,
    },
    ChatOk {
        #[serde(skip_serializing_if = "Option::is_none")]
        req_id: Option<String>,
        message: String,
    },
    StartDevOk {
        #[serde(skip_serializing_if = "Option::is_none")]
        req_id: Option<String>,
        ok: bool,
        message: String,
        cwd: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        dev_port: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        dev_url: Option<String>,
    },
    StopDevOk {
        #[serde(skip_serializing_if = "Option::is_none")]
        req_id: Option<String>,
    },
    SetCwdOk {
        #[serde(skip_serializing_if = "Option::is_none")]
        req_id: Option<String>,
        cwd: String,
    },
    DevLog {
        line: String,
    },
    DevUrl {
        url: String,
    },
    FsBatch {
        session_id: String,
        events: Vec<WatchEvent>,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        req_id: Option<String>,
        code: String,
        message: String,
    },
}

impl ServerMessage {
    pub fn error(req_id: Option<String>, err: &crate::errors::WsError) -> Self {
        ServerMessage::Error {
            req_id,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}
