//! Typed error hierarchy for the workbench server.
//!
//! `WsError` covers every failure a protocol message can produce. Each
//! variant carries a stable machine-readable code that goes out on the wire
//! alongside the human-readable message; a failed message never terminates
//! the connection.

use thiserror::Error;

/// Errors surfaced to protocol clients as `error` messages.
#[derive(Debug, Error)]
pub enum WsError {
    #[error("path escapes the workspace root")]
    PathTraversal,

    #[error("symbolic links are not allowed")]
    SymlinkForbidden,

    #[error("session is not bound to a workspace; send init first")]
    NotInitialized,

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("file is {size} bytes, read limit is {limit}")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("file content is not text")]
    BinaryNotAllowed,

    #[error("write is {size} bytes, write limit is {limit}")]
    WriteTooLarge { size: u64, limit: u64 },

    #[error("workspace is not empty")]
    WorkspaceNotEmpty,

    #[error("workspace setup failed: {0}")]
    SetupFailed(String),

    #[error("failed to start dev process: {0}")]
    ProcessStartFailed(String),

    #[error("upstream preview connection failed: {0}")]
    ProxyUpstreamFailed(String),

    #[error("working directory not found")]
    CwdNotFound,

    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WsError {
    /// Stable wire code for this error, sent in the `code` field of `error`
    /// messages so clients can match without parsing prose.
    pub fn code(&self) -> &'static str {
        match self {
            WsError::PathTraversal => "E_PATH_TRAVERSAL",
            WsError::SymlinkForbidden => "E_SYMLINK_FORBIDDEN",
            WsError::NotInitialized => "E_NOT_INIT",
            WsError::FileNotFound(_) => "E_NOT_FOUND",
            WsError::FileTooLarge { .. } => "E_FILE_TOO_LARGE",
            WsError::BinaryNotAllowed => "E_BINARY_NOT_ALLOWED",
            WsError::WriteTooLarge { .. } => "E_WRITE_TOO_LARGE",
            WsError::WorkspaceNotEmpty => "E_WORKSPACE_NOT_EMPTY",
            WsError::SetupFailed(_) => "E_SETUP_FAILED",
            WsError::ProcessStartFailed(_) => "E_PROC_START_FAILED",
            WsError::ProxyUpstreamFailed(_) => "E_PROXY_UPSTREAM",
            WsError::CwdNotFound => "E_CWD_NOT_FOUND",
            WsError::UnknownMessageType(_) => "E_UNKNOWN_TYPE",
            WsError::BadRequest(_) => "E_BAD_REQUEST",
            WsError::Io(_) => "E_IO",
            WsError::Other(_) => "E_INTERNAL",
        }
    }
}
