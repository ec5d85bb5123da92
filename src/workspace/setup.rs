//! Workspace setup pipeline: clear the owner's directory and repopulate it
//! from a remote repository, with per-owner mutual exclusion and cooperative
//! cancellation.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::dev::process::{spawn_grouped, terminate_tree};
use crate::errors::WsError;
use crate::protocol::{ServerMessage, SetupMode};
use crate::session::OwnerSlot;

/// How a setup job ended. Cancellation is not an error: the superseding job
/// reports the terminal event instead.
#[derive(Debug, PartialEq, Eq)]
pub enum SetupOutcome {
    Completed,
    Cancelled,
}

/// True when the workspace has no entries (or does not exist yet).
pub fn workspace_is_empty(root: &Path) -> bool {
    match std::fs::read_dir(root) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => true,
    }
}

/// Decide whether `init` should reset the workspace: always when forced,
/// never when skipped, otherwise when the directory is empty or the owner's
/// remembered active project differs from the requested one. This avoids
/// wiping a workspace on an unrelated reconnect while still guaranteeing a
/// fresh checkout on project switch.
pub fn should_run_setup(
    mode: SetupMode,
    workspace_empty: bool,
    active_project: Option<&str>,
    requested_project: Option<&str>,
) -> bool {
    match mode {
        SetupMode::Force => true,
        SetupMode::Skip => false,
        SetupMode::Auto => {
            workspace_empty
                || matches!((active_project, requested_project),
                    (a, Some(r)) if a != Some(r))
        }
    }
}

/// Delete every entry inside `root` (not `root` itself), best-effort per
/// entry. Runs off the scheduler since large trees are slow to remove.
pub async fn clear_dir(root: &Path) -> std::io::Result<()> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || {
        std::fs::create_dir_all(&root)?;
        for entry in std::fs::read_dir(&root)? {
            let Ok(entry) = entry else { continue };
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            let result = if is_dir {
                std::fs::remove_dir_all(entry.path())
            } else {
                std::fs::remove_file(entry.path())
            };
            if let Err(e) = result {
                warn!(path = %entry.path().display(), "failed to remove entry: {e}");
            }
        }
        Ok(())
    })
    .await
    .map_err(|e| std::io::Error::other(e.to_string()))?
}

/// Shallow-clone `repo_url` directly into `root`, streaming every output
/// line as a `setup_log` event. Preconditions `root` empty; a non-zero exit
/// fails with [`WsError::SetupFailed`] carrying the exit code; cancellation
/// stops the clone's whole process tree.
pub async fn populate(
    root: &Path,
    repo_url: &str,
    outbound: &UnboundedSender<ServerMessage>,
    cancel: &CancellationToken,
) -> Result<SetupOutcome, WsError> {
    tokio::fs::create_dir_all(root).await?;
    if !workspace_is_empty(root) {
        return Err(WsError::WorkspaceNotEmpty);
    }

    setup_log(outbound, format!("[setup] git clone {repo_url} ..."));

    let mut child = spawn_grouped(
        "git",
        &[
            "clone",
            "--depth=1",
            "--single-branch",
            "--no-tags",
            "--progress",
            repo_url,
            ".",
        ],
        root,
    )
    .map_err(|e| WsError::SetupFailed(e.to_string()))?;

    // clone progress goes to stderr; forward both streams
    let mut forwarders = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        forwarders.push(tokio::spawn(forward_lines(stdout, outbound.clone())));
    }
    if let Some(stderr) = child.stderr.take() {
        forwarders.push(tokio::spawn(forward_lines(stderr, outbound.clone())));
    }

    let status = tokio::select! {
        _ = cancel.cancelled() => {
            let _ = terminate_tree(&mut child, Duration::from_secs(2)).await;
            for task in forwarders {
                let _ = task.await;
            }
            info!("setup cancelled, clone terminated");
            return Ok(SetupOutcome::Cancelled);
        }
        status = child.wait() => status?,
    };
    for task in forwarders {
        let _ = task.await;
    }

    if !status.success() {
        let code = status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".into());
        return Err(WsError::SetupFailed(format!("git clone exited with {code}")));
    }

    setup_log(outbound, "[setup] clone completed".to_string());
    Ok(SetupOutcome::Completed)
}

async fn forward_lines(
    stream: impl tokio::io::AsyncRead + Unpin,
    outbound: UnboundedSender<ServerMessage>,
) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        setup_log(&outbound, format!("[setup] {line}"));
    }
}

fn setup_log(outbound: &UnboundedSender<ServerMessage>, line: String) {
    let _ = outbound.send(ServerMessage::SetupLog { line });
}

/// One full setup job: registers with the owner slot (cancelling any
/// in-flight job), waits its turn on the per-owner gate, clears and
/// repopulates, and emits the terminal `setup_ok` or `error` event. Safe to
/// cancel at any point; a cancelled job emits nothing and leaves the lock
/// released.
pub async fn run_setup(
    slot: Arc<OwnerSlot>,
    root: PathBuf,
    repo_url: String,
    project_id: Option<String>,
    req_id: Option<String>,
    outbound: UnboundedSender<ServerMessage>,
    cancel: CancellationToken,
) {
    let generation = slot.begin_setup(cancel.clone());

    let _guard = tokio::select! {
        _ = cancel.cancelled() => {
            slot.finish_setup(generation);
            return;
        }
        guard = slot.gate.lock() => guard,
    };
    if cancel.is_cancelled() {
        slot.finish_setup(generation);
        return;
    }

    setup_log(&outbound, "[setup] clearing workspace ...".to_string());
    if let Err(e) = clear_dir(&root).await {
        let err = WsError::SetupFailed(format!("failed to clear workspace: {e}"));
        let _ = outbound.send(ServerMessage::error(req_id, &err));
        slot.finish_setup(generation);
        return;
    }

    match populate(&root, &repo_url, &outbound, &cancel).await {
        Ok(SetupOutcome::Completed) => {
            slot.set_active_project(project_id);
            info!(root = %root.display(), "workspace setup completed");
            let _ = outbound.send(ServerMessage::SetupOk {
                req_id,
                cwd: root.display().to_string(),
            });
        }
        Ok(SetupOutcome::Cancelled) => {}
        Err(e) => {
            warn!(root = %root.display(), "workspace setup failed: {e}");
            let _ = outbound.send(ServerMessage::error(req_id, &e));
        }
    }

    slot.finish_setup(generation);
}
