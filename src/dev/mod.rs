//! Dev-process supervisor.
//!
//! One external long-running process per session: spawned in its own process
//! group so the whole tree can be terminated, its merged output pumped back
//! to the client as `dev_log` lines, and the externally reachable URL
//! discovered from those lines rather than guessed from the injected port
//! (dev servers silently fall back to another port when the requested one is
//! taken).

pub mod logs;
pub mod process;

use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::Config;
use crate::errors::WsError;
use crate::session::Session;

pub use process::DevProcess;

/// Minimum interval between two spawn attempts on one session. Repeated
/// `start_dev` clicks inside the window report current state instead of
/// racing a second process into existence.
pub const START_DEBOUNCE: Duration = Duration::from_millis(1500);

/// Result of a `start_dev` request, mirrored into `start_dev_ok`.
#[derive(Debug)]
pub struct StartOutcome {
    pub ok: bool,
    pub message: String,
    pub dev_port: Option<u16>,
    pub dev_url: Option<String>,
    /// Output streams of a freshly spawned child, handed to the log pump.
    pub spawned: Option<process::ChildOutput>,
}

impl StartOutcome {
    fn running(message: &str, session: &Session) -> Self {
        Self {
            ok: true,
            message: message.to_string(),
            dev_port: session.endpoint.port(),
            dev_url: session.endpoint.url(),
            spawned: None,
        }
    }
}

/// Start (or report) the session's dev process.
///
/// Contract: fails without side effects when the workspace directory is
/// missing; returns the existing process info when one is already live;
/// debounces rapid repeats. A fresh spawn allocates a free port first so the
/// child environment carries `PORT`, but the reachable URL is left unset
/// until the log pump discovers it.
pub async fn start_dev(config: &Config, session: &mut Session) -> Result<StartOutcome, WsError> {
    let now = Instant::now();
    if let Some(last) = session.last_dev_start {
        if now.duration_since(last) < START_DEBOUNCE {
            return Ok(StartOutcome::running("dev starting/running", session));
        }
    }
    session.last_dev_start = Some(now);

    if !session.cwd.exists() {
        return Ok(StartOutcome {
            ok: false,
            message: format!("cwd not found: {}", session.cwd.display()),
            dev_port: None,
            dev_url: None,
            spawned: None,
        });
    }

    if let Some(proc) = session.dev_proc.as_mut() {
        if proc.is_running() {
            return Ok(StartOutcome::running("dev already running", session));
        }
        session.dev_proc = None;
    }

    // Reuse the previously assigned port when it is still free, otherwise
    // pick a new one.
    let port = session
        .endpoint
        .port()
        .filter(|p| process::port_is_free(*p))
        .or_else(|| process::alloc_port(config.dev_port_range))
        .ok_or_else(|| WsError::ProcessStartFailed("no free port available".into()))?;

    session.endpoint.set_port(port);
    session.endpoint.reset_url();

    let (proc, output) = process::spawn_dev(&config.dev_cmd, &session.cwd, port)
        .map_err(|e| WsError::ProcessStartFailed(e.to_string()))?;
    info!(session = %session.id, pid = ?proc.pid, port, "dev process spawned");
    session.dev_proc = Some(proc);

    Ok(StartOutcome {
        ok: true,
        message: format!("starting (requested port {port})"),
        dev_port: Some(port),
        dev_url: None,
        spawned: Some(output),
    })
}

/// Stop the session's dev process, if any. Best-effort: termination failures
/// are logged but never block the caller.
pub async fn stop_dev(session: &mut Session) {
    if let Some(mut proc) = session.dev_proc.take() {
        if let Err(e) = proc.shutdown().await {
            warn!(session = %session.id, "dev process shutdown: {e:#}");
        }
        session.endpoint.reset_url();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionRegistry;
    use tempfile::tempdir;

    fn test_setup() -> (Config, Session, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = Config::with_root(dir.path().to_path_buf()).unwrap();
        let registry = SessionRegistry::default();
        let mut session = registry.create_at(&config.workspace_root);
        session.owner = Some("a@b.c".into());
        (config, session, dir)
    }

    #[tokio::test]
    async fn missing_cwd_fails_without_spawn() {
        let (config, mut session, _dir) = test_setup();
        session.cwd = config.workspace_root.join("does-not-exist");
        let outcome = start_dev(&config, &mut session).await.unwrap();
        assert!(!outcome.ok);
        assert!(outcome.message.contains("cwd not found"));
        assert!(session.dev_proc.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn second_start_reports_already_running() {
        let (mut config, mut session, _dir) = test_setup();
        config.dev_cmd = "sleep 5".into();

        let first = start_dev(&config, &mut session).await.unwrap();
        assert!(first.ok);
        assert!(first.spawned.is_some());
        let port = first.dev_port.unwrap();

        // outside the debounce window but still running
        session.last_dev_start = Some(Instant::now() - Duration::from_secs(5));
        let second = start_dev(&config, &mut session).await.unwrap();
        assert!(second.ok);
        assert!(second.spawned.is_none(), "no duplicate spawn");
        assert_eq!(second.dev_port, Some(port));
        assert_eq!(second.message, "dev already running");

        stop_dev(&mut session).await;
        assert!(session.dev_proc.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn debounce_window_suppresses_respawn() {
        let (mut config, mut session, _dir) = test_setup();
        config.dev_cmd = "sleep 5".into();

        let first = start_dev(&config, &mut session).await.unwrap();
        assert!(first.spawned.is_some());
        let second = start_dev(&config, &mut session).await.unwrap();
        assert!(second.spawned.is_none());
        assert_eq!(second.message, "dev starting/running");

        stop_dev(&mut session).await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_then_start_reuses_or_replaces_port_cleanly() {
        let (mut config, mut session, _dir) = test_setup();
        config.dev_cmd = "sleep 5".into();

        let first = start_dev(&config, &mut session).await.unwrap();
        let port = first.dev_port.unwrap();
        stop_dev(&mut session).await;

        session.last_dev_start = None;
        let second = start_dev(&config, &mut session).await.unwrap();
        assert!(second.ok);
        assert!(second.spawned.is_some());
        // the old tree is dead, so the same port is free to hand out again
        assert_eq!(second.dev_port, Some(port));

        stop_dev(&mut session).await;
    }
}
