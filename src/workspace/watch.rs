//! Filesystem watcher: batched change notifications for a session's
//! workspace.
//!
//! Raw `notify` events are funneled into a tokio channel, coalesced over a
//! short window, filtered against the exclude list, and emitted as one
//! `fs_batch` message. When the notification backend is unavailable the
//! watcher degrades to a no-op instead of failing the session.

use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::protocol::{ChangeKind, ServerMessage, WatchEvent};

/// Window during which rapid-fire changes are coalesced into one batch.
const BATCH_WINDOW: Duration = Duration::from_millis(200);

fn change_kind(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Created),
        EventKind::Remove(_) => Some(ChangeKind::Deleted),
        EventKind::Modify(_) => Some(ChangeKind::Modified),
        // access events are noise for an editor client
        EventKind::Access(_) => None,
        EventKind::Any | EventKind::Other => Some(ChangeKind::Modified),
    }
}

/// True when any component of `path` matches an excluded name.
fn is_excluded(path: &Path, excludes: &[String]) -> bool {
    path.components().any(|c| {
        c.as_os_str()
            .to_str()
            .map(|name| excludes.iter().any(|e| e == name))
            .unwrap_or(false)
    })
}

fn to_watch_event(root: &Path, kind: ChangeKind, path: &Path) -> Option<WatchEvent> {
    let rel = path.strip_prefix(root).ok()?;
    if rel.as_os_str().is_empty() {
        return None;
    }
    // best-effort stat at emission time; entries already deleted report no
    // mtime
    let (is_dir, mtime) = match std::fs::symlink_metadata(path) {
        Ok(meta) => (
            meta.is_dir(),
            meta.modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs_f64()),
        ),
        Err(_) => (false, None),
    };
    Some(WatchEvent {
        event: kind,
        path: rel.to_string_lossy().into_owned(),
        is_dir,
        mtime,
    })
}

/// Watch `root` until cancelled, emitting `fs_batch` messages. Never
/// returns an error: backend failures disable the feature with a warning.
pub async fn watch_workspace(
    session_id: String,
    root: PathBuf,
    excludes: Vec<String>,
    outbound: UnboundedSender<ServerMessage>,
    cancel: CancellationToken,
) {
    let (raw_tx, mut raw_rx) = tokio::sync::mpsc::unbounded_channel::<Event>();

    // the callback runs on notify's own thread; an unbounded send never blocks
    let mut watcher = match notify::recommended_watcher(move |res: notify::Result<Event>| {
        if let Ok(event) = res {
            let _ = raw_tx.send(event);
        }
    }) {
        Ok(watcher) => watcher,
        Err(e) => {
            warn!(session = %session_id, "filesystem watcher unavailable: {e}");
            return;
        }
    };
    if let Err(e) = watcher.watch(&root, RecursiveMode::Recursive) {
        warn!(session = %session_id, root = %root.display(), "failed to watch workspace: {e}");
        return;
    }
    debug!(session = %session_id, root = %root.display(), "watching workspace");

    loop {
        // block until the first event of a batch (or cancellation)
        let first = tokio::select! {
            _ = cancel.cancelled() => break,
            event = raw_rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let mut raw_events = vec![first];
        let window = tokio::time::sleep(BATCH_WINDOW);
        tokio::pin!(window);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = &mut window => break,
                event = raw_rx.recv() => match event {
                    Some(event) => raw_events.push(event),
                    None => break,
                },
            }
        }

        let mut events: Vec<WatchEvent> = Vec::new();
        for raw in raw_events {
            let Some(kind) = change_kind(&raw.kind) else {
                continue;
            };
            for path in &raw.paths {
                if is_excluded(path, &excludes) {
                    continue;
                }
                let Some(event) = to_watch_event(&root, kind, path) else {
                    continue;
                };
                // drop duplicate (path, kind) pairs within one batch
                if events
                    .iter()
                    .any(|e| e.path == event.path && e.event == event.event)
                {
                    continue;
                }
                events.push(event);
            }
        }

        if !events.is_empty() {
            let batch = ServerMessage::FsBatch {
                session_id: session_id.clone(),
                events,
            };
            if outbound.send(batch).is_err() {
                break;
            }
        }
    }

    debug!(session = %session_id, "watcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn exclusion_matches_any_component() {
        let excludes = vec!["node_modules".to_string(), ".git".to_string()];
        assert!(is_excluded(
            Path::new("/ws/node_modules/react/index.js"),
            &excludes
        ));
        assert!(is_excluded(Path::new("/ws/.git/HEAD"), &excludes));
        assert!(!is_excluded(Path::new("/ws/src/main.ts"), &excludes));
    }

    #[test]
    fn kinds_map_to_wire_names() {
        use notify::event::{CreateKind, ModifyKind, RemoveKind};
        assert_eq!(
            change_kind(&EventKind::Create(CreateKind::File)),
            Some(ChangeKind::Created)
        );
        assert_eq!(
            change_kind(&EventKind::Remove(RemoveKind::File)),
            Some(ChangeKind::Deleted)
        );
        assert_eq!(
            change_kind(&EventKind::Modify(ModifyKind::Any)),
            Some(ChangeKind::Modified)
        );
        assert_eq!(change_kind(&EventKind::Access(notify::event::AccessKind::Any)), None);
    }

    #[test]
    fn deleted_entries_report_no_mtime() {
        let dir = tempdir().unwrap();
        let gone = dir.path().join("gone.txt");
        let event = to_watch_event(dir.path(), ChangeKind::Deleted, &gone).unwrap();
        assert_eq!(event.path, "gone.txt");
        assert!(event.mtime.is_none());
        assert!(!event.is_dir);
    }

    #[tokio::test]
    async fn emits_batch_for_created_file() {
        let dir = tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let watcher = tokio::spawn(watch_workspace(
            "s1".into(),
            root.clone(),
            vec!["node_modules".into()],
            tx,
            cancel.clone(),
        ));

        // give the backend a moment to arm before producing events
        tokio::time::sleep(Duration::from_millis(300)).await;
        std::fs::write(root.join("fresh.txt"), "hello").unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("watcher produced a batch")
            .expect("channel open");
        match msg {
            ServerMessage::FsBatch { session_id, events } => {
                assert_eq!(session_id, "s1");
                assert!(
                    events.iter().any(|e| e.path == "fresh.txt"),
                    "missing fresh.txt in {events:?}"
                );
            }
            other => panic!("expected fs_batch, got {other:?}"),
        }

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), watcher)
            .await
            .expect("watcher exits on cancel")
            .unwrap();
    }

    #[tokio::test]
    async fn excluded_paths_never_emit() {
        let dir = tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        std::fs::create_dir_all(root.join("node_modules")).unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let watcher = tokio::spawn(watch_workspace(
            "s2".into(),
            root.clone(),
            vec!["node_modules".into()],
            tx,
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(300)).await;
        std::fs::write(root.join("node_modules/dep.js"), "x").unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert!(rx.try_recv().is_err(), "excluded change leaked a batch");

        cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), watcher).await;
    }
}
