//! Session registry and per-connection state.
//!
//! A [`Session`] is owned by exactly one dispatcher loop and mutated only
//! there. Background producers never touch it directly; they communicate
//! through the session's outbound channel. The two exceptions live in
//! [`DevEndpoint`], which is shared with the log pump (one-time URL
//! discovery) and the preview proxy (endpoint lookup by session id).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::dev::DevProcess;

/// Lock a std mutex, shrugging off poisoning (holders never panic while
/// mutating, and the data is plain state either way).
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── Dev endpoint ─────────────────────────────────────────────────────

/// The session's dev-server coordinates: the port handed to the child and
/// the URL later discovered from its logs. Shared with the log pump and the
/// preview proxy.
#[derive(Debug, Default)]
pub struct DevEndpoint {
    port: Mutex<Option<u16>>,
    url: Mutex<Option<String>>,
}

impl DevEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn port(&self) -> Option<u16> {
        *lock(&self.port)
    }

    pub fn set_port(&self, port: u16) {
        *lock(&self.port) = Some(port);
    }

    pub fn url(&self) -> Option<String> {
        lock(&self.url).clone()
    }

    /// Set the discovered URL if none is set yet. Returns whether this call
    /// won the (benign) race.
    pub fn set_url_once(&self, url: &str) -> bool {
        let mut guard = lock(&self.url);
        if guard.is_some() {
            return false;
        }
        *guard = Some(url.to_string());
        true
    }

    pub fn reset_url(&self) {
        *lock(&self.url) = None;
    }
}

// ── Background task slots ────────────────────────────────────────────

/// A cancellable background task owned by a session (log pump, watcher,
/// setup job).
#[derive(Debug)]
pub struct TaskSlot {
    pub token: CancellationToken,
    pub handle: JoinHandle<()>,
}

impl TaskSlot {
    pub fn new(token: CancellationToken, handle: JoinHandle<()>) -> Self {
        Self { token, handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel the task and wait for it to unwind.
    pub async fn cancel_and_wait(self) {
        self.token.cancel();
        let _ = self.handle.await;
    }
}

// ── Session ──────────────────────────────────────────────────────────

/// Server-side state for one client connection.
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// Owner identity; `None` until `init` binds the session.
    pub owner: Option<String>,
    /// Workspace directory all file operations resolve against. Starts at
    /// the workspace root sentinel, switched to the owner folder on `init`.
    pub cwd: PathBuf,
    pub dev_proc: Option<DevProcess>,
    pub last_dev_start: Option<Instant>,
    pub endpoint: Arc<DevEndpoint>,
    pub log_pump: Option<TaskSlot>,
    pub watcher: Option<TaskSlot>,
    pub setup: Option<TaskSlot>,
}

impl Session {
    /// Tear down every background activity, strictly ordered: the setup job
    /// first (it may still be mutating the workspace), then the dev process,
    /// then the passive observers. No task or subprocess survives this call.
    pub async fn teardown(&mut self) {
        if let Some(slot) = self.setup.take() {
            slot.cancel_and_wait().await;
        }
        crate::dev::stop_dev(self).await;
        if let Some(slot) = self.watcher.take() {
            slot.cancel_and_wait().await;
        }
        if let Some(slot) = self.log_pump.take() {
            slot.cancel_and_wait().await;
        }
    }
}

// ── Per-owner state ──────────────────────────────────────────────────

/// Mutual exclusion and memory shared by every session of one owner.
#[derive(Debug, Default)]
pub struct OwnerSlot {
    /// Serializes clear+populate so two connections cannot race the same
    /// directory.
    pub gate: tokio::sync::Mutex<()>,
    /// Generation and token of the in-flight setup, replaced (and cancelled)
    /// by newer requests.
    inflight: Mutex<Option<(u64, CancellationToken)>>,
    next_generation: std::sync::atomic::AtomicU64,
    active_project: Mutex<Option<String>>,
}

impl OwnerSlot {
    /// Register `token` as the owner's current setup, cancelling any
    /// previous in-flight one. Returns the registration's generation, used
    /// to deregister without clobbering a newer job.
    pub fn begin_setup(&self, token: CancellationToken) -> u64 {
        let generation = self
            .next_generation
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        if let Some((_, previous)) = lock(&self.inflight).replace((generation, token)) {
            previous.cancel();
        }
        generation
    }

    /// Drop the in-flight registration if `generation` is still current.
    pub fn finish_setup(&self, generation: u64) {
        let mut guard = lock(&self.inflight);
        if guard.as_ref().is_some_and(|(g, _)| *g == generation) {
            *guard = None;
        }
    }

    pub fn active_project(&self) -> Option<String> {
        lock(&self.active_project).clone()
    }

    pub fn set_active_project(&self, project: Option<String>) {
        *lock(&self.active_project) = project;
    }
}

// ── Registry ─────────────────────────────────────────────────────────

/// Owns every session's shared endpoint plus all per-owner state. Create and
/// remove go through a single mutex.
#[derive(Default)]
pub struct SessionRegistry {
    endpoints: Mutex<HashMap<String, Arc<DevEndpoint>>>,
    owners: Mutex<HashMap<String, Arc<OwnerSlot>>>,
}

impl SessionRegistry {
    /// Create a fresh session with its endpoint registered for proxy lookup.
    /// `cwd` starts at the workspace root sentinel until `init` binds an
    /// owner folder.
    pub fn create_at(&self, root: &std::path::Path) -> Session {
        let id = Uuid::new_v4().simple().to_string()[..12].to_string();
        let endpoint = Arc::new(DevEndpoint::new());
        lock(&self.endpoints).insert(id.clone(), endpoint.clone());
        Session {
            id,
            created_at: Utc::now(),
            owner: None,
            cwd: root.to_path_buf(),
            dev_proc: None,
            last_dev_start: None,
            endpoint,
            log_pump: None,
            watcher: None,
            setup: None,
        }
    }

    /// Resolve a session's dev endpoint (preview proxy lookup).
    pub fn endpoint(&self, session_id: &str) -> Option<Arc<DevEndpoint>> {
        lock(&self.endpoints).get(session_id).cloned()
    }

    pub fn remove(&self, session_id: &str) {
        lock(&self.endpoints).remove(session_id);
    }

    pub fn session_count(&self) -> usize {
        lock(&self.endpoints).len()
    }

    /// Get or create the owner's shared slot.
    pub fn owner_slot(&self, owner: &str) -> Arc<OwnerSlot> {
        lock(&self.owners)
            .entry(owner.to_string())
            .or_default()
            .clone()
    }
}
