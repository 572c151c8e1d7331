//! Pushing local changes to the hosted store.
//!
//! [`SyncWorker`] is single-flight: at most one push runs at a time, a
//! document submitted while a push is in flight waits as the pending payload,
//! and a newer submission replaces an older pending one. The worker pushes
//! the pending payload as soon as the in-flight push returns.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};
use vellum_core::config;
use vellum_core::store::SqliteStore;
use vellum_core::{Caller, VellumError, VersionEngine, WorkspaceId};

const SYNC_STATE_FILE: &str = "sync.json";

/// `.vellum/sync.json`: the hosted version the local mirror last agreed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub hosted_version: u64,
}

impl SyncState {
    fn path(project_root: &Path) -> PathBuf {
        config::vellum_dir(project_root).join(SYNC_STATE_FILE)
    }

    /// `Ok(None)` when no sync has happened yet.
    pub fn load(project_root: &Path) -> Result<Option<Self>> {
        let path = Self::path(project_root);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .map(Some)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn save(self, project_root: &Path) -> Result<()> {
        let path = Self::path(project_root);
        let content = serde_json::to_string_pretty(&self)?;
        std::fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))
    }
}

/// Destination for pushed documents.
pub trait Push: Send + 'static {
    fn push(&mut self, data: &Value) -> Result<()>;
}

/// Pushes to the hosted store with the last agreed hosted version as the
/// expected version.
pub struct HostedPusher {
    engine: VersionEngine<SqliteStore>,
    caller: Caller,
    id: WorkspaceId,
    project_root: PathBuf,
    state: SyncState,
}

impl HostedPusher {
    pub const fn new(
        engine: VersionEngine<SqliteStore>,
        caller: Caller,
        id: WorkspaceId,
        project_root: PathBuf,
        state: SyncState,
    ) -> Self {
        Self {
            engine,
            caller,
            id,
            project_root,
            state,
        }
    }
}

impl Push for HostedPusher {
    fn push(&mut self, data: &Value) -> Result<()> {
        let outcome = match self
            .engine
            .update(&self.caller, &self.id, data, self.state.hosted_version)
        {
            Ok(outcome) => outcome,
            Err(err @ VellumError::VersionConflict { .. }) => {
                warn!(
                    workspace_id = %self.id,
                    expected = self.state.hosted_version,
                    "hosted workspace changed elsewhere; run `vl pull`"
                );
                return Err(err.into());
            }
            Err(err) => return Err(err.into()),
        };

        if outcome.no_changes {
            debug!(workspace_id = %self.id, "hosted document already up to date");
            return Ok(());
        }
        self.state.hosted_version = outcome.version;
        self.state.save(&self.project_root)?;
        info!(
            workspace_id = %self.id,
            version = outcome.version,
            "pushed to hosted store"
        );
        Ok(())
    }
}

#[derive(Default)]
struct State {
    pending: Option<Value>,
    in_flight: bool,
    shutdown: bool,
    last_error: Option<anyhow::Error>,
    pushed: usize,
}

struct Shared {
    state: Mutex<State>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, State>) -> MutexGuard<'a, State> {
        self.changed
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Background single-flight pusher.
pub struct SyncWorker {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl SyncWorker {
    pub fn spawn<P: Push>(mut pusher: P) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::default()),
            changed: Condvar::new(),
        });
        let worker = Arc::clone(&shared);
        let handle = thread::spawn(move || {
            loop {
                let data = {
                    let mut state = worker.lock();
                    while state.pending.is_none() && !state.shutdown {
                        state = worker.wait(state);
                    }
                    match state.pending.take() {
                        Some(data) => {
                            state.in_flight = true;
                            data
                        }
                        None => return,
                    }
                };

                let result = pusher.push(&data);

                let mut state = worker.lock();
                state.in_flight = false;
                match result {
                    Ok(()) => state.pushed += 1,
                    Err(err) => {
                        warn!("push failed: {err:#}");
                        state.last_error = Some(err);
                    }
                }
                worker.changed.notify_all();
            }
        });
        Self {
            shared,
            handle: Some(handle),
        }
    }

    /// Queue `data` for pushing, replacing any older pending document.
    pub fn submit(&self, data: Value) {
        let mut state = self.shared.lock();
        if state.pending.replace(data).is_some() {
            debug!("coalesced pending push");
        }
        self.shared.changed.notify_all();
    }

    /// Wait until nothing is pending or in flight. Returns the most recent
    /// push failure since the last flush, if any.
    pub fn flush(&self) -> Option<anyhow::Error> {
        let mut state = self.shared.lock();
        while state.pending.is_some() || state.in_flight {
            state = self.shared.wait(state);
        }
        state.last_error.take()
    }

    /// Take the most recent push failure without waiting.
    pub fn take_error(&self) -> Option<anyhow::Error> {
        self.shared.lock().last_error.take()
    }

    /// Number of successful pushes so far.
    pub fn pushed(&self) -> usize {
        self.shared.lock().pushed
    }

    /// Flush, then stop the worker thread.
    pub fn shutdown(mut self) -> Option<anyhow::Error> {
        let err = self.flush();
        self.stop();
        err
    }

    fn stop(&mut self) {
        self.shared.lock().shutdown = true;
        self.shared.changed.notify_all();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("sync worker panicked");
            }
        }
    }
}

impl Drop for SyncWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
