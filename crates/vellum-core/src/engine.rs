//! Version engine: create, update, undo, redo, checkpoint, history, replay.
//!
//! Every mutating operation runs inside [`WorkspaceStore::write_txn`] and
//! performs all of its checks (identity, ownership, expected version) before
//! the first write, so a rejected call leaves the store untouched.
//!
//! `version` is the optimistic concurrency token and moves on every accepted
//! update, undo, and redo. `event_version` is the position in the live chain
//! that `current_data` reflects. Updates append a patch event at
//! `event_version + 1` and make it the new head; undo and redo only move
//! `event_version` and rebuild `current_data` from `base_data`.

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::VellumError;
use crate::gate::{self, Caller};
use crate::model::{
    CheckpointOutcome, Event, EventBody, EventId, StepOutcome, UpdateOutcome, Workspace,
    WorkspaceFields, WorkspaceId,
};
use crate::patch;
use crate::replay;
use crate::store::WorkspaceStore;

const NOTHING_TO_UNDO: &str = "Nothing to undo";
const NOTHING_TO_REDO: &str = "Nothing to redo";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Undo,
    Redo,
}

/// The version engine over a store backing.
#[derive(Debug, Clone)]
pub struct VersionEngine<S> {
    store: S,
}

impl<S: WorkspaceStore> VersionEngine<S> {
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    pub const fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Create a workspace owned by the caller, with a generated id.
    ///
    /// # Errors
    ///
    /// [`VellumError::Unauthenticated`] without identity,
    /// [`VellumError::InvalidInput`] for a blank name, or a store failure.
    pub fn create(&self, caller: &Caller, name: &str, data: Value) -> Result<Workspace, VellumError> {
        let owner = gate::require_identity(caller)?;
        let id = WorkspaceId::generate(owner, name, Utc::now());
        self.create_with_id(caller, id, name, data)
    }

    /// Create a workspace under a known id. Used to mirror a hosted
    /// workspace into a local store.
    ///
    /// # Errors
    ///
    /// As [`VersionEngine::create`], plus a store `Duplicate` failure if the
    /// id is taken.
    pub fn create_with_id(
        &self,
        caller: &Caller,
        id: WorkspaceId,
        name: &str,
        data: Value,
    ) -> Result<Workspace, VellumError> {
        let owner = gate::require_identity(caller)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(VellumError::InvalidInput(
                "workspace name must not be empty".into(),
            ));
        }
        if id.as_str().trim().is_empty() {
            return Err(VellumError::InvalidInput(
                "workspace id must not be empty".into(),
            ));
        }

        let workspace = Workspace::new(id, name, owner, data, Utc::now());
        self.store.write_txn(|store| {
            store.insert_workspace(&workspace)?;
            Ok(())
        })?;
        info!(workspace_id = %workspace.id, owner_id = owner, "created workspace");
        Ok(workspace)
    }

    /// Fetch a workspace the caller owns. Gate failures read as `None`.
    ///
    /// # Errors
    ///
    /// Store failures only.
    pub fn get(&self, caller: &Caller, id: &WorkspaceId) -> Result<Option<Workspace>, VellumError> {
        match gate::authorize(&self.store, caller, id) {
            Ok((_, workspace)) => Ok(Some(workspace)),
            Err(err) if err.is_access_failure() => {
                debug!(workspace_id = %id, "get hidden by gate: {err}");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Workspaces owned by the caller. Empty for anonymous callers.
    ///
    /// # Errors
    ///
    /// Store failures only.
    pub fn list(&self, caller: &Caller) -> Result<Vec<Workspace>, VellumError> {
        match caller.user_id() {
            Some(owner) => Ok(self.store.list_by_owner(owner)?),
            None => Ok(Vec::new()),
        }
    }

    /// Replace the workspace data, recording the change as a patch event.
    ///
    /// Submitting data equal to the current data is a no-op that reports
    /// `no_changes` and leaves `version` where it was.
    ///
    /// # Errors
    ///
    /// Gate failures, [`VellumError::VersionConflict`] when
    /// `expected_version` is stale, or a store failure.
    pub fn update(
        &self,
        caller: &Caller,
        id: &WorkspaceId,
        data: &Value,
        expected_version: u64,
    ) -> Result<UpdateOutcome, VellumError> {
        self.store.write_txn(|store| {
            let (user_id, ws) = gate::authorize(store, caller, id)?;
            if let Err(err) = gate::check_version(&ws, expected_version) {
                warn!(
                    workspace_id = %id,
                    expected = expected_version,
                    actual = ws.version,
                    "update rejected: version conflict"
                );
                return Err(err);
            }

            let patches = patch::diff(&ws.current_data, data);
            if patches.is_empty() {
                debug!(workspace_id = %id, version = ws.version, "update is a no-op");
                return Ok(UpdateOutcome {
                    success: true,
                    no_changes: true,
                    version: ws.version,
                    event_version: ws.event_version,
                });
            }

            let now = Utc::now();
            let position = ws.event_version + 1;
            let version = ws.version + 1;
            let op_count = patches.len();
            store.insert_event(&Event {
                workspace_id: id.clone(),
                version: position,
                timestamp: now,
                user_id: Some(user_id.to_string()),
                body: EventBody::Patch { patches },
            })?;
            store.put(
                id,
                &WorkspaceFields {
                    current_data: Some(data.clone()),
                    version: Some(version),
                    event_version: Some(position),
                    max_event_version: Some(position),
                    updated_at: Some(now),
                    ..WorkspaceFields::default()
                },
            )?;

            if ws.can_redo() {
                info!(
                    workspace_id = %id,
                    discarded = ws.max_event_version - ws.event_version,
                    "update after undo discarded redo positions"
                );
            }
            info!(
                workspace_id = %id,
                version,
                event_version = position,
                ops = op_count,
                "recorded update"
            );
            Ok(UpdateOutcome {
                success: true,
                no_changes: false,
                version,
                event_version: position,
            })
        })
    }

    /// Step back one position.
    ///
    /// # Errors
    ///
    /// Gate failures, replay failures, or a store failure.
    pub fn undo(&self, caller: &Caller, id: &WorkspaceId) -> Result<StepOutcome, VellumError> {
        self.step(caller, id, Direction::Undo)
    }

    /// Step forward one position.
    ///
    /// # Errors
    ///
    /// Gate failures, replay failures, or a store failure.
    pub fn redo(&self, caller: &Caller, id: &WorkspaceId) -> Result<StepOutcome, VellumError> {
        self.step(caller, id, Direction::Redo)
    }

    fn step(
        &self,
        caller: &Caller,
        id: &WorkspaceId,
        direction: Direction,
    ) -> Result<StepOutcome, VellumError> {
        self.store.write_txn(|store| {
            let (_, ws) = gate::authorize(store, caller, id)?;
            let target = match direction {
                Direction::Undo if ws.can_undo() => ws.event_version - 1,
                Direction::Redo if ws.can_redo() => ws.event_version + 1,
                Direction::Undo => {
                    debug!(workspace_id = %id, "nothing to undo");
                    return Ok(StepOutcome::nothing(NOTHING_TO_UNDO));
                }
                Direction::Redo => {
                    debug!(workspace_id = %id, "nothing to redo");
                    return Ok(StepOutcome::nothing(NOTHING_TO_REDO));
                }
            };

            let data = rebuild_from_store(store, &ws, target)?;
            let version = ws.version + 1;
            store.put(
                id,
                &WorkspaceFields {
                    current_data: Some(data.clone()),
                    version: Some(version),
                    event_version: Some(target),
                    updated_at: Some(Utc::now()),
                    ..WorkspaceFields::default()
                },
            )?;

            info!(
                workspace_id = %id,
                version,
                from = ws.event_version,
                to = target,
                "{}",
                match direction {
                    Direction::Undo => "undo",
                    Direction::Redo => "redo",
                }
            );
            Ok(StepOutcome::moved(data, ws.event_version, target, version))
        })
    }

    /// Bookmark the current position. Nothing but the log changes.
    ///
    /// # Errors
    ///
    /// Gate failures, [`VellumError::InvalidInput`] for a blank label, or a
    /// store failure.
    pub fn checkpoint(
        &self,
        caller: &Caller,
        id: &WorkspaceId,
        label: &str,
    ) -> Result<CheckpointOutcome, VellumError> {
        let label = label.trim();
        self.store.write_txn(|store| {
            let (user_id, ws) = gate::authorize(store, caller, id)?;
            if label.is_empty() {
                return Err(VellumError::InvalidInput(
                    "checkpoint label must not be empty".into(),
                ));
            }
            let event_id = store.insert_event(&Event {
                workspace_id: id.clone(),
                version: ws.event_version,
                timestamp: Utc::now(),
                user_id: Some(user_id.to_string()),
                body: EventBody::Checkpoint {
                    label: label.to_string(),
                },
            })?;
            info!(
                workspace_id = %id,
                event_version = ws.event_version,
                label,
                "recorded checkpoint"
            );
            Ok(CheckpointOutcome {
                label: label.to_string(),
                event_version: ws.event_version,
                event_id,
            })
        })
    }

    /// The full event log in append order.
    ///
    /// # Errors
    ///
    /// Gate failures or a store failure.
    pub fn history(
        &self,
        caller: &Caller,
        id: &WorkspaceId,
    ) -> Result<Vec<(EventId, Event)>, VellumError> {
        gate::authorize(&self.store, caller, id)?;
        Ok(self.store.query_events(id)?)
    }

    /// Materialize the document at any reachable position.
    ///
    /// # Errors
    ///
    /// Gate failures, [`VellumError::InvalidPosition`] above
    /// `max_event_version`, replay failures, or a store failure.
    pub fn state_at(
        &self,
        caller: &Caller,
        id: &WorkspaceId,
        event_version: u64,
    ) -> Result<Value, VellumError> {
        let (_, ws) = gate::authorize(&self.store, caller, id)?;
        if event_version > ws.max_event_version {
            return Err(VellumError::InvalidPosition {
                requested: event_version,
                max: ws.max_event_version,
            });
        }
        rebuild_from_store(&self.store, &ws, event_version)
    }

    /// Rebuild `workspace` at `target` from its base data and event log.
    ///
    /// # Errors
    ///
    /// Replay failures or a store failure.
    pub fn rebuild_state(&self, workspace: &Workspace, target: u64) -> Result<Value, VellumError> {
        rebuild_from_store(&self.store, workspace, target)
    }

    /// Check that replaying the log reproduces the stored current data.
    ///
    /// # Errors
    ///
    /// Gate failures, replay failures, or [`VellumError::CorruptLog`] when
    /// the replayed document differs from `current_data`.
    pub fn verify(&self, caller: &Caller, id: &WorkspaceId) -> Result<(), VellumError> {
        let (_, ws) = gate::authorize(&self.store, caller, id)?;
        let rebuilt = rebuild_from_store(&self.store, &ws, ws.event_version)?;
        if rebuilt == ws.current_data {
            Ok(())
        } else {
            warn!(workspace_id = %id, event_version = ws.event_version, "replay mismatch");
            Err(VellumError::CorruptLog {
                id: id.clone(),
                reason: format!(
                    "replay to position {} does not reproduce the current data",
                    ws.event_version
                ),
            })
        }
    }
}

fn rebuild_from_store<S: WorkspaceStore>(
    store: &S,
    workspace: &Workspace,
    target: u64,
) -> Result<Value, VellumError> {
    let events = store.query_events(&workspace.id)?;
    let chain = replay::live_chain(&workspace.id, &events)?;
    replay::rebuild(&workspace.id, &workspace.base_data, &chain, target)
}
