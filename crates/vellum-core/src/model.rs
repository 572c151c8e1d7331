//! Workspace, event, and operation-outcome types.
//!
//! Everything here serializes in camelCase, matching the JSON shapes the CLI
//! prints with `--json` and the local store writes to disk.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::patch::PatchOp;

/// Opaque workspace identifier (`ws-` followed by 16 hex chars when
/// generated locally).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceId(String);

impl WorkspaceId {
    /// Derive a fresh id from the owner, name, creation time, and a random
    /// salt.
    #[must_use]
    pub fn generate(owner_id: &str, name: &str, now: DateTime<Utc>) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(owner_id.as_bytes());
        hasher.update(&[0]);
        hasher.update(name.as_bytes());
        hasher.update(&[0]);
        hasher.update(&now.timestamp_micros().to_le_bytes());
        hasher.update(&rand::random::<u64>().to_le_bytes());
        let hex = hasher.finalize().to_hex();
        Self(format!("ws-{}", &hex.as_str()[..16]))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkspaceId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl From<String> for WorkspaceId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

/// Store-assigned identifier of an appended event.
pub type EventId = u64;

/// A versioned JSON workspace.
///
/// Invariants: `version >= 1`; `event_version <= max_event_version`;
/// `current_data` equals `base_data` with the first `event_version` live
/// patch events applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub id: WorkspaceId,
    pub name: String,
    pub owner_id: String,
    pub current_data: Value,
    pub base_data: Value,
    /// Bumped on every successful mutation (update, undo, redo). Optimistic
    /// concurrency token.
    pub version: u64,
    /// Position within the live chain. `0` means `base_data`.
    pub event_version: u64,
    /// Head of the live chain. Positions above `event_version` are redoable.
    pub max_event_version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workspace {
    /// A new workspace at version 1 with an empty history.
    #[must_use]
    pub fn new(
        id: WorkspaceId,
        name: impl Into<String>,
        owner_id: impl Into<String>,
        data: Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            owner_id: owner_id.into(),
            current_data: data.clone(),
            base_data: data,
            version: 1,
            event_version: 0,
            max_event_version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub const fn can_undo(&self) -> bool {
        self.event_version > 0
    }

    #[must_use]
    pub const fn can_redo(&self) -> bool {
        self.event_version < self.max_event_version
    }

    /// Apply the set fields of `fields` in place.
    pub fn apply_fields(&mut self, fields: &WorkspaceFields) {
        if let Some(name) = &fields.name {
            self.name.clone_from(name);
        }
        if let Some(data) = &fields.current_data {
            self.current_data.clone_from(data);
        }
        if let Some(version) = fields.version {
            self.version = version;
        }
        if let Some(ev) = fields.event_version {
            self.event_version = ev;
        }
        if let Some(max) = fields.max_event_version {
            self.max_event_version = max;
        }
        if let Some(at) = fields.updated_at {
            self.updated_at = at;
        }
    }
}

/// Partial update for [`crate::store::WorkspaceStore::put`]. Unset fields are
/// left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkspaceFields {
    pub name: Option<String>,
    pub current_data: Option<Value>,
    pub version: Option<u64>,
    pub event_version: Option<u64>,
    pub max_event_version: Option<u64>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl WorkspaceFields {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.current_data.is_none()
            && self.version.is_none()
            && self.event_version.is_none()
            && self.max_event_version.is_none()
            && self.updated_at.is_none()
    }
}

/// One entry in a workspace's append-only event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub workspace_id: WorkspaceId,
    /// Live-chain position this event was recorded at.
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(flatten)]
    pub body: EventBody,
}

impl Event {
    #[must_use]
    pub const fn is_checkpoint(&self) -> bool {
        matches!(self.body, EventBody::Checkpoint { .. })
    }

    /// Patches carried by a patch event. Empty for checkpoints.
    #[must_use]
    pub fn patches(&self) -> &[PatchOp] {
        match &self.body {
            EventBody::Patch { patches } => patches,
            EventBody::Checkpoint { .. } => &[],
        }
    }

    #[must_use]
    pub fn label(&self) -> Option<&str> {
        match &self.body {
            EventBody::Checkpoint { label } => Some(label),
            EventBody::Patch { .. } => None,
        }
    }
}

/// Event payload. Serialized with a `kind` discriminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EventBody {
    Patch { patches: Vec<PatchOp> },
    Checkpoint { label: String },
}

impl EventBody {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Patch { .. } => "patch",
            Self::Checkpoint { .. } => "checkpoint",
        }
    }
}

/// Result of an update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOutcome {
    pub success: bool,
    /// Set when the submitted data equalled the current data; nothing was
    /// written.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub no_changes: bool,
    pub version: u64,
    pub event_version: u64,
}

/// Result of an undo or redo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

impl StepOutcome {
    /// A step that could not move (`Nothing to undo` / `Nothing to redo`).
    #[must_use]
    pub fn nothing(message: &str) -> Self {
        Self {
            success: false,
            message: Some(message.to_string()),
            data: None,
            previous_version: None,
            current_version: None,
            version: None,
        }
    }

    #[must_use]
    pub const fn moved(data: Value, previous_version: u64, current_version: u64, version: u64) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
            previous_version: Some(previous_version),
            current_version: Some(current_version),
            version: Some(version),
        }
    }
}

/// Result of recording a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointOutcome {
    pub label: String,
    pub event_version: u64,
    pub event_id: EventId,
}
