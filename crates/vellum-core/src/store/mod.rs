//! Storage contract for workspaces and their event logs.
//!
//! The engine only talks to [`WorkspaceStore`]. Three adapters ship:
//!
//! - [`sqlite::SqliteStore`]: the shared (hosted) store, many workspaces, many
//!   owners, safe for concurrent writers across processes.
//! - [`file::FileStore`]: a single workspace in a `.vellum/` directory next to
//!   the user's working file.
//! - [`memory::MemoryStore`]: in-process tables for tests and embedding.

pub mod file;
pub mod memory;
pub mod sqlite;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::path::PathBuf;

use crate::error::{ErrorCode, VellumError};
use crate::lock::LockError;
use crate::model::{Event, EventId, Workspace, WorkspaceFields, WorkspaceId};

/// Failures raised by store adapters.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Lock(#[from] LockError),

    #[error("workspace already exists: {0}")]
    Duplicate(WorkspaceId),

    #[error("workspace missing from store: {0}")]
    Missing(WorkspaceId),

    #[error("corrupt record at {}:{line}: {reason}", path.display())]
    CorruptLine {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("value out of range for storage: {0}")]
    OutOfRange(String),

    #[error("store state poisoned by a panicked writer")]
    Poisoned,
}

impl StoreError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Lock(err) => err.code(),
            Self::CorruptLine { .. } => ErrorCode::CorruptEventLog,
            Self::Missing(_) => ErrorCode::WorkspaceNotFound,
            Self::Poisoned | Self::OutOfRange(_) | Self::Duplicate(_) => {
                ErrorCode::InternalUnexpected
            }
            Self::Io(_) | Self::Sqlite(_) | Self::Json(_) => ErrorCode::StoreWriteFailed,
        }
    }
}

/// Persistence for workspaces and their append-only event logs.
///
/// Methods take `&self`; adapters own their interior synchronization.
/// [`WorkspaceStore::write_txn`] brackets a read-check-write sequence so that
/// it commits as a unit and is serialized against other writers of the same
/// store (across processes for the SQLite and file adapters).
pub trait WorkspaceStore {
    /// Fetch a workspace by id.
    ///
    /// # Errors
    ///
    /// Adapter I/O or decode failures.
    fn get(&self, id: &WorkspaceId) -> Result<Option<Workspace>, StoreError>;

    /// Insert a new workspace.
    ///
    /// # Errors
    ///
    /// [`StoreError::Duplicate`] if the id is taken.
    fn insert_workspace(&self, workspace: &Workspace) -> Result<(), StoreError>;

    /// Update the set fields of an existing workspace.
    ///
    /// # Errors
    ///
    /// [`StoreError::Missing`] if no such workspace exists.
    fn put(&self, id: &WorkspaceId, fields: &WorkspaceFields) -> Result<(), StoreError>;

    /// Append an event to the workspace's log and return its store id.
    ///
    /// # Errors
    ///
    /// Adapter I/O or encode failures.
    fn insert_event(&self, event: &Event) -> Result<EventId, StoreError>;

    /// All events of a workspace in append order, paired with their ids.
    ///
    /// # Errors
    ///
    /// Adapter I/O or decode failures.
    fn query_events(&self, id: &WorkspaceId) -> Result<Vec<(EventId, Event)>, StoreError>;

    /// Workspaces owned by `owner_id`, most recently updated first.
    ///
    /// # Errors
    ///
    /// Adapter I/O or decode failures.
    fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Workspace>, StoreError>;

    /// Run `f` as one atomic, serialized write unit.
    ///
    /// If `f` returns `Err`, everything it wrote is rolled back (SQLite) or
    /// was never made visible (file, memory: the engine performs all checks
    /// before its first write).
    ///
    /// # Errors
    ///
    /// Whatever `f` returns, or a store failure beginning/committing.
    fn write_txn<T, F>(&self, f: F) -> Result<T, VellumError>
    where
        F: FnOnce(&Self) -> Result<T, VellumError>,
        Self: Sized;
}
