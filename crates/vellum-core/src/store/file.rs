//! Local single-workspace store kept in a `.vellum/` directory.
//!
//! Layout:
//!
//! ```text
//! .vellum/
//!   head.json      # id, name, owner, version counters, timestamps
//!   base.json      # data at event position 0 (write-once)
//!   snapshot.json  # data at the current event position
//!   events.jsonl   # append-only event log, one JSON record per line
//!   store.lock     # advisory lock serializing access across processes
//! ```
//!
//! Each append uses `O_APPEND` + `write_all` + `sync_data`. A crash mid-append
//! leaves a partial trailing line; readers ignore it, and [`FileStore::open`]
//! and every write unit truncate it away before anything else is appended. JSON files are replaced by writing a sibling temp file
//! and renaming it over the original.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::{StoreError, WorkspaceStore};
use crate::error::VellumError;
use crate::lock::{DEFAULT_LOCK_TIMEOUT, StoreLock};
use crate::model::{Event, EventId, Workspace, WorkspaceFields, WorkspaceId};

const HEAD_FILE: &str = "head.json";
const BASE_FILE: &str = "base.json";
const SNAPSHOT_FILE: &str = "snapshot.json";
const EVENTS_FILE: &str = "events.jsonl";
const LOCK_FILE: &str = "store.lock";

/// On-disk workspace header.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HeadRecord {
    id: WorkspaceId,
    name: String,
    owner_id: String,
    version: u64,
    event_version: u64,
    max_event_version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl HeadRecord {
    fn from_workspace(ws: &Workspace) -> Self {
        Self {
            id: ws.id.clone(),
            name: ws.name.clone(),
            owner_id: ws.owner_id.clone(),
            version: ws.version,
            event_version: ws.event_version,
            max_event_version: ws.max_event_version,
            created_at: ws.created_at,
            updated_at: ws.updated_at,
        }
    }

    fn into_workspace(self, current_data: Value, base_data: Value) -> Workspace {
        Workspace {
            id: self.id,
            name: self.name,
            owner_id: self.owner_id,
            current_data,
            base_data,
            version: self.version,
            event_version: self.event_version,
            max_event_version: self.max_event_version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventLine {
    event_id: EventId,
    event: Event,
}

/// Files saved at the start of a write unit so a failed unit can be undone.
struct Restore {
    events_len: u64,
    head: Option<Vec<u8>>,
    snapshot: Option<Vec<u8>>,
}

/// Marks the calling thread as the write-unit holder until dropped.
struct TxnOwner<'a>(&'a Mutex<Option<ThreadId>>);

impl<'a> TxnOwner<'a> {
    fn claim(slot: &'a Mutex<Option<ThreadId>>) -> Self {
        *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(thread::current().id());
        Self(slot)
    }
}

impl Drop for TxnOwner<'_> {
    fn drop(&mut self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Store for the single workspace mirrored into a local directory.
///
/// Reads and write units both take the store lock, so a reader never sees a
/// header that disagrees with the snapshot. Only reads issued by the thread
/// running [`WorkspaceStore::write_txn`], on the same handle, reuse the unit's
/// lock; clones and other threads wait for it.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    lock_timeout: Duration,
    txn_owner: Mutex<Option<ThreadId>>,
}

impl Clone for FileStore {
    fn clone(&self) -> Self {
        Self::new(self.dir.clone()).with_lock_timeout(self.lock_timeout)
    }
}

impl FileStore {
    /// A store rooted at `dir` (usually `<project>/.vellum`). No I/O happens
    /// until the first call.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            txn_owner: Mutex::new(None),
        }
    }

    /// Open the store at `dir`, repairing a torn trailing event line if a
    /// previous writer crashed mid-append.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Lock`] if the store lock cannot be taken, or
    /// [`StoreError::Io`] if the repair fails.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self::new(dir);
        if store.events_path().exists() {
            let _lock = StoreLock::acquire(&store.lock_path(), store.lock_timeout)?;
            store.repair_torn_tail()?;
        }
        Ok(store)
    }

    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn head_path(&self) -> PathBuf {
        self.dir.join(HEAD_FILE)
    }

    #[must_use]
    pub fn base_path(&self) -> PathBuf {
        self.dir.join(BASE_FILE)
    }

    #[must_use]
    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }

    #[must_use]
    pub fn events_path(&self) -> PathBuf {
        self.dir.join(EVENTS_FILE)
    }

    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    /// True once a workspace has been written here.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.head_path().exists()
    }

    /// Truncate a partial trailing line from the event log.
    ///
    /// Returns `Ok(Some(bytes_truncated))` if a repair was needed. The caller
    /// must hold the store lock.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the log cannot be read or truncated.
    pub fn recover_torn_writes(&self) -> Result<Option<u64>, StoreError> {
        let path = self.events_path();
        let Some(file_len) = file_len(&path)? else {
            return Ok(None);
        };
        if file_len == 0 {
            return Ok(None);
        }

        let content = fs::read(&path)?;
        let keep = content
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |pos| pos as u64 + 1);
        if keep == file_len {
            return Ok(None);
        }
        truncate(&path, keep)?;
        Ok(Some(file_len - keep))
    }

    /// [`Self::recover_torn_writes`], logging any repair. Caller holds the lock.
    fn repair_torn_tail(&self) -> Result<(), StoreError> {
        if let Some(bytes) = self.recover_torn_writes()? {
            warn!(
                path = %self.events_path().display(),
                bytes, "truncated torn trailing event line"
            );
        }
        Ok(())
    }

    fn holds_txn(&self) -> bool {
        *self.txn_owner.lock().unwrap_or_else(PoisonError::into_inner)
            == Some(thread::current().id())
    }

    /// Lock for a read, unless this thread's write unit already holds it.
    fn read_lock(&self) -> Result<Option<StoreLock>, StoreError> {
        if self.holds_txn() || !self.dir.exists() {
            return Ok(None);
        }
        Ok(Some(StoreLock::acquire(&self.lock_path(), self.lock_timeout)?))
    }

    fn read_head(&self) -> Result<Option<HeadRecord>, StoreError> {
        read_json(&self.head_path())
    }

    fn write_head(&self, head: &HeadRecord) -> Result<(), StoreError> {
        write_atomic(&self.head_path(), &serde_json::to_vec_pretty(head)?)
    }

    fn load(&self, id: &WorkspaceId) -> Result<Option<Workspace>, StoreError> {
        let Some(head) = self.read_head()? else {
            return Ok(None);
        };
        if &head.id != id {
            return Ok(None);
        }
        let current: Value = read_json(&self.snapshot_path())?
            .ok_or_else(|| StoreError::Missing(id.clone()))?;
        let base: Value =
            read_json(&self.base_path())?.ok_or_else(|| StoreError::Missing(id.clone()))?;
        Ok(Some(head.into_workspace(current, base)))
    }

    fn read_events(&self) -> Result<Vec<EventLine>, StoreError> {
        let path = self.events_path();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let complete = content.rfind('\n').map_or("", |pos| &content[..=pos]);
        complete
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| {
                serde_json::from_str(line).map_err(|err| StoreError::CorruptLine {
                    path: path.clone(),
                    line: idx + 1,
                    reason: err.to_string(),
                })
            })
            .collect()
    }

    fn save_for_restore(&self) -> Result<Restore, StoreError> {
        Ok(Restore {
            events_len: file_len(&self.events_path())?.unwrap_or(0),
            head: read_bytes(&self.head_path())?,
            snapshot: read_bytes(&self.snapshot_path())?,
        })
    }

    fn restore(&self, saved: Restore) -> Result<(), StoreError> {
        if self.events_path().exists() {
            truncate(&self.events_path(), saved.events_len)?;
        }
        match saved.head {
            Some(bytes) => write_atomic(&self.head_path(), &bytes)?,
            None => {
                remove_if_exists(&self.head_path())?;
                remove_if_exists(&self.base_path())?;
            }
        }
        match saved.snapshot {
            Some(bytes) => write_atomic(&self.snapshot_path(), &bytes)?,
            None => remove_if_exists(&self.snapshot_path())?,
        }
        Ok(())
    }
}

impl WorkspaceStore for FileStore {
    fn get(&self, id: &WorkspaceId) -> Result<Option<Workspace>, StoreError> {
        let _lock = self.read_lock()?;
        self.load(id)
    }

    fn insert_workspace(&self, workspace: &Workspace) -> Result<(), StoreError> {
        if let Some(existing) = self.read_head()? {
            return Err(StoreError::Duplicate(existing.id));
        }
        fs::create_dir_all(&self.dir)?;
        write_atomic(&self.base_path(), &serde_json::to_vec_pretty(&workspace.base_data)?)?;
        write_atomic(
            &self.snapshot_path(),
            &serde_json::to_vec_pretty(&workspace.current_data)?,
        )?;
        self.write_head(&HeadRecord::from_workspace(workspace))
    }

    fn put(&self, id: &WorkspaceId, fields: &WorkspaceFields) -> Result<(), StoreError> {
        let mut head = self
            .read_head()?
            .filter(|head| &head.id == id)
            .ok_or_else(|| StoreError::Missing(id.clone()))?;
        if let Some(data) = &fields.current_data {
            write_atomic(&self.snapshot_path(), &serde_json::to_vec_pretty(data)?)?;
        }
        if let Some(name) = &fields.name {
            head.name.clone_from(name);
        }
        if let Some(version) = fields.version {
            head.version = version;
        }
        if let Some(ev) = fields.event_version {
            head.event_version = ev;
        }
        if let Some(max) = fields.max_event_version {
            head.max_event_version = max;
        }
        if let Some(at) = fields.updated_at {
            head.updated_at = at;
        }
        self.write_head(&head)
    }

    fn insert_event(&self, event: &Event) -> Result<EventId, StoreError> {
        let owner = self.read_head()?.map(|head| head.id);
        if owner.as_ref() != Some(&event.workspace_id) {
            return Err(StoreError::Missing(event.workspace_id.clone()));
        }

        let event_id = self
            .read_events()?
            .last()
            .map_or(1, |line| line.event_id + 1);
        let mut line = serde_json::to_string(&EventLine {
            event_id,
            event: event.clone(),
        })?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.events_path())?;
        file.write_all(line.as_bytes())?;
        file.sync_data()?;
        Ok(event_id)
    }

    fn query_events(&self, id: &WorkspaceId) -> Result<Vec<(EventId, Event)>, StoreError> {
        let _lock = self.read_lock()?;
        Ok(self
            .read_events()?
            .into_iter()
            .filter(|line| &line.event.workspace_id == id)
            .map(|line| (line.event_id, line.event))
            .collect())
    }

    fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Workspace>, StoreError> {
        let _lock = self.read_lock()?;
        let Some(head) = self.read_head()? else {
            return Ok(Vec::new());
        };
        if head.owner_id != owner_id {
            return Ok(Vec::new());
        }
        Ok(self.load(&head.id)?.into_iter().collect())
    }

    fn write_txn<T, F>(&self, f: F) -> Result<T, VellumError>
    where
        F: FnOnce(&Self) -> Result<T, VellumError>,
    {
        fs::create_dir_all(&self.dir).map_err(StoreError::from)?;
        let _lock = StoreLock::acquire(&self.lock_path(), self.lock_timeout)
            .map_err(StoreError::from)?;
        let _owner = TxnOwner::claim(&self.txn_owner);
        self.repair_torn_tail()?;
        let saved = self.save_for_restore()?;

        let result = f(self);
        if result.is_err() {
            if let Err(err) = self.restore(saved) {
                warn!("failed to restore local store after aborted write: {err}");
            }
        }
        result
    }
}

fn file_len(path: &Path) -> Result<Option<u64>, StoreError> {
    match fs::metadata(path) {
        Ok(meta) => Ok(Some(meta.len())),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn read_bytes(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    read_bytes(path)?
        .map(|bytes| serde_json::from_slice(&bytes))
        .transpose()
        .map_err(StoreError::from)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_data()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn truncate(path: &Path, len: u64) -> Result<(), StoreError> {
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(len)?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}
