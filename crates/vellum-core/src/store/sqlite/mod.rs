//! SQLite-backed shared workspace store.
//!
//! Connection defaults:
//! - `journal_mode = WAL` so readers proceed while a writer commits
//! - `busy_timeout = 5s` so competing writers queue instead of failing
//! - `foreign_keys = ON` so events cannot outlive their workspace
//!
//! Write units use `BEGIN IMMEDIATE`, which takes the database write lock up
//! front. Two processes racing an update on the same workspace therefore
//! serialize, and the loser observes the winner's version bump.

pub mod migrations;
pub mod schema;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value as SqlValue};
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use tracing::debug;

use super::{StoreError, WorkspaceStore};
use crate::error::VellumError;
use crate::model::{Event, EventBody, EventId, Workspace, WorkspaceFields, WorkspaceId};

/// Busy timeout used for store connections.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const WORKSPACE_COLUMNS: &str = "workspace_id, name, owner_id, current_data, base_data, \
     version, event_version, max_event_version, created_at_us, updated_at_us";

/// Open (or create) the store database, apply runtime pragmas, and migrate
/// the schema to the latest version.
///
/// # Errors
///
/// Returns an error if opening, configuring, or migrating the database fails.
pub fn open_store_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create store directory {}", parent.display()))?;
    }

    let mut conn =
        Connection::open(path).with_context(|| format!("open store database {}", path.display()))?;

    configure_connection(&conn).context("configure sqlite pragmas")?;
    migrations::migrate(&mut conn).context("apply store migrations")?;

    Ok(conn)
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    Ok(())
}

/// Workspace store over one SQLite connection.
///
/// Open one store per thread or process; each holds its own connection and
/// SQLite arbitrates between them.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
    writer: Mutex<()>,
}

impl SqliteStore {
    /// Open the database file at `path`.
    ///
    /// # Errors
    ///
    /// See [`open_store_db`].
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::from_connection(open_store_db(path)?))
    }

    /// A private in-memory database. Nothing is persisted.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory().context("open in-memory store")?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .context("configure sqlite pragmas")?;
        migrations::migrate(&mut conn).context("apply store migrations")?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            writer: Mutex::new(()),
        }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl WorkspaceStore for SqliteStore {
    fn get(&self, id: &WorkspaceId) -> Result<Option<Workspace>, StoreError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {WORKSPACE_COLUMNS} FROM workspaces WHERE workspace_id = ?1");
        Ok(conn
            .query_row(&sql, params![id.as_str()], workspace_from_row)
            .optional()?)
    }

    fn insert_workspace(&self, workspace: &Workspace) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM workspaces WHERE workspace_id = ?1)",
            params![workspace.id.as_str()],
            |row| row.get(0),
        )?;
        if exists {
            return Err(StoreError::Duplicate(workspace.id.clone()));
        }
        let sql = format!(
            "INSERT INTO workspaces ({WORKSPACE_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
        );
        conn.execute(
            &sql,
            params![
                workspace.id.as_str(),
                workspace.name,
                workspace.owner_id,
                serde_json::to_string(&workspace.current_data)?,
                serde_json::to_string(&workspace.base_data)?,
                to_i64(workspace.version, "version")?,
                to_i64(workspace.event_version, "event_version")?,
                to_i64(workspace.max_event_version, "max_event_version")?,
                workspace.created_at.timestamp_micros(),
                workspace.updated_at.timestamp_micros(),
            ],
        )?;
        Ok(())
    }

    fn put(&self, id: &WorkspaceId, fields: &WorkspaceFields) -> Result<(), StoreError> {
        let mut sets: Vec<&str> = Vec::new();
        let mut values: Vec<SqlValue> = Vec::new();

        if let Some(name) = &fields.name {
            sets.push("name = ?");
            values.push(SqlValue::Text(name.clone()));
        }
        if let Some(data) = &fields.current_data {
            sets.push("current_data = ?");
            values.push(SqlValue::Text(serde_json::to_string(data)?));
        }
        if let Some(version) = fields.version {
            sets.push("version = ?");
            values.push(SqlValue::Integer(to_i64(version, "version")?));
        }
        if let Some(ev) = fields.event_version {
            sets.push("event_version = ?");
            values.push(SqlValue::Integer(to_i64(ev, "event_version")?));
        }
        if let Some(max) = fields.max_event_version {
            sets.push("max_event_version = ?");
            values.push(SqlValue::Integer(to_i64(max, "max_event_version")?));
        }
        if let Some(at) = fields.updated_at {
            sets.push("updated_at_us = ?");
            values.push(SqlValue::Integer(at.timestamp_micros()));
        }

        let conn = self.conn()?;
        if sets.is_empty() {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM workspaces WHERE workspace_id = ?1)",
                params![id.as_str()],
                |row| row.get(0),
            )?;
            return if exists {
                Ok(())
            } else {
                Err(StoreError::Missing(id.clone()))
            };
        }

        values.push(SqlValue::Text(id.as_str().to_string()));
        let sql = format!(
            "UPDATE workspaces SET {} WHERE workspace_id = ?",
            sets.join(", ")
        );
        let changed = conn.execute(&sql, params_from_iter(values))?;
        if changed == 0 {
            return Err(StoreError::Missing(id.clone()));
        }
        Ok(())
    }

    fn insert_event(&self, event: &Event) -> Result<EventId, StoreError> {
        let (patches, label) = match &event.body {
            EventBody::Patch { patches } => (Some(serde_json::to_string(patches)?), None),
            EventBody::Checkpoint { label } => (None, Some(label.as_str())),
        };
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO workspace_events (
                workspace_id, version, user_id, kind, patches, label, created_at_us
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event.workspace_id.as_str(),
                to_i64(event.version, "event version")?,
                event.user_id,
                event.body.kind(),
                patches,
                label,
                event.timestamp.timestamp_micros(),
            ],
        )?;
        let row_id = conn.last_insert_rowid();
        u64::try_from(row_id).map_err(|_| StoreError::OutOfRange(format!("event id {row_id}")))
    }

    fn query_events(&self, id: &WorkspaceId) -> Result<Vec<(EventId, Event)>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT event_id, workspace_id, version, user_id, kind, patches, label, created_at_us
             FROM workspace_events
             WHERE workspace_id = ?1
             ORDER BY event_id ASC",
        )?;
        let rows = stmt.query_map(params![id.as_str()], event_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Workspace>, StoreError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {WORKSPACE_COLUMNS} FROM workspaces \
             WHERE owner_id = ?1 ORDER BY updated_at_us DESC, workspace_id ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![owner_id], workspace_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn write_txn<T, F>(&self, f: F) -> Result<T, VellumError>
    where
        F: FnOnce(&Self) -> Result<T, VellumError>,
    {
        let _writer = self.writer.lock().map_err(|_| StoreError::Poisoned)?;
        self.conn()?
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(StoreError::from)?;

        match f(self) {
            Ok(value) => {
                let committed = self.conn()?.execute_batch("COMMIT");
                if let Err(err) = committed {
                    rollback(self);
                    return Err(StoreError::from(err).into());
                }
                Ok(value)
            }
            Err(err) => {
                rollback(self);
                Err(err)
            }
        }
    }
}

fn rollback(store: &SqliteStore) {
    let Ok(conn) = store.conn() else {
        return;
    };
    if let Err(err) = conn.execute_batch("ROLLBACK") {
        debug!("rollback after failed write unit: {err}");
    }
}

fn to_i64(value: u64, what: &str) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::OutOfRange(format!("{what} {value}")))
}

fn conversion_error(
    idx: usize,
    ty: Type,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, Box::new(err))
}

fn u64_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let raw: i64 = row.get(idx)?;
    u64::try_from(raw).map_err(|err| conversion_error(idx, Type::Integer, err))
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|err| conversion_error(idx, Type::Text, err))
}

fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let micros: i64 = row.get(idx)?;
    DateTime::from_timestamp_micros(micros).ok_or(rusqlite::Error::IntegralValueOutOfRange(
        idx, micros,
    ))
}

fn workspace_from_row(row: &Row<'_>) -> rusqlite::Result<Workspace> {
    Ok(Workspace {
        id: WorkspaceId::from(row.get::<_, String>(0)?),
        name: row.get(1)?,
        owner_id: row.get(2)?,
        current_data: json_column(row, 3)?,
        base_data: json_column(row, 4)?,
        version: u64_column(row, 5)?,
        event_version: u64_column(row, 6)?,
        max_event_version: u64_column(row, 7)?,
        created_at: time_column(row, 8)?,
        updated_at: time_column(row, 9)?,
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<(EventId, Event)> {
    let event_id = u64_column(row, 0)?;
    let kind: String = row.get(4)?;
    let body = match kind.as_str() {
        "patch" => EventBody::Patch {
            patches: json_column(row, 5)?,
        },
        "checkpoint" => EventBody::Checkpoint { label: row.get(6)? },
        other => {
            return Err(rusqlite::Error::InvalidColumnType(
                4,
                format!("kind={other}"),
                Type::Text,
            ));
        }
    };
    Ok((
        event_id,
        Event {
            workspace_id: WorkspaceId::from(row.get::<_, String>(1)?),
            version: u64_column(row, 2)?,
            user_id: row.get(3)?,
            timestamp: time_column(row, 7)?,
            body,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::PatchOp;
    use serde_json::json;
    use tempfile::TempDir;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).expect("valid ts")
    }

    fn workspace(id: &str, owner: &str, at: i64) -> Workspace {
        Workspace::new(id.into(), "site", owner, json!({"name": "Initial"}), ts(at))
    }

    #[test]
    fn open_store_db_sets_wal_busy_timeout_and_fk() {
        let dir = TempDir::new().expect("tempdir");
        let conn = open_store_db(&dir.path().join("vellum.sqlite3")).expect("open");

        let journal_mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .expect("journal_mode");
        assert_eq!(journal_mode.to_ascii_lowercase(), "wal");

        let busy_timeout_ms: u64 = conn
            .pragma_query_value(None, "busy_timeout", |row| row.get(0))
            .expect("busy_timeout");
        assert_eq!(u128::from(busy_timeout_ms), DEFAULT_BUSY_TIMEOUT.as_millis());

        let foreign_keys: i64 = conn
            .pragma_query_value(None, "foreign_keys", |row| row.get(0))
            .expect("foreign_keys");
        assert_eq!(foreign_keys, 1);
    }

    #[test]
    fn workspace_round_trips_through_rows() {
        let store = SqliteStore::open_in_memory().expect("open");
        let ws = workspace("ws-1", "u1", 1_700_000_000);
        store.insert_workspace(&ws).expect("insert");
        assert_eq!(store.get(&ws.id).expect("get"), Some(ws));
        assert!(store.get(&"ws-2".into()).expect("get").is_none());
    }

    #[test]
    fn duplicate_workspace_is_rejected() {
        let store = SqliteStore::open_in_memory().expect("open");
        store
            .insert_workspace(&workspace("ws-1", "u1", 0))
            .expect("insert");
        let err = store
            .insert_workspace(&workspace("ws-1", "u1", 0))
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
    }

    #[test]
    fn put_updates_only_given_columns() {
        let store = SqliteStore::open_in_memory().expect("open");
        let ws = workspace("ws-1", "u1", 0);
        store.insert_workspace(&ws).expect("insert");

        let fields = WorkspaceFields {
            current_data: Some(json!({"name": "Updated"})),
            version: Some(2),
            event_version: Some(1),
            max_event_version: Some(1),
            ..WorkspaceFields::default()
        };
        store.put(&ws.id, &fields).expect("put");

        let got = store.get(&ws.id).expect("get").expect("present");
        assert_eq!(got.current_data, json!({"name": "Updated"}));
        assert_eq!(got.base_data, json!({"name": "Initial"}));
        assert_eq!((got.version, got.event_version, got.max_event_version), (2, 1, 1));
        assert_eq!(got.name, "site");
    }

    #[test]
    fn put_on_missing_workspace_fails() {
        let store = SqliteStore::open_in_memory().expect("open");
        let fields = WorkspaceFields {
            version: Some(2),
            ..WorkspaceFields::default()
        };
        let err = store.put(&"ws-x".into(), &fields).unwrap_err();
        assert!(matches!(err, StoreError::Missing(_)));
        let err = store
            .put(&"ws-x".into(), &WorkspaceFields::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::Missing(_)));
    }

    #[test]
    fn events_come_back_in_append_order() {
        let store = SqliteStore::open_in_memory().expect("open");
        store
            .insert_workspace(&workspace("ws-1", "u1", 0))
            .expect("insert");

        let patch = Event {
            workspace_id: "ws-1".into(),
            version: 1,
            timestamp: ts(10),
            user_id: Some("u1".into()),
            body: EventBody::Patch {
                patches: vec![PatchOp::Replace {
                    path: "/name".into(),
                    value: json!("Updated"),
                }],
            },
        };
        let checkpoint = Event {
            workspace_id: "ws-1".into(),
            version: 1,
            timestamp: ts(11),
            user_id: None,
            body: EventBody::Checkpoint {
                label: "v1.0".into(),
            },
        };
        let first = store.insert_event(&patch).expect("patch");
        let second = store.insert_event(&checkpoint).expect("checkpoint");
        assert!(second > first);

        let events = store.query_events(&"ws-1".into()).expect("query");
        assert_eq!(events, vec![(first, patch), (second, checkpoint)]);
    }

    #[test]
    fn events_require_an_existing_workspace() {
        let store = SqliteStore::open_in_memory().expect("open");
        let event = Event {
            workspace_id: "ws-ghost".into(),
            version: 0,
            timestamp: ts(0),
            user_id: None,
            body: EventBody::Checkpoint { label: "x".into() },
        };
        assert!(matches!(
            store.insert_event(&event),
            Err(StoreError::Sqlite(_))
        ));
    }

    #[test]
    fn list_by_owner_orders_most_recent_first() {
        let store = SqliteStore::open_in_memory().expect("open");
        store
            .insert_workspace(&workspace("ws-old", "u1", 100))
            .expect("insert");
        store
            .insert_workspace(&workspace("ws-new", "u1", 200))
            .expect("insert");
        store
            .insert_workspace(&workspace("ws-other", "u2", 300))
            .expect("insert");

        let ids: Vec<String> = store
            .list_by_owner("u1")
            .expect("list")
            .into_iter()
            .map(|ws| ws.id.to_string())
            .collect();
        assert_eq!(ids, ["ws-new", "ws-old"]);
    }

    #[test]
    fn failed_write_unit_rolls_back() {
        let store = SqliteStore::open_in_memory().expect("open");
        let result: Result<(), VellumError> = store.write_txn(|s| {
            s.insert_workspace(&workspace("ws-1", "u1", 0))?;
            Err(VellumError::InvalidInput("abort".into()))
        });
        assert!(result.is_err());
        assert!(store.get(&"ws-1".into()).expect("get").is_none());

        store
            .write_txn(|s| {
                s.insert_workspace(&workspace("ws-1", "u1", 0))?;
                Ok(())
            })
            .expect("commit");
        assert!(store.get(&"ws-1".into()).expect("get").is_some());
    }

    #[test]
    fn data_persists_across_reopen() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("vellum.sqlite3");
        {
            let store = SqliteStore::open(&path).expect("open");
            store
                .insert_workspace(&workspace("ws-1", "u1", 0))
                .expect("insert");
        }
        let store = SqliteStore::open(&path).expect("reopen");
        assert!(store.get(&"ws-1".into()).expect("get").is_some());
    }
}
