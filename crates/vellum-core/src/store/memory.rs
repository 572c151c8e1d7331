use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{StoreError, WorkspaceStore};
use crate::error::VellumError;
use crate::model::{Event, EventId, Workspace, WorkspaceFields, WorkspaceId};

#[derive(Debug, Clone, Default)]
struct Tables {
    workspaces: HashMap<WorkspaceId, Workspace>,
    events: Vec<(EventId, Event)>,
    next_event_id: EventId,
}

/// In-process store. Clones share the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    writer: Arc<Mutex<()>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Number of events across all workspaces.
    ///
    /// # Errors
    ///
    /// [`StoreError::Poisoned`] if a writer panicked.
    pub fn event_count(&self) -> Result<usize, StoreError> {
        Ok(self.tables()?.events.len())
    }
}

impl WorkspaceStore for MemoryStore {
    fn get(&self, id: &WorkspaceId) -> Result<Option<Workspace>, StoreError> {
        Ok(self.tables()?.workspaces.get(id).cloned())
    }

    fn insert_workspace(&self, workspace: &Workspace) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        if tables.workspaces.contains_key(&workspace.id) {
            return Err(StoreError::Duplicate(workspace.id.clone()));
        }
        tables
            .workspaces
            .insert(workspace.id.clone(), workspace.clone());
        Ok(())
    }

    fn put(&self, id: &WorkspaceId, fields: &WorkspaceFields) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        let workspace = tables
            .workspaces
            .get_mut(id)
            .ok_or_else(|| StoreError::Missing(id.clone()))?;
        workspace.apply_fields(fields);
        Ok(())
    }

    fn insert_event(&self, event: &Event) -> Result<EventId, StoreError> {
        let mut tables = self.tables()?;
        tables.next_event_id += 1;
        let id = tables.next_event_id;
        tables.events.push((id, event.clone()));
        Ok(id)
    }

    fn query_events(&self, id: &WorkspaceId) -> Result<Vec<(EventId, Event)>, StoreError> {
        Ok(self
            .tables()?
            .events
            .iter()
            .filter(|(_, event)| &event.workspace_id == id)
            .cloned()
            .collect())
    }

    fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Workspace>, StoreError> {
        let mut owned: Vec<Workspace> = self
            .tables()?
            .workspaces
            .values()
            .filter(|ws| ws.owner_id == owner_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(owned)
    }

    fn write_txn<T, F>(&self, f: F) -> Result<T, VellumError>
    where
        F: FnOnce(&Self) -> Result<T, VellumError>,
    {
        let _writer = self.writer.lock().map_err(|_| StoreError::Poisoned)?;
        let before = self.tables()?.clone();
        let result = f(self);
        if result.is_err() {
            *self.tables()? = before;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EventBody;
    use chrono::Utc;
    use serde_json::json;

    fn workspace(id: &str, owner: &str) -> Workspace {
        Workspace::new(id.into(), "site", owner, json!({}), Utc::now())
    }

    fn checkpoint(ws: &str, label: &str) -> Event {
        Event {
            workspace_id: ws.into(),
            version: 0,
            timestamp: Utc::now(),
            user_id: None,
            body: EventBody::Checkpoint {
                label: label.into(),
            },
        }
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let store = MemoryStore::new();
        store.insert_workspace(&workspace("ws-1", "u1")).expect("insert");
        let err = store
            .insert_workspace(&workspace("ws-1", "u1"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
    }

    #[test]
    fn put_on_missing_workspace_fails() {
        let store = MemoryStore::new();
        let err = store
            .put(&"nope".into(), &WorkspaceFields::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::Missing(_)));
    }

    #[test]
    fn events_are_filtered_and_ordered() {
        let store = MemoryStore::new();
        let a = store.insert_event(&checkpoint("ws-1", "a")).expect("event");
        store.insert_event(&checkpoint("ws-2", "x")).expect("event");
        let b = store.insert_event(&checkpoint("ws-1", "b")).expect("event");
        assert!(b > a);

        let events = store.query_events(&"ws-1".into()).expect("query");
        let labels: Vec<_> = events.iter().filter_map(|(_, e)| e.label()).collect();
        assert_eq!(labels, ["a", "b"]);
        assert_eq!(store.event_count().expect("count"), 3);
    }

    #[test]
    fn list_by_owner_filters() {
        let store = MemoryStore::new();
        store.insert_workspace(&workspace("ws-1", "u1")).expect("insert");
        store.insert_workspace(&workspace("ws-2", "u2")).expect("insert");
        let mine = store.list_by_owner("u1").expect("list");
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].id.as_str(), "ws-1");
    }

    #[test]
    fn failed_txn_rolls_back_writes() {
        let store = MemoryStore::new();
        let result: Result<(), VellumError> = store.write_txn(|s| {
            s.insert_workspace(&workspace("ws-1", "u1"))?;
            s.insert_event(&checkpoint("ws-1", "a"))?;
            Err(VellumError::InvalidInput("abort".into()))
        });
        assert!(result.is_err());
        assert!(store.get(&"ws-1".into()).expect("get").is_none());
        assert_eq!(store.event_count().expect("count"), 0);
    }

    #[test]
    fn clones_share_tables() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.insert_workspace(&workspace("ws-1", "u1")).expect("insert");
        assert!(other.get(&"ws-1".into()).expect("get").is_some());
    }
}
