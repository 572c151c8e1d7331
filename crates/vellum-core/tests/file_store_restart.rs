//! Local store durability across process restarts.

use std::fs::OpenOptions;
use std::io::Write;

use serde_json::json;
use tempfile::TempDir;
use vellum_core::store::FileStore;
use vellum_core::{Caller, VersionEngine, WorkspaceStore};

fn owner() -> Caller {
    Caller::authenticated("user-1")
}

#[test]
fn redo_survives_reopen() {
    let dir = TempDir::new().expect("tempdir");
    let root = dir.path().join(".vellum");

    let id = {
        let engine = VersionEngine::new(FileStore::open(&root).expect("open"));
        let ws = engine
            .create(&owner(), "Site", json!({"title": "a"}))
            .expect("create");
        engine
            .update(&owner(), &ws.id, &json!({"title": "b"}), 1)
            .expect("update");
        engine.undo(&owner(), &ws.id).expect("undo");
        ws.id
    };

    let engine = VersionEngine::new(FileStore::open(&root).expect("reopen"));
    let ws = engine.get(&owner(), &id).expect("get").expect("present");
    assert_eq!(ws.current_data, json!({"title": "a"}));
    assert_eq!((ws.event_version, ws.max_event_version), (0, 1));
    assert!(ws.can_redo());

    let redo = engine.redo(&owner(), &id).expect("redo");
    assert!(redo.success);
    assert_eq!(redo.data, Some(json!({"title": "b"})));
}

#[test]
fn torn_trailing_event_is_dropped_on_open() {
    let dir = TempDir::new().expect("tempdir");
    let root = dir.path().join(".vellum");

    let id = {
        let engine = VersionEngine::new(FileStore::open(&root).expect("open"));
        let ws = engine
            .create(&owner(), "Site", json!({"n": 0}))
            .expect("create");
        engine
            .update(&owner(), &ws.id, &json!({"n": 1}), 1)
            .expect("update");
        ws.id
    };

    let store = FileStore::new(&root);
    let mut log = OpenOptions::new()
        .append(true)
        .open(store.events_path())
        .expect("open log");
    log.write_all(br#"{"eventId":2,"event":{"workspaceId""#)
        .expect("write torn tail");
    drop(log);

    let store = FileStore::open(&root).expect("reopen");
    let content = std::fs::read_to_string(store.events_path()).expect("read log");
    assert!(content.ends_with('\n'));
    assert_eq!(content.lines().count(), 1);

    let engine = VersionEngine::new(store);
    assert_eq!(engine.history(&owner(), &id).expect("history").len(), 1);
    engine.verify(&owner(), &id).expect("replay matches");

    // Appends continue from the surviving tail.
    let out = engine
        .update(&owner(), &id, &json!({"n": 2}), 2)
        .expect("update after repair");
    assert_eq!(out.event_version, 2);
    let ids: Vec<u64> = engine
        .history(&owner(), &id)
        .expect("history")
        .into_iter()
        .map(|(event_id, _)| event_id)
        .collect();
    assert_eq!(ids, vec![1, 2]);
}

#[test]
fn torn_tail_is_repaired_before_next_append_on_open_handle() {
    let dir = TempDir::new().expect("tempdir");
    let root = dir.path().join(".vellum");

    let engine = VersionEngine::new(FileStore::open(&root).expect("open"));
    let ws = engine
        .create(&owner(), "Site", json!({"n": 0}))
        .expect("create");
    engine
        .update(&owner(), &ws.id, &json!({"n": 1}), 1)
        .expect("update");

    // Another writer dies mid-append while this handle stays open.
    let mut log = OpenOptions::new()
        .append(true)
        .open(FileStore::new(&root).events_path())
        .expect("open log");
    log.write_all(br#"{"eventId":2,"ev"#).expect("write torn tail");
    drop(log);

    let out = engine
        .update(&owner(), &ws.id, &json!({"n": 2}), 2)
        .expect("update over torn tail");
    assert_eq!(out.event_version, 2);

    let history = engine.history(&owner(), &ws.id).expect("history");
    assert_eq!(history.len(), 2);
    engine.verify(&owner(), &ws.id).expect("replay matches");

    let undo = engine.undo(&owner(), &ws.id).expect("undo");
    assert!(undo.success);
    assert_eq!(undo.data, Some(json!({"n": 1})));
}

#[test]
fn second_workspace_in_same_directory_is_rejected() {
    let dir = TempDir::new().expect("tempdir");
    let engine = VersionEngine::new(FileStore::open(dir.path().join(".vellum")).expect("open"));
    engine
        .create(&owner(), "First", json!({}))
        .expect("first create");
    assert!(engine.create(&owner(), "Second", json!({})).is_err());
    assert_eq!(engine.list(&owner()).expect("list").len(), 1);
}

#[test]
fn files_follow_the_documented_layout() {
    let dir = TempDir::new().expect("tempdir");
    let store = FileStore::open(dir.path().join(".vellum")).expect("open");
    assert!(!store.is_initialized());
    let engine = VersionEngine::new(store);
    let ws = engine
        .create(&owner(), "Site", json!({"k": "v"}))
        .expect("create");
    engine
        .checkpoint(&owner(), &ws.id, "first")
        .expect("checkpoint");

    let store = engine.store();
    assert!(store.is_initialized());
    let base: serde_json::Value =
        serde_json::from_slice(&std::fs::read(store.base_path()).expect("base")).expect("json");
    assert_eq!(base, json!({"k": "v"}));
    let snapshot: serde_json::Value =
        serde_json::from_slice(&std::fs::read(store.snapshot_path()).expect("snapshot"))
            .expect("json");
    assert_eq!(snapshot, json!({"k": "v"}));
    assert!(store.lock_path().exists());
    assert_eq!(
        store.query_events(&ws.id).expect("events")[0].1.label(),
        Some("first")
    );
}
