//! Random editing sessions against the version engine.
//!
//! A reference model tracks the expected linear history; after every step
//! the engine's counters, current data, and replayed state must agree with it.

use proptest::prelude::*;
use serde_json::{Value, json};
use vellum_core::store::MemoryStore;
use vellum_core::{Caller, VersionEngine};

use generators::*;

/// Expected history: `states[0]` is the base, `states[cursor]` is current.
struct Model {
    states: Vec<Value>,
    cursor: usize,
    version: u64,
}

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(256))]

    #[test]
    fn engine_matches_linear_history(session in arb_session(24)) {
        let caller = Caller::authenticated("user-1");
        let engine = VersionEngine::new(MemoryStore::new());
        let base = json!({"title": "start"});
        let ws = engine.create(&caller, "Prop", base.clone()).expect("create");
        let mut model = Model { states: vec![base], cursor: 0, version: 1 };

        for action in session {
            match action {
                Action::Update(data) => {
                    let out = engine
                        .update(&caller, &ws.id, &data, model.version)
                        .expect("update with current version");
                    if data == model.states[model.cursor] {
                        prop_assert!(out.no_changes);
                    } else {
                        model.states.truncate(model.cursor + 1);
                        model.states.push(data);
                        model.cursor += 1;
                        model.version += 1;
                    }
                    prop_assert_eq!(out.version, model.version);
                }
                Action::Undo => {
                    let out = engine.undo(&caller, &ws.id).expect("undo");
                    if model.cursor == 0 {
                        prop_assert!(!out.success);
                    } else {
                        model.cursor -= 1;
                        model.version += 1;
                        prop_assert_eq!(out.data.as_ref(), Some(&model.states[model.cursor]));
                    }
                }
                Action::Redo => {
                    let out = engine.redo(&caller, &ws.id).expect("redo");
                    if model.cursor + 1 == model.states.len() {
                        prop_assert!(!out.success);
                    } else {
                        model.cursor += 1;
                        model.version += 1;
                        prop_assert_eq!(out.data.as_ref(), Some(&model.states[model.cursor]));
                    }
                }
                Action::Checkpoint(label) => {
                    let out = engine.checkpoint(&caller, &ws.id, &label).expect("checkpoint");
                    prop_assert_eq!(out.event_version, model.cursor as u64);
                }
            }

            let current = engine.get(&caller, &ws.id).expect("get").expect("present");
            prop_assert_eq!(current.version, model.version);
            prop_assert_eq!(current.event_version, model.cursor as u64);
            prop_assert_eq!(current.max_event_version, (model.states.len() - 1) as u64);
            prop_assert_eq!(&current.current_data, &model.states[model.cursor]);
            prop_assert!(engine.verify(&caller, &ws.id).is_ok());
        }

        for (position, expected) in model.states.iter().enumerate() {
            let state = engine
                .state_at(&caller, &ws.id, position as u64)
                .expect("state_at reachable position");
            prop_assert_eq!(&state, expected);
        }
    }
}
