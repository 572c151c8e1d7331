//! Structural diff between two JSON documents.
//!
//! The output is not minimal, only correct: objects are compared key by key,
//! arrays index by index (trailing removals emitted from the end so earlier
//! indices stay valid), and any other change becomes a `replace`.

use serde_json::Value;

use super::PatchOp;
use super::pointer::Pointer;

/// Compute the operations that turn `old` into `new`.
///
/// Returns an empty vector when the documents are equal.
#[must_use]
pub fn diff(old: &Value, new: &Value) -> Vec<PatchOp> {
    let mut ops = Vec::new();
    diff_at(&Pointer::root(), old, new, &mut ops);
    ops
}

fn diff_at(path: &Pointer, old: &Value, new: &Value, ops: &mut Vec<PatchOp>) {
    if old == new {
        return;
    }
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            for (key, old_value) in old_map {
                match new_map.get(key) {
                    Some(new_value) => diff_at(&path.child(key.as_str()), old_value, new_value, ops),
                    None => ops.push(PatchOp::Remove {
                        path: path.child(key.as_str()).to_string(),
                    }),
                }
            }
            for (key, new_value) in new_map {
                if !old_map.contains_key(key) {
                    ops.push(PatchOp::Add {
                        path: path.child(key.as_str()).to_string(),
                        value: new_value.clone(),
                    });
                }
            }
        }
        (Value::Array(old_items), Value::Array(new_items)) => {
            for (index, old_value) in old_items.iter().enumerate().rev() {
                let child = path.child(index.to_string());
                match new_items.get(index) {
                    Some(new_value) => diff_at(&child, old_value, new_value, ops),
                    None => ops.push(PatchOp::Remove {
                        path: child.to_string(),
                    }),
                }
            }
            for (index, new_value) in new_items.iter().enumerate().skip(old_items.len()) {
                ops.push(PatchOp::Add {
                    path: path.child(index.to_string()).to_string(),
                    value: new_value.clone(),
                });
            }
        }
        _ => ops.push(PatchOp::Replace {
            path: path.to_string(),
            value: new.clone(),
        }),
    }
}
