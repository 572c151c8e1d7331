//! Applying patch sequences to JSON documents.

use serde_json::Value;

use super::pointer::Pointer;
use super::{PatchError, PatchErrorKind, PatchOp};

/// Apply `ops` to a copy of `doc` and return the patched document.
///
/// Atomic: on error `doc` is untouched and no partial result escapes.
///
/// # Errors
///
/// Returns [`PatchError`] identifying the first operation that could not be
/// applied (unresolvable path, bad index, failed `test`, ...).
pub fn apply(doc: &Value, ops: &[PatchOp]) -> Result<Value, PatchError> {
    let mut out = doc.clone();
    apply_mut(&mut out, ops)?;
    Ok(out)
}

/// Apply `ops` to `doc` in place.
///
/// Not atomic: when an operation fails, the operations before it have
/// already been applied. Use [`apply`] when the caller needs the original
/// document to survive a failure.
///
/// # Errors
///
/// Same as [`apply`].
pub fn apply_mut(doc: &mut Value, ops: &[PatchOp]) -> Result<(), PatchError> {
    for (index, op) in ops.iter().enumerate() {
        apply_op(doc, op).map_err(|kind| PatchError {
            index,
            op: op.name(),
            path: op.path().to_string(),
            kind,
        })?;
    }
    Ok(())
}

fn apply_op(doc: &mut Value, op: &PatchOp) -> Result<(), PatchErrorKind> {
    match op {
        PatchOp::Add { path, value } => add(doc, &Pointer::parse(path)?, value.clone()),
        PatchOp::Remove { path } => remove(doc, &Pointer::parse(path)?).map(drop),
        PatchOp::Replace { path, value } => {
            let slot = resolve_mut(doc, Pointer::parse(path)?.tokens())?;
            *slot = value.clone();
            Ok(())
        }
        PatchOp::Move { from, path } => {
            let from = Pointer::parse(from)?;
            let to = Pointer::parse(path)?;
            if from == to {
                // Still required to resolve.
                return resolve(doc, from.tokens()).map(drop);
            }
            if from.is_proper_prefix_of(&to) {
                return Err(PatchErrorKind::MoveIntoDescendant);
            }
            let value = remove(doc, &from)?;
            add(doc, &to, value)
        }
        PatchOp::Copy { from, path } => {
            let value = resolve(doc, Pointer::parse(from)?.tokens())?.clone();
            add(doc, &Pointer::parse(path)?, value)
        }
        PatchOp::Test { path, value } => {
            if resolve(doc, Pointer::parse(path)?.tokens())? == value {
                Ok(())
            } else {
                Err(PatchErrorKind::TestFailed)
            }
        }
    }
}

fn add(doc: &mut Value, ptr: &Pointer, value: Value) -> Result<(), PatchErrorKind> {
    let Some((parent, last)) = ptr.split_last() else {
        *doc = value;
        return Ok(());
    };
    match resolve_mut(doc, parent)? {
        Value::Object(map) => {
            map.insert(last.to_string(), value);
            Ok(())
        }
        Value::Array(items) => {
            let index = if last == "-" {
                items.len()
            } else {
                parse_index(last)?
            };
            if index > items.len() {
                return Err(PatchErrorKind::IndexOutOfBounds {
                    index,
                    len: items.len(),
                });
            }
            items.insert(index, value);
            Ok(())
        }
        _ => Err(PatchErrorKind::NotAContainer),
    }
}

fn remove(doc: &mut Value, ptr: &Pointer) -> Result<Value, PatchErrorKind> {
    let Some((parent, last)) = ptr.split_last() else {
        return Ok(std::mem::take(doc));
    };
    match resolve_mut(doc, parent)? {
        Value::Object(map) => map.remove(last).ok_or(PatchErrorKind::PathNotFound),
        Value::Array(items) => {
            let index = parse_index(last)?;
            if index >= items.len() {
                return Err(PatchErrorKind::IndexOutOfBounds {
                    index,
                    len: items.len(),
                });
            }
            Ok(items.remove(index))
        }
        _ => Err(PatchErrorKind::NotAContainer),
    }
}

fn resolve<'a>(doc: &'a Value, tokens: &[String]) -> Result<&'a Value, PatchErrorKind> {
    let mut current = doc;
    for token in tokens {
        current = match current {
            Value::Object(map) => map.get(token).ok_or(PatchErrorKind::PathNotFound)?,
            Value::Array(items) => {
                let index = parse_index(token)?;
                let len = items.len();
                items
                    .get(index)
                    .ok_or(PatchErrorKind::IndexOutOfBounds { index, len })?
            }
            _ => return Err(PatchErrorKind::PathNotFound),
        };
    }
    Ok(current)
}

fn resolve_mut<'a>(doc: &'a mut Value, tokens: &[String]) -> Result<&'a mut Value, PatchErrorKind> {
    let mut current = doc;
    for token in tokens {
        current = match current {
            Value::Object(map) => map.get_mut(token).ok_or(PatchErrorKind::PathNotFound)?,
            Value::Array(items) => {
                let index = parse_index(token)?;
                let len = items.len();
                items
                    .get_mut(index)
                    .ok_or(PatchErrorKind::IndexOutOfBounds { index, len })?
            }
            _ => return Err(PatchErrorKind::PathNotFound),
        };
    }
    Ok(current)
}

/// Array indices are decimal digits without leading zeros.
fn parse_index(token: &str) -> Result<usize, PatchErrorKind> {
    let well_formed = !token.is_empty()
        && token.bytes().all(|b| b.is_ascii_digit())
        && (token == "0" || !token.starts_with('0'));
    if !well_formed {
        return Err(PatchErrorKind::InvalidIndex(token.to_string()));
    }
    token
        .parse()
        .map_err(|_| PatchErrorKind::InvalidIndex(token.to_string()))
}
