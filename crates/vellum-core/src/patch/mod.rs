//! RFC 6902 JSON Patch: operation model, diff, and apply.
//!
//! Workspace history is stored as ordered patch sequences. Two laws hold for
//! every pair of JSON documents `a` and `b`:
//!
//! - `diff(a, a)` is empty.
//! - `apply(a, &diff(a, b))` equals `b`.
//!
//! Paths are RFC 6901 JSON Pointers (see [`pointer`]).

pub mod apply;
pub mod diff;
pub mod pointer;

pub use apply::{apply, apply_mut};
pub use diff::diff;
pub use pointer::Pointer;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single JSON Patch operation.
///
/// Serializes in the RFC 6902 wire shape, e.g.
/// `{"op":"replace","path":"/name","value":"Updated"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    Add { path: String, value: Value },
    Remove { path: String },
    Replace { path: String, value: Value },
    Move { from: String, path: String },
    Copy { from: String, path: String },
    Test { path: String, value: Value },
}

impl PatchOp {
    /// The RFC 6902 operation name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Add { .. } => "add",
            Self::Remove { .. } => "remove",
            Self::Replace { .. } => "replace",
            Self::Move { .. } => "move",
            Self::Copy { .. } => "copy",
            Self::Test { .. } => "test",
        }
    }

    /// The target path of the operation.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Add { path, .. }
            | Self::Remove { path }
            | Self::Replace { path, .. }
            | Self::Move { path, .. }
            | Self::Copy { path, .. }
            | Self::Test { path, .. } => path,
        }
    }
}

/// Why a single operation could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatchErrorKind {
    #[error("invalid JSON pointer `{0}`")]
    InvalidPointer(String),

    #[error("path does not resolve")]
    PathNotFound,

    #[error("`{0}` is not a valid array index")]
    InvalidIndex(String),

    #[error("array index {index} out of bounds (len {len})")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("parent value is not an object or array")]
    NotAContainer,

    #[error("test failed: value at path differs")]
    TestFailed,

    #[error("cannot move a value into one of its own children")]
    MoveIntoDescendant,
}

/// A patch sequence failed to apply.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("patch operation #{index} ({op} `{path}`) failed: {kind}")]
pub struct PatchError {
    /// Zero-based position of the failing operation in its sequence.
    pub index: usize,
    /// Operation name (`add`, `remove`, ...).
    pub op: &'static str,
    /// Target path of the failing operation.
    pub path: String,
    pub kind: PatchErrorKind,
}
