//! Rebuilding workspace state from the event log.
//!
//! The log is append-only, but the history it describes is linear with
//! truncation: an update made after an undo discards the undone positions.
//! [`live_chain`] recovers that linear history by walking events in append
//! order. A patch event recorded at position `v` cuts the chain back to
//! `v - 1` entries and becomes entry `v`. Checkpoints mark positions and
//! carry no data.

use serde_json::Value;

use crate::error::VellumError;
use crate::model::{Event, EventId, WorkspaceId};
use crate::patch::{PatchOp, apply_mut};

/// Patch sequences of the live chain. Entry `i` moves position `i` to
/// position `i + 1`.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LiveChain<'a> {
    links: Vec<&'a [PatchOp]>,
}

impl<'a> LiveChain<'a> {
    /// Number of positions past the base state.
    #[must_use]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    #[must_use]
    pub fn links(&self) -> &[&'a [PatchOp]] {
        &self.links
    }
}

/// Derive the live chain from events in append order.
///
/// # Errors
///
/// [`VellumError::CorruptLog`] if a patch event claims position `0` or skips
/// past the end of the chain.
pub fn live_chain<'a>(
    id: &WorkspaceId,
    events: &'a [(EventId, Event)],
) -> Result<LiveChain<'a>, VellumError> {
    let mut links: Vec<&'a [PatchOp]> = Vec::new();
    for (event_id, event) in events {
        if event.is_checkpoint() {
            continue;
        }
        let position = usize::try_from(event.version).unwrap_or(usize::MAX);
        if position == 0 || position > links.len() + 1 {
            return Err(VellumError::CorruptLog {
                id: id.clone(),
                reason: format!(
                    "event {event_id} records position {} but the chain has {} entries",
                    event.version,
                    links.len()
                ),
            });
        }
        links.truncate(position - 1);
        links.push(event.patches());
    }
    Ok(LiveChain { links })
}

/// Apply the first `target` links of `chain` to a copy of `base`.
///
/// # Errors
///
/// [`VellumError::CorruptLog`] if `target` is past the end of the chain, or
/// [`VellumError::PatchApply`] if a stored patch does not apply.
pub fn rebuild(
    id: &WorkspaceId,
    base: &Value,
    chain: &LiveChain<'_>,
    target: u64,
) -> Result<Value, VellumError> {
    let count = usize::try_from(target).unwrap_or(usize::MAX);
    if count > chain.len() {
        return Err(VellumError::CorruptLog {
            id: id.clone(),
            reason: format!(
                "position {target} requested but the chain has {} entries",
                chain.len()
            ),
        });
    }

    let mut state = base.clone();
    for (idx, ops) in chain.links.iter().take(count).enumerate() {
        apply_mut(&mut state, ops).map_err(|source| VellumError::PatchApply {
            id: id.clone(),
            position: idx as u64 + 1,
            source,
        })?;
    }
    Ok(state)
}
