//! Ownership gate.
//!
//! Every engine operation goes through here first. Checks run in a fixed
//! order: identity, existence, ownership. A caller without identity never
//! learns whether a workspace exists.

use crate::error::VellumError;
use crate::model::{Workspace, WorkspaceId};
use crate::store::WorkspaceStore;

/// Who is asking. Anonymous callers can do nothing but read empty lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Caller {
    user_id: Option<String>,
}

impl Caller {
    #[must_use]
    pub fn authenticated(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
        }
    }

    #[must_use]
    pub const fn anonymous() -> Self {
        Self { user_id: None }
    }

    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }
}

/// Return the caller's user id or fail with [`VellumError::Unauthenticated`].
///
/// # Errors
///
/// [`VellumError::Unauthenticated`] for anonymous callers or a blank id.
pub fn require_identity(caller: &Caller) -> Result<&str, VellumError> {
    match caller.user_id() {
        Some(id) if !id.trim().is_empty() => Ok(id),
        _ => Err(VellumError::Unauthenticated),
    }
}

/// Load a workspace the caller owns.
///
/// # Errors
///
/// [`VellumError::Unauthenticated`], then [`VellumError::NotFound`], then
/// [`VellumError::AccessDenied`], in that order. Store failures pass through.
pub fn authorize<'c, S: WorkspaceStore>(
    store: &S,
    caller: &'c Caller,
    id: &WorkspaceId,
) -> Result<(&'c str, Workspace), VellumError> {
    let user_id = require_identity(caller)?;
    let workspace = store
        .get(id)?
        .ok_or_else(|| VellumError::NotFound(id.clone()))?;
    if workspace.owner_id != user_id {
        return Err(VellumError::AccessDenied(id.clone()));
    }
    Ok((user_id, workspace))
}

/// Compare an expected version against the stored one.
///
/// # Errors
///
/// [`VellumError::VersionConflict`] when they differ.
pub fn check_version(workspace: &Workspace, expected: u64) -> Result<(), VellumError> {
    if workspace.version == expected {
        Ok(())
    } else {
        Err(VellumError::VersionConflict {
            id: workspace.id.clone(),
            expected,
            actual: workspace.version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Utc;
    use serde_json::json;

    fn store_with(owner: &str) -> MemoryStore {
        let store = MemoryStore::new();
        store
            .insert_workspace(&Workspace::new(
                "ws-1".into(),
                "site",
                owner,
                json!({}),
                Utc::now(),
            ))
            .expect("insert");
        store
    }

    #[test]
    fn anonymous_caller_is_rejected_first() {
        let store = store_with("u1");
        let err = authorize(&store, &Caller::anonymous(), &"missing".into()).unwrap_err();
        assert!(matches!(err, VellumError::Unauthenticated));
    }

    #[test]
    fn blank_identity_counts_as_anonymous() {
        assert!(matches!(
            require_identity(&Caller::authenticated("  ")),
            Err(VellumError::Unauthenticated)
        ));
    }

    #[test]
    fn missing_workspace_is_not_found() {
        let store = store_with("u1");
        let err = authorize(&store, &Caller::authenticated("u1"), &"ws-2".into()).unwrap_err();
        assert!(matches!(err, VellumError::NotFound(_)));
    }

    #[test]
    fn non_owner_is_denied() {
        let store = store_with("u1");
        let err = authorize(&store, &Caller::authenticated("u2"), &"ws-1".into()).unwrap_err();
        assert!(matches!(err, VellumError::AccessDenied(_)));
    }

    #[test]
    fn owner_gets_workspace() {
        let store = store_with("u1");
        let caller = Caller::authenticated("u1");
        let (user, ws) = authorize(&store, &caller, &"ws-1".into()).expect("authorized");
        assert_eq!(user, "u1");
        assert_eq!(ws.owner_id, "u1");
    }

    #[test]
    fn version_check() {
        let ws = Workspace::new("ws-1".into(), "site", "u1", json!({}), Utc::now());
        assert!(check_version(&ws, 1).is_ok());
        let err = check_version(&ws, 3).unwrap_err();
        assert!(matches!(
            err,
            VellumError::VersionConflict {
                expected: 3,
                actual: 1,
                ..
            }
        ));
    }
}
