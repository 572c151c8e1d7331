use std::fmt;

use crate::model::WorkspaceId;
use crate::patch::PatchError;
use crate::store::StoreError;

/// Machine-readable error codes for agent-friendly decision making.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotInitialized,
    ConfigParseError,
    StoreNotConfigured,
    Unauthenticated,
    AccessDenied,
    WorkspaceNotFound,
    VersionConflict,
    InvalidInput,
    InvalidPosition,
    PatchApplyFailed,
    CorruptEventLog,
    StoreWriteFailed,
    LockContention,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotInitialized => "E1001",
            Self::ConfigParseError => "E1002",
            Self::StoreNotConfigured => "E1003",
            Self::Unauthenticated => "E1101",
            Self::AccessDenied => "E1102",
            Self::WorkspaceNotFound => "E2001",
            Self::VersionConflict => "E2002",
            Self::InvalidInput => "E2003",
            Self::InvalidPosition => "E2004",
            Self::PatchApplyFailed => "E3001",
            Self::CorruptEventLog => "E3002",
            Self::StoreWriteFailed => "E5001",
            Self::LockContention => "E5002",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NotInitialized => "Workspace directory not initialized",
            Self::ConfigParseError => "Config file parse error",
            Self::StoreNotConfigured => "No hosted store configured",
            Self::Unauthenticated => "Not authenticated",
            Self::AccessDenied => "Access denied",
            Self::WorkspaceNotFound => "Workspace not found",
            Self::VersionConflict => "Version conflict",
            Self::InvalidInput => "Invalid input",
            Self::InvalidPosition => "Event position out of range",
            Self::PatchApplyFailed => "Patch failed to apply",
            Self::CorruptEventLog => "Corrupt event log",
            Self::StoreWriteFailed => "Store write failed",
            Self::LockContention => "Lock contention",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators and agents.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Run `vl init <name>` in this directory first."),
            Self::ConfigParseError => {
                Some("Fix syntax in .vellum/config.json or the user config.toml and retry.")
            }
            Self::StoreNotConfigured => {
                Some("Pass --store, set VELLUM_STORE_URL, or set store_url in config.toml.")
            }
            Self::Unauthenticated => {
                Some("Pass --user, set VELLUM_USER, or set [auth] user in your config.")
            }
            Self::AccessDenied => Some("Only the workspace owner can read or modify it."),
            Self::WorkspaceNotFound => None,
            Self::VersionConflict => {
                Some("Another writer got there first. Run `vl pull` and retry.")
            }
            Self::InvalidInput => None,
            Self::InvalidPosition => Some("Use `vl history` to list valid event positions."),
            Self::PatchApplyFailed | Self::CorruptEventLog => {
                Some("The event log does not replay cleanly. Report a bug with `vl history --json`.")
            }
            Self::StoreWriteFailed => Some("Check disk space and write permissions."),
            Self::LockContention => Some("Retry after the other `vl` process releases its lock."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Failures surfaced by the version engine and the access gate.
#[derive(Debug, thiserror::Error)]
pub enum VellumError {
    #[error("not authenticated: please log in")]
    Unauthenticated,

    #[error("access denied to workspace {0}")]
    AccessDenied(WorkspaceId),

    #[error("workspace not found: {0}")]
    NotFound(WorkspaceId),

    #[error("version conflict on {id}: expected version {expected}, found {actual}")]
    VersionConflict {
        id: WorkspaceId,
        expected: u64,
        actual: u64,
    },

    #[error("event log of {id} failed to replay at event {position}: {source}")]
    PatchApply {
        id: WorkspaceId,
        position: u64,
        #[source]
        source: PatchError,
    },

    #[error("corrupt event log for {id}: {reason}")]
    CorruptLog { id: WorkspaceId, reason: String },

    #[error("event position {requested} out of range (0..={max})")]
    InvalidPosition { requested: u64, max: u64 },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl VellumError {
    /// Machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Unauthenticated => ErrorCode::Unauthenticated,
            Self::AccessDenied(_) => ErrorCode::AccessDenied,
            Self::NotFound(_) => ErrorCode::WorkspaceNotFound,
            Self::VersionConflict { .. } => ErrorCode::VersionConflict,
            Self::PatchApply { .. } => ErrorCode::PatchApplyFailed,
            Self::CorruptLog { .. } => ErrorCode::CorruptEventLog,
            Self::InvalidPosition { .. } => ErrorCode::InvalidPosition,
            Self::InvalidInput(_) => ErrorCode::InvalidInput,
            Self::Store(err) => err.code(),
        }
    }

    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }

    /// True for the gate failures that reads treat as "absent".
    #[must_use]
    pub const fn is_access_failure(&self) -> bool {
        matches!(
            self,
            Self::Unauthenticated | Self::AccessDenied(_) | Self::NotFound(_)
        )
    }

    /// True when the caller may retry after refreshing its base version.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}
