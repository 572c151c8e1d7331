//! SQLite schema for the shared workspace store.
//!
//! - `workspaces` holds the current state and version counters of each
//!   workspace
//! - `workspace_events` is the append-only log; `event_id` gives append order
//! - `store_meta` records the applied schema version

/// Migration v1: workspaces, their event log, and store metadata.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS workspaces (
    workspace_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    owner_id TEXT NOT NULL CHECK (length(trim(owner_id)) > 0),
    current_data TEXT NOT NULL,
    base_data TEXT NOT NULL,
    version INTEGER NOT NULL CHECK (version >= 1),
    event_version INTEGER NOT NULL DEFAULT 0 CHECK (event_version >= 0),
    max_event_version INTEGER NOT NULL DEFAULT 0,
    created_at_us INTEGER NOT NULL,
    updated_at_us INTEGER NOT NULL,
    CHECK (event_version <= max_event_version)
);

CREATE TABLE IF NOT EXISTS workspace_events (
    event_id INTEGER PRIMARY KEY AUTOINCREMENT,
    workspace_id TEXT NOT NULL REFERENCES workspaces(workspace_id) ON DELETE CASCADE,
    version INTEGER NOT NULL CHECK (version >= 0),
    user_id TEXT,
    kind TEXT NOT NULL CHECK (kind IN ('patch', 'checkpoint')),
    patches TEXT,
    label TEXT,
    created_at_us INTEGER NOT NULL,
    CHECK ((kind = 'patch' AND patches IS NOT NULL) OR (kind = 'checkpoint' AND label IS NOT NULL))
);

CREATE TABLE IF NOT EXISTS store_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL
);

INSERT OR IGNORE INTO store_meta (id, schema_version) VALUES (1, 1);
";

/// Migration v2: lookup indexes for owner listing and per-workspace replay.
pub const MIGRATION_V2_SQL: &str = r"
CREATE INDEX IF NOT EXISTS idx_workspaces_owner_updated
    ON workspaces(owner_id, updated_at_us DESC);

CREATE INDEX IF NOT EXISTS idx_workspace_events_workspace
    ON workspace_events(workspace_id, event_id);
";

/// Indexes expected by the listing and replay query paths.
pub const REQUIRED_INDEXES: &[&str] = &[
    "idx_workspaces_owner_updated",
    "idx_workspace_events_workspace",
];
