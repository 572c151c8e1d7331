//! Forward-only schema upgrades keyed on `PRAGMA user_version`.

use rusqlite::Connection;
use rusqlite::types::Type;
use tracing::info;

use super::schema;

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "workspaces and event log",
        sql: schema::MIGRATION_V1_SQL,
    },
    Migration {
        version: 2,
        name: "listing and replay indexes",
        sql: schema::MIGRATION_V2_SQL,
    },
];

/// Schema version a freshly migrated database ends up at.
pub const LATEST_SCHEMA_VERSION: u32 = 2;

/// The database's `user_version`.
///
/// # Errors
///
/// SQLite failures, or a negative / oversized stored value.
pub fn schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    let raw: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    u32::try_from(raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(0, Type::Integer, Box::new(err)))
}

/// Bring `conn` up to [`LATEST_SCHEMA_VERSION`]. Each step commits on its
/// own, together with its `user_version` bump. Returns the final version.
///
/// # Errors
///
/// The first failing step; earlier steps stay applied.
pub fn migrate(conn: &mut Connection) -> rusqlite::Result<u32> {
    let start = schema_version(conn)?;
    let mut at = start;
    for step in MIGRATIONS.iter().filter(|m| m.version > start) {
        let tx = conn.transaction()?;
        tx.execute_batch(step.sql)?;
        tx.execute(
            "UPDATE store_meta SET schema_version = ?1 WHERE id = 1",
            [i64::from(step.version)],
        )?;
        tx.pragma_update(None, "user_version", i64::from(step.version))?;
        tx.commit()?;
        info!(version = step.version, name = step.name, "applied store migration");
        at = step.version;
    }
    Ok(at)
}
