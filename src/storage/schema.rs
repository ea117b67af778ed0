//! Database schema definitions.
//!
//! One generic `records` table holds every record type; the subtype's fields
//! live in the `kind` JSON column. Ownership is a foreign key, so deleting an
//! owner deletes its owned children.

use rusqlite::{Connection, Result};

/// Current schema version.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// The complete SQL schema for a gsync store.
///
/// Timestamps are stored as INTEGER (Unix milliseconds).
pub const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at INTEGER NOT NULL
);

-- Records: every entity, keyed by portable identity
CREATE TABLE IF NOT EXISTS records (
    id TEXT PRIMARY KEY,
    record_type TEXT NOT NULL,
    owner_id TEXT,
    owner_field TEXT,
    position INTEGER NOT NULL DEFAULT 0,
    kind TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    modified_at INTEGER NOT NULL,
    FOREIGN KEY (owner_id) REFERENCES records(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_records_type ON records(record_type);
CREATE INDEX IF NOT EXISTS idx_records_owner ON records(owner_id, owner_field, position);
CREATE INDEX IF NOT EXISTS idx_records_modified ON records(modified_at);

-- Events: audit trail of writes
CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    record_type TEXT NOT NULL,
    record_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    actor TEXT NOT NULL,
    old_value TEXT,
    new_value TEXT,
    comment TEXT,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_record ON events(record_id, id);
";

/// Apply pragmas and the schema to a writable connection.
///
/// # Errors
///
/// Returns an error if any statement fails.
pub fn apply_schema(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;

    conn.execute_batch(SCHEMA_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
        rusqlite::params![
            format!("v{CURRENT_SCHEMA_VERSION}"),
            chrono::Utc::now().timestamp_millis()
        ],
    )?;

    Ok(())
}

/// Check that a read-only connection points at a gsync store.
///
/// # Errors
///
/// Returns an error if the `records` table is missing.
pub fn verify_schema(conn: &Connection) -> Result<()> {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'records'",
        [],
        |_| Ok(()),
    )
}
