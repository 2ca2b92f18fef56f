//! SQL DDL for the user-record table.

use rusqlite::{Connection, OptionalExtension};

/// `face_encoding` holds `4 * D` bytes of little-endian f32, or NULL until the
/// user enrolls a face.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    face_encoding BLOB,
    enrolled_at TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_users_enrolled ON users(enrolled_at);

CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Create tables if missing. Idempotent.
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)
}

/// Read the embedding dimension recorded for this database, if any.
pub fn stored_dimension(conn: &Connection) -> rusqlite::Result<Option<usize>> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM schema_meta WHERE key = 'dimension'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value.and_then(|v| v.parse().ok()))
}

pub fn record_dimension(conn: &Connection, dimension: usize) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('dimension', ?1)",
        [dimension.to_string()],
    )?;
    Ok(())
}
