//! Database schema and migrations

use rusqlite::Connection;

use crate::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
///
/// # Errors
///
/// Returns error if migration fails
pub fn init(conn: &Connection) -> Result<()> {
    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap_or(0);

    if version < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Archived media, keyed by normalized url plus optional format
        CREATE TABLE IF NOT EXISTS media_cache (
            cache_key TEXT PRIMARY KEY,
            url TEXT NOT NULL,
            format TEXT,
            platform TEXT NOT NULL,
            archive_location_id INTEGER NOT NULL,
            message_id INTEGER NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Per-platform statistics
        CREATE INDEX IF NOT EXISTS idx_media_cache_platform ON media_cache(platform);

        PRAGMA user_version = 1;
        ",
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_init() {
        let conn = Connection::open_in_memory().unwrap();
        init(&conn).unwrap();

        let count: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='media_cache'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);

        let version: i32 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_schema_indexes_platform() {
        let conn = Connection::open_in_memory().unwrap();
        init(&conn).unwrap();

        let table: String = conn
            .query_row(
                "SELECT tbl_name FROM sqlite_master WHERE type='index' AND name='idx_media_cache_platform'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(table, "media_cache");
    }

    #[test]
    fn test_schema_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init(&conn).unwrap();
        init(&conn).unwrap();
    }
}
