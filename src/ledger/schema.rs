//! Ledger schema definitions and creation

use crate::error::LedgerResult;
use rusqlite::Connection;

/// Current schema version for migrations
pub const SCHEMA_VERSION: u32 = 1;

/// One row per input file ever attempted against this catalog
const CREATE_FILES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS ingest_files (
    path TEXT PRIMARY KEY,
    status TEXT NOT NULL,          -- running, done, failed, partial, cancelled
    rows_written INTEGER NOT NULL DEFAULT 0,
    shards_written INTEGER NOT NULL DEFAULT 0,
    error TEXT,
    updated_at TEXT NOT NULL       -- RFC 3339
)
"#;

/// Run metadata (key/value)
const CREATE_RUN_INFO_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS run_info (
    key TEXT PRIMARY KEY,
    value TEXT
)
"#;

const CREATE_INDEXES: &[&str] =
    &["CREATE INDEX IF NOT EXISTS idx_ingest_files_status ON ingest_files(status)"];

/// Several processes may share one catalog, so keep the default locking
/// mode and wait on busy instead of failing.
const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;
PRAGMA busy_timeout = 30000;
"#;

/// Configure the connection and create tables if needed
pub fn create_ledger(conn: &Connection) -> LedgerResult<()> {
    conn.execute_batch(PRAGMAS)?;

    conn.execute(CREATE_FILES_TABLE, [])?;
    conn.execute(CREATE_RUN_INFO_TABLE, [])?;
    for sql in CREATE_INDEXES {
        conn.execute(sql, [])?;
    }

    set_run_info(conn, "schema_version", &SCHEMA_VERSION.to_string())?;
    Ok(())
}

/// Store run metadata
pub fn set_run_info(conn: &Connection, key: &str, value: &str) -> LedgerResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO run_info (key, value) VALUES (?1, ?2)",
        [key, value],
    )?;
    Ok(())
}

/// Get run metadata
pub fn get_run_info(conn: &Connection, key: &str) -> LedgerResult<Option<String>> {
    let result = conn.query_row(
        "SELECT value FROM run_info WHERE key = ?1",
        [key],
        |row| row.get(0),
    );

    match result {
        Ok(value) => Ok(Some(value)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_ledger() {
        let conn = Connection::open_in_memory().unwrap();
        create_ledger(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert!(tables.contains(&"ingest_files".to_string()));
        assert!(tables.contains(&"run_info".to_string()));
    }

    #[test]
    fn test_run_info_roundtrip() {
        let conn = Connection::open_in_memory().unwrap();
        create_ledger(&conn).unwrap();

        set_run_info(&conn, "last_run", "2024-01-01T00:00:00Z").unwrap();
        assert_eq!(
            get_run_info(&conn, "last_run").unwrap().as_deref(),
            Some("2024-01-01T00:00:00Z")
        );
        assert_eq!(get_run_info(&conn, "missing").unwrap(), None);
        assert_eq!(
            get_run_info(&conn, "schema_version").unwrap().as_deref(),
            Some("1")
        );
    }
}
