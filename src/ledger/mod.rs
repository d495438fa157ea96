//! Run ledger
//!
//! Appends are not idempotent: re-ingesting a file whose rows already
//! reached some shard duplicates them. The ledger records, per input file,
//! whether any of its rows may have been written, so a later run can skip
//! finished files, retry files that never wrote anything, and hold back
//! files that stopped part way for an operator to look at.
//!
//! The ledger is a SQLite database inside the catalog root. It is shared by
//! all workers of a run (behind a mutex) and by concurrent processes (WAL
//! mode plus a busy timeout).

pub mod schema;

use crate::error::{LedgerError, LedgerResult};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// How long a writer waits for another process's transaction
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Recorded outcome of one input file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerStatus {
    /// Shard writes started and have not been finalized
    Running,
    /// Every row group was written
    Done,
    /// The job failed
    Failed,
    /// Some row groups were written, others were not
    Partial,
    /// The run was cancelled before this file finished
    Cancelled,
}

impl LedgerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LedgerStatus::Running => "running",
            LedgerStatus::Done => "done",
            LedgerStatus::Failed => "failed",
            LedgerStatus::Partial => "partial",
            LedgerStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LedgerStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(LedgerStatus::Running),
            "done" => Ok(LedgerStatus::Done),
            "failed" => Ok(LedgerStatus::Failed),
            "partial" => Ok(LedgerStatus::Partial),
            "cancelled" => Ok(LedgerStatus::Cancelled),
            other => Err(LedgerError::InvalidStatus(other.to_string())),
        }
    }
}

/// One ledger row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub path: String,
    pub status: LedgerStatus,
    pub rows_written: u64,
    pub shards_written: u64,
    pub error: Option<String>,
    pub updated_at: String,
}

impl LedgerEntry {
    /// Whether re-ingesting this file could duplicate rows
    pub fn needs_attention(&self) -> bool {
        match self.status {
            LedgerStatus::Running | LedgerStatus::Partial => true,
            LedgerStatus::Failed | LedgerStatus::Cancelled => self.rows_written > 0,
            LedgerStatus::Done => false,
        }
    }
}

/// What to do with an input file given its history
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Never seen, or a previous attempt wrote nothing
    Process,
    /// Already fully ingested
    SkipDone(LedgerEntry),
    /// A previous attempt may have written rows
    NeedsAttention(LedgerEntry),
}

/// Per-file ingest history of one catalog
pub struct Ledger {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl Ledger {
    /// Open (or create) the ledger database
    pub fn open(path: &Path) -> LedgerResult<Self> {
        let conn = Connection::open(path).map_err(|e| LedgerError::OpenFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        schema::create_ledger(&conn)?;

        debug!(path = %path.display(), "Ledger opened");

        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
        })
    }

    /// Throwaway ledger for tests and dry runs
    pub fn open_in_memory() -> LedgerResult<Self> {
        let conn = Connection::open_in_memory()?;
        schema::create_ledger(&conn)?;
        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// History of one input file
    pub fn entry(&self, file: &Path) -> LedgerResult<Option<LedgerEntry>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT path, status, rows_written, shards_written, error, updated_at
                 FROM ingest_files WHERE path = ?1",
                [key(file)],
                read_row,
            )
            .optional()?;

        row.map(into_entry).transpose()
    }

    /// Decide whether to ingest a file
    pub fn decide(&self, file: &Path) -> LedgerResult<Decision> {
        Ok(match self.entry(file)? {
            None => Decision::Process,
            Some(e) if e.status == LedgerStatus::Done => Decision::SkipDone(e),
            Some(e) if e.needs_attention() => Decision::NeedsAttention(e),
            Some(_) => Decision::Process,
        })
    }

    /// Record that shard writes for a file are about to start
    pub fn mark_running(&self, file: &Path) -> LedgerResult<()> {
        self.record(file, LedgerStatus::Running, 0, 0, None)
    }

    /// Record the final outcome of a file
    pub fn finish(
        &self,
        file: &Path,
        status: LedgerStatus,
        rows_written: u64,
        shards_written: u64,
        error: Option<&str>,
    ) -> LedgerResult<()> {
        self.record(file, status, rows_written, shards_written, error)
    }

    fn record(
        &self,
        file: &Path,
        status: LedgerStatus,
        rows_written: u64,
        shards_written: u64,
        error: Option<&str>,
    ) -> LedgerResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO ingest_files
                (path, status, rows_written, shards_written, error, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                key(file),
                status.as_str(),
                rows_written as i64,
                shards_written as i64,
                error,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// All entries, or only those needing attention, ordered by path
    pub fn entries(&self, attention_only: bool) -> LedgerResult<Vec<LedgerEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT path, status, rows_written, shards_written, error, updated_at
             FROM ingest_files ORDER BY path",
        )?;

        let mut entries = Vec::new();
        for row in stmt.query_map([], read_row)? {
            let entry = into_entry(row?)?;
            if !attention_only || entry.needs_attention() {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Store run metadata
    pub fn set_run_info(&self, key: &str, value: &str) -> LedgerResult<()> {
        schema::set_run_info(&self.conn.lock(), key, value)
    }

    /// Get run metadata
    pub fn run_info(&self, key: &str) -> LedgerResult<Option<String>> {
        schema::get_run_info(&self.conn.lock(), key)
    }
}

type RawEntry = (String, String, i64, i64, Option<String>, String);

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEntry> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn into_entry(raw: RawEntry) -> LedgerResult<LedgerEntry> {
    let (path, status, rows_written, shards_written, error, updated_at) = raw;
    Ok(LedgerEntry {
        path,
        status: status.parse()?,
        rows_written: rows_written.max(0) as u64,
        shards_written: shards_written.max(0) as u64,
        error,
        updated_at,
    })
}

fn key(file: &Path) -> String {
    file.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_unknown_file_is_processed() {
        let ledger = Ledger::open_in_memory().unwrap();
        assert_eq!(ledger.decide(Path::new("/in/a.csv")).unwrap(), Decision::Process);
    }

    #[test]
    fn test_done_is_skipped() {
        let ledger = Ledger::open_in_memory().unwrap();
        let file = Path::new("/in/a.csv");
        ledger.mark_running(file).unwrap();
        ledger.finish(file, LedgerStatus::Done, 10, 2, None).unwrap();
        match ledger.decide(file).unwrap() {
            Decision::SkipDone(entry) => assert_eq!(entry.rows_written, 10),
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn test_interrupted_run_needs_attention() {
        let ledger = Ledger::open_in_memory().unwrap();
        let file = Path::new("/in/a.csv");
        ledger.mark_running(file).unwrap();

        match ledger.decide(file).unwrap() {
            Decision::NeedsAttention(entry) => assert_eq!(entry.status, LedgerStatus::Running),
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn test_failure_without_writes_is_retried() {
        let ledger = Ledger::open_in_memory().unwrap();
        let file = Path::new("/in/a.csv");
        ledger
            .finish(file, LedgerStatus::Failed, 0, 0, Some("unreadable"))
            .unwrap();
        assert_eq!(ledger.decide(file).unwrap(), Decision::Process);

        ledger
            .finish(file, LedgerStatus::Failed, 5, 1, Some("disk full"))
            .unwrap();
        assert!(matches!(
            ledger.decide(file).unwrap(),
            Decision::NeedsAttention(_)
        ));
    }

    #[test]
    fn test_entries_filter_and_persistence() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("ingest.db");

        {
            let ledger = Ledger::open(&db).unwrap();
            ledger.finish(Path::new("/in/a.csv"), LedgerStatus::Done, 3, 1, None).unwrap();
            ledger
                .finish(Path::new("/in/b.csv"), LedgerStatus::Partial, 2, 1, Some("shard 9"))
                .unwrap();
            ledger
                .finish(Path::new("/in/c.csv"), LedgerStatus::Cancelled, 0, 0, None)
                .unwrap();
        }

        let ledger = Ledger::open(&db).unwrap();
        assert_eq!(ledger.entries(false).unwrap().len(), 3);

        let attention = ledger.entries(true).unwrap();
        assert_eq!(attention.len(), 1);
        assert_eq!(attention[0].path, "/in/b.csv");
        assert_eq!(attention[0].error.as_deref(), Some("shard 9"));
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("partial".parse::<LedgerStatus>().unwrap(), LedgerStatus::Partial);
        assert!(matches!(
            "bogus".parse::<LedgerStatus>(),
            Err(LedgerError::InvalidStatus(_))
        ));
    }
}
