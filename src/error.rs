//! Error types for skyshard
//!
//! This module defines the error hierarchy for the ingestion pipeline:
//! - Spatial index errors (bad coordinates, unknown shard ids)
//! - Row source errors (unreadable or malformed input files)
//! - Shard storage and locking errors
//! - Ledger (SQLite) errors
//! - Configuration and worker errors
//!
//! Errors are grouped by the scope they affect. Row-scoped errors are
//! counted and skipped, file-scoped errors fail one job, shard-scoped errors
//! fail one append call, and configuration errors abort the run before any
//! worker starts.

use crate::index::ShardId;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for skyshard
#[derive(Error, Debug)]
pub enum IngestError {
    /// Configuration errors (always fatal)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Spatial index errors
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    /// Input file errors
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Shard storage errors
    #[error("Shard error: {0}")]
    Shard(#[from] ShardError),

    /// Run ledger errors
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Worker/concurrency errors
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    /// I/O errors outside of shard and source handling
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Interrupted by signal
    #[error("Operation interrupted by signal")]
    Interrupted,
}

/// Spatial index errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IndexError {
    /// Coordinate outside the valid sky range
    #[error("Invalid coordinate (ra={ra}, dec={dec}): {reason}")]
    InvalidCoordinate { ra: f64, dec: f64, reason: String },

    /// Index depth not supported by the strategy
    #[error("Index depth {depth} is not supported: must be between 0 and {max}")]
    DepthOutOfRange { depth: u8, max: u8 },

    /// Shard id outside the universe of the configured indexer
    #[error("Shard {id} is not a valid {indexer} cell at depth {depth}")]
    UnknownShard {
        id: ShardId,
        indexer: &'static str,
        depth: u8,
    },
}

/// Row source errors
#[derive(Error, Debug, Clone)]
pub enum SourceError {
    /// The file could not be opened at all
    #[error("Failed to open '{path}': {reason}")]
    Open { path: PathBuf, reason: String },

    /// Read failure part way through the file
    #[error("I/O error reading '{path}': {reason}")]
    Io { path: PathBuf, reason: String },

    /// The file is readable but not in the expected format
    #[error("Format error in '{path}': {reason}")]
    Format { path: PathBuf, reason: String },

    /// A single row could not be decoded
    #[error("Malformed row {row} in '{path}': {reason}")]
    MalformedRow {
        path: PathBuf,
        row: u64,
        reason: String,
    },

    /// No reader registered for this file
    #[error("No row source available for '{path}'")]
    UnknownFormat { path: PathBuf },
}

impl SourceError {
    /// Check if this error only affects one row (the file can continue)
    pub fn is_row_scoped(&self) -> bool {
        matches!(self, SourceError::MalformedRow { .. })
    }
}

/// Shard storage and locking errors
#[derive(Error, Debug)]
pub enum ShardError {
    /// Lock acquisition failed
    #[error("Failed to lock shard {shard} ('{path}'): {reason}")]
    Lock {
        shard: ShardId,
        path: PathBuf,
        reason: String,
    },

    /// Shard id has no slot in the lock table
    #[error("Shard {shard} is outside the lock table universe")]
    OutOfUniverse { shard: ShardId },

    /// File system error on a shard file
    #[error("I/O error on shard file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Arrow error while building or reading record batches
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error while encoding or decoding a shard
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Existing shard was written with a different schema
    #[error("Schema mismatch in '{path}': expected [{expected}], found [{found}]")]
    SchemaMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    /// Value type does not match the column type
    #[error("Field '{field}' expects {expected}, got {found}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        found: &'static str,
    },

    /// Row index past the end of the container
    #[error("Row {row} out of bounds (shard has {len} rows)")]
    RowOutOfBounds { row: usize, len: usize },

    /// Field index past the end of the schema
    #[error("Field {field} out of bounds (schema has {len} fields)")]
    FieldOutOfBounds { field: usize, len: usize },

    /// Record width does not match the schema
    #[error("Record has {found} values, schema has {expected} fields")]
    RecordWidth { expected: usize, found: usize },
}

impl ShardError {
    /// Check if this error came from the locking layer rather than storage
    pub fn is_lock_failure(&self) -> bool {
        matches!(
            self,
            ShardError::Lock { .. } | ShardError::OutOfUniverse { .. }
        )
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ShardError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Run ledger errors
#[derive(Error, Debug)]
pub enum LedgerError {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to create or open the ledger database
    #[error("Failed to open ledger at '{path}': {reason}")]
    OpenFailed { path: PathBuf, reason: String },

    /// Unknown status string stored in the ledger
    #[error("Unknown ledger status '{0}'")]
    InvalidStatus(String),
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid worker count
    #[error("Invalid worker count {count}: must be between 1 and {max}")]
    InvalidWorkerCount { count: usize, max: usize },

    /// Index depth not representable
    #[error("Invalid index depth {depth}: must be between 0 and {max}")]
    InvalidDepth { depth: u8, max: u8 },

    /// No indexer registered under this name
    #[error("Unknown indexer '{name}' (available: {available})")]
    UnknownIndexer { name: String, available: String },

    /// No row source registered under this name
    #[error("Unknown input format '{name}' (available: {available})")]
    UnknownFormat { name: String, available: String },

    /// Bad KEY=VALUE field mapping argument
    #[error("Invalid field mapping '{arg}': {reason}")]
    InvalidMapping { arg: String, reason: String },

    /// Two mapped fields produce the same output column
    #[error("Duplicate output field '{name}'")]
    DuplicateField { name: String },

    /// Invalid exclude pattern
    #[error("Invalid exclude pattern '{pattern}': {reason}")]
    InvalidExcludePattern { pattern: String, reason: String },

    /// Invalid CSV delimiter
    #[error("Invalid delimiter '{0}': must be a single ASCII character")]
    InvalidDelimiter(String),

    /// Output root cannot be used
    #[error("Invalid output root '{path}': {reason}")]
    InvalidOutputRoot { path: PathBuf, reason: String },

    /// Existing catalog at the output root was built with other settings
    #[error("Incompatible catalog at '{path}': {reason}")]
    IncompatibleCatalog { path: PathBuf, reason: String },

    /// An input path does not exist
    #[error("Input path '{0}' does not exist")]
    MissingInput(PathBuf),

    /// Nothing to ingest
    #[error("No input files found")]
    NoInputs,
}

/// Worker thread errors
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Worker panicked outside of a job
    #[error("Worker {id} panicked: {message}")]
    Panicked { id: usize, message: String },

    /// Job queue send failed
    #[error("Failed to queue job: channel closed")]
    QueueSendFailed,

    /// Result channel closed before all jobs reported
    #[error("Result channel closed unexpectedly")]
    ResultChannelClosed,

    /// Worker thread could not be spawned
    #[error("Failed to initialize worker {id}: {reason}")]
    InitFailed { id: usize, reason: String },
}

/// Result type alias for IngestError
pub type Result<T> = std::result::Result<T, IngestError>;

/// Result type alias for ShardError
pub type ShardResult<T> = std::result::Result<T, ShardError>;

/// Result type alias for SourceError
pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// Result type alias for LedgerError
pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_error_scope() {
        let malformed = SourceError::MalformedRow {
            path: "a.csv".into(),
            row: 3,
            reason: "bad quoting".into(),
        };
        assert!(malformed.is_row_scoped());

        let open = SourceError::Open {
            path: "a.csv".into(),
            reason: "not found".into(),
        };
        assert!(!open.is_row_scoped());
    }

    #[test]
    fn test_shard_error_lock_classification() {
        let lock = ShardError::Lock {
            shard: ShardId(42),
            path: "locks/42.lock".into(),
            reason: "EIO".into(),
        };
        assert!(lock.is_lock_failure());

        let width = ShardError::RecordWidth {
            expected: 3,
            found: 2,
        };
        assert!(!width.is_lock_failure());
    }

    #[test]
    fn test_error_conversion() {
        let err = ConfigError::NoInputs;
        let top: IngestError = err.into();
        assert!(matches!(top, IngestError::Config(ConfigError::NoInputs)));
    }
}
