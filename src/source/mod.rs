//! Input row sources
//!
//! A row source turns one input file into a lazy, finite stream of raw rows.
//! Values stay as text so conversion behaves the same for every format.
//!
//! Errors are split by scope: [`SourceError::MalformedRow`] affects a single
//! row and the stream continues; every other error ends the file.

pub mod csv;
pub mod parquet;

pub use self::csv::CsvSource;
pub use self::parquet::ParquetSource;

use crate::error::SourceResult;
use std::path::Path;

/// One undecoded input row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    /// 1-based row number within the file (header excluded)
    pub row: u64,

    /// Raw values, positionally aligned with [`RowStream::columns`].
    /// `None` means null or empty.
    pub values: Vec<Option<String>>,
}

impl RawRow {
    pub fn new(row: u64, values: Vec<Option<String>>) -> Self {
        Self { row, values }
    }

    /// Value at `column`, treating missing trailing columns as null
    pub fn get(&self, column: usize) -> Option<&str> {
        self.values
            .get(column)
            .and_then(|v| v.as_deref())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

/// A stream of rows from one open file
pub trait RowStream: Iterator<Item = SourceResult<RawRow>> {
    /// Column names in file order
    fn columns(&self) -> &[String];
}

/// Opens input files of one format
pub trait RowSource: Send + Sync {
    /// Registry name of this format
    fn name(&self) -> &'static str;

    /// File extensions (lowercase, without dot) this source handles
    fn extensions(&self) -> &'static [&'static str];

    /// Open a file for streaming
    fn open(&self, path: &Path) -> SourceResult<Box<dyn RowStream>>;

    /// Check whether this source claims a file by extension
    fn handles(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let e = e.to_ascii_lowercase();
                self.extensions().iter().any(|x| *x == e)
            })
            .unwrap_or(false)
    }
}
