//! Delimited text row source
//!
//! Reads CSV/TSV files with a header row. Ragged rows and invalid UTF-8 are
//! reported per row; read failures end the stream.

use super::{RawRow, RowSource, RowStream};
use crate::error::{SourceError, SourceResult};
use std::fs::File;
use std::path::{Path, PathBuf};

/// Delimited text reader
#[derive(Debug, Clone)]
pub struct CsvSource {
    name: &'static str,
    delimiter: u8,
    extensions: &'static [&'static str],
}

impl Default for CsvSource {
    fn default() -> Self {
        Self {
            name: "csv",
            delimiter: b',',
            extensions: &["csv", "txt"],
        }
    }
}

impl CsvSource {
    /// Comma-separated reader with a custom delimiter
    pub fn with_delimiter(delimiter: u8) -> Self {
        Self {
            delimiter,
            ..Self::default()
        }
    }

    /// Tab-separated reader
    pub fn tsv() -> Self {
        Self {
            name: "tsv",
            delimiter: b'\t',
            extensions: &["tsv", "tab"],
        }
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }
}

impl RowSource for CsvSource {
    fn name(&self) -> &'static str {
        self.name
    }

    fn extensions(&self) -> &'static [&'static str] {
        self.extensions
    }

    fn open(&self, path: &Path) -> SourceResult<Box<dyn RowStream>> {
        let file = File::open(path).map_err(|e| SourceError::Open {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut reader = ::csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(true)
            .flexible(false)
            .from_reader(file);

        let columns = reader
            .headers()
            .map_err(|e| SourceError::Format {
                path: path.to_path_buf(),
                reason: format!("unreadable header: {}", e),
            })?
            .iter()
            .map(|h| h.trim().to_string())
            .collect::<Vec<_>>();

        if columns.is_empty() || columns.iter().all(String::is_empty) {
            return Err(SourceError::Format {
                path: path.to_path_buf(),
                reason: "missing header row".into(),
            });
        }

        Ok(Box::new(CsvRowStream {
            path: path.to_path_buf(),
            columns,
            records: reader.into_records(),
            row: 0,
            done: false,
        }))
    }
}

struct CsvRowStream {
    path: PathBuf,
    columns: Vec<String>,
    records: ::csv::StringRecordsIntoIter<File>,
    row: u64,
    done: bool,
}

impl Iterator for CsvRowStream {
    type Item = SourceResult<RawRow>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let result = match self.records.next() {
            Some(result) => result,
            None => {
                self.done = true;
                return None;
            }
        };

        self.row += 1;

        match result {
            Ok(record) => {
                let values = record
                    .iter()
                    .map(|v| (!v.is_empty()).then(|| v.to_string()))
                    .collect();
                Some(Ok(RawRow::new(self.row, values)))
            }
            Err(e) => match e.kind() {
                ::csv::ErrorKind::Io(io) => {
                    self.done = true;
                    Some(Err(SourceError::Io {
                        path: self.path.clone(),
                        reason: io.to_string(),
                    }))
                }
                _ => Some(Err(SourceError::MalformedRow {
                    path: self.path.clone(),
                    row: self.row,
                    reason: e.to_string(),
                })),
            },
        }
    }
}

impl RowStream for CsvRowStream {
    fn columns(&self) -> &[String] {
        &self.columns
    }
}
