//! Parquet row source
//!
//! Streams record batches and renders each cell with arrow's display
//! formatter, so numeric columns reach the converter as text exactly like
//! CSV input does.

use super::{RawRow, RowSource, RowStream};
use crate::error::{SourceError, SourceResult};
use arrow::array::Array;
use arrow::record_batch::RecordBatch;
use arrow::util::display::array_value_to_string;
use std::fs::File;
use std::path::{Path, PathBuf};

const DEFAULT_BATCH_SIZE: usize = 8192;

/// Parquet file reader
#[derive(Debug, Clone)]
pub struct ParquetSource {
    batch_size: usize,
}

impl Default for ParquetSource {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl RowSource for ParquetSource {
    fn name(&self) -> &'static str {
        "parquet"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["parquet", "pq"]
    }

    fn open(&self, path: &Path) -> SourceResult<Box<dyn RowStream>> {
        let file = File::open(path).map_err(|e| SourceError::Open {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let format_err = |reason: String| SourceError::Format {
            path: path.to_path_buf(),
            reason,
        };

        let builder =
            ::parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder::try_new(file)
                .map_err(|e| format_err(e.to_string()))?;

        let columns = builder
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();

        let reader = builder
            .with_batch_size(self.batch_size)
            .build()
            .map_err(|e| format_err(e.to_string()))?;

        Ok(Box::new(ParquetRowStream {
            path: path.to_path_buf(),
            columns,
            reader,
            batch: None,
            offset: 0,
            row: 0,
            done: false,
        }))
    }
}

struct ParquetRowStream {
    path: PathBuf,
    columns: Vec<String>,
    reader: ::parquet::arrow::arrow_reader::ParquetRecordBatchReader,
    batch: Option<RecordBatch>,
    offset: usize,
    row: u64,
    done: bool,
}

impl ParquetRowStream {
    fn render(&self, batch: &RecordBatch, index: usize) -> SourceResult<RawRow> {
        let mut values = Vec::with_capacity(batch.num_columns());
        for column in batch.columns() {
            if column.is_null(index) {
                values.push(None);
                continue;
            }
            let text = array_value_to_string(column, index).map_err(|e| {
                SourceError::MalformedRow {
                    path: self.path.clone(),
                    row: self.row,
                    reason: e.to_string(),
                }
            })?;
            values.push(Some(text));
        }
        Ok(RawRow::new(self.row, values))
    }
}

impl Iterator for ParquetRowStream {
    type Item = SourceResult<RawRow>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }

            if let Some(batch) = self.batch.take() {
                if self.offset < batch.num_rows() {
                    let index = self.offset;
                    self.offset += 1;
                    self.row += 1;
                    let row = self.render(&batch, index);
                    self.batch = Some(batch);
                    return Some(row);
                }
            }

            match self.reader.next() {
                Some(Ok(batch)) => {
                    self.batch = Some(batch);
                    self.offset = 0;
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(SourceError::Io {
                        path: self.path.clone(),
                        reason: e.to_string(),
                    }));
                }
                None => {
                    self.done = true;
                    return None;
                }
            }
        }
    }
}

impl RowStream for ParquetRowStream {
    fn columns(&self) -> &[String] {
        &self.columns
    }
}
