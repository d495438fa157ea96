//! Shard container storage
//!
//! The ingestion core only sees the [`ShardStore`] / [`ShardTable`] contract:
//! open or create a container, grow it, fill slots, persist it. Persisting
//! always writes a new file next to the target and renames it into place,
//! so a failure at any point leaves the previous shard file untouched.
//!
//! [`ParquetStore`] is the production implementation: one Parquet file per
//! shard, ZSTD compressed, with chunk-level column statistics.

use crate::error::{ShardError, ShardResult};
use crate::record::{CatalogSchema, FieldType, FieldValue, Record};
use arrow::array::{
    Array, ArrayRef, AsArray, BooleanArray, Float64Array, Int64Array, StringArray,
};
use arrow::datatypes::{DataType, Field, Float64Type, Int64Type, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::{EnabledStatistics, WriterProperties};
use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;

/// Prefix of in-flight shard files (swept when stale)
pub const TEMP_PREFIX: &str = ".shard-";

/// Suffix of in-flight shard files
pub const TEMP_SUFFIX: &str = ".tmp";

/// An in-memory, mutable view of one shard
pub trait ShardTable {
    /// Schema the table was opened or created with
    fn schema(&self) -> &CatalogSchema;

    /// Current row count
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append `n` unset rows
    fn extend_by(&mut self, n: usize);

    /// Fill one slot
    fn set_field(&mut self, row: usize, field: usize, value: FieldValue) -> ShardResult<()>;

    /// Write the table to `path`, replacing any existing file atomically.
    /// Returns the size of the written file.
    fn persist(&self, path: &Path) -> ShardResult<u64>;

    /// Materialize all rows (unset slots read as null)
    fn read_rows(&self) -> Vec<Record>;
}

/// Factory for shard tables of one on-disk format
pub trait ShardStore: Send + Sync {
    /// Format name recorded in the catalog manifest
    fn name(&self) -> &'static str;

    /// Shard file extension (without dot)
    fn extension(&self) -> &'static str;

    /// Load an existing shard; `Ok(None)` when the file does not exist
    fn open(&self, path: &Path, schema: &CatalogSchema)
        -> ShardResult<Option<Box<dyn ShardTable>>>;

    /// Start an empty shard
    fn create(&self, schema: &CatalogSchema) -> Box<dyn ShardTable>;
}

/// Build the Arrow schema for a catalog schema
pub fn arrow_schema(schema: &CatalogSchema) -> Schema {
    Schema::new(
        schema
            .fields()
            .iter()
            .map(|f| Field::new(&f.name, data_type(f.field_type), f.nullable))
            .collect::<Vec<_>>(),
    )
}

fn data_type(field_type: FieldType) -> DataType {
    match field_type {
        FieldType::Int64 => DataType::Int64,
        FieldType::Float64 => DataType::Float64,
        FieldType::Boolean => DataType::Boolean,
        FieldType::Utf8 => DataType::Utf8,
    }
}

/// Parquet-backed shard store
#[derive(Debug, Clone)]
pub struct ParquetStore {
    compression: Compression,
}

impl Default for ParquetStore {
    fn default() -> Self {
        Self {
            compression: Compression::ZSTD(ZstdLevel::default()),
        }
    }
}

impl ParquetStore {
    /// Store with an explicit ZSTD level (1-22)
    pub fn with_compression_level(level: i32) -> ShardResult<Self> {
        Ok(Self {
            compression: Compression::ZSTD(ZstdLevel::try_new(level)?),
        })
    }

    fn writer_properties(&self) -> WriterProperties {
        WriterProperties::builder()
            .set_compression(self.compression)
            .set_statistics_enabled(EnabledStatistics::Chunk)
            .set_max_row_group_size(1_000_000)
            .build()
    }
}

impl ShardStore for ParquetStore {
    fn name(&self) -> &'static str {
        "parquet"
    }

    fn extension(&self) -> &'static str {
        "parquet"
    }

    fn open(
        &self,
        path: &Path,
        schema: &CatalogSchema,
    ) -> ShardResult<Option<Box<dyn ShardTable>>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ShardError::io(path, e)),
        };

        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
        let expected = Arc::new(arrow_schema(schema));
        check_schema(path, &expected, builder.schema())?;

        let mut table = ParquetTable::new(schema.clone(), expected, self.writer_properties());
        for batch in builder.build()? {
            table.load_batch(path, &batch?)?;
        }

        Ok(Some(Box::new(table)))
    }

    fn create(&self, schema: &CatalogSchema) -> Box<dyn ShardTable> {
        let arrow = Arc::new(arrow_schema(schema));
        Box::new(ParquetTable::new(
            schema.clone(),
            arrow,
            self.writer_properties(),
        ))
    }
}

fn check_schema(path: &Path, expected: &SchemaRef, found: &SchemaRef) -> ShardResult<()> {
    let same = expected.fields().len() == found.fields().len()
        && expected.fields().iter().zip(found.fields().iter()).all(|(a, b)| {
            a.name() == b.name()
                && a.data_type() == b.data_type()
                && a.is_nullable() == b.is_nullable()
        });

    if same {
        return Ok(());
    }

    let describe = |s: &SchemaRef| {
        s.fields()
            .iter()
            .map(|f| {
                format!(
                    "{}:{}{}",
                    f.name(),
                    f.data_type(),
                    if f.is_nullable() { "?" } else { "" }
                )
            })
            .collect::<Vec<_>>()
            .join(", ")
    };

    Err(ShardError::SchemaMismatch {
        path: path.to_path_buf(),
        expected: describe(expected),
        found: describe(found),
    })
}

/// Column buffer; `None` is null or not yet set
#[derive(Debug, Clone)]
enum Column {
    Int64(Vec<Option<i64>>),
    Float64(Vec<Option<f64>>),
    Boolean(Vec<Option<bool>>),
    Utf8(Vec<Option<String>>),
}

impl Column {
    fn new(field_type: FieldType) -> Self {
        match field_type {
            FieldType::Int64 => Column::Int64(Vec::new()),
            FieldType::Float64 => Column::Float64(Vec::new()),
            FieldType::Boolean => Column::Boolean(Vec::new()),
            FieldType::Utf8 => Column::Utf8(Vec::new()),
        }
    }

    fn extend_by(&mut self, n: usize) {
        match self {
            Column::Int64(v) => v.resize(v.len() + n, None),
            Column::Float64(v) => v.resize(v.len() + n, None),
            Column::Boolean(v) => v.resize(v.len() + n, None),
            Column::Utf8(v) => v.resize(v.len() + n, None),
        }
    }

    fn value(&self, row: usize) -> FieldValue {
        let value = match self {
            Column::Int64(v) => v[row].map(FieldValue::Int64),
            Column::Float64(v) => v[row].map(FieldValue::Float64),
            Column::Boolean(v) => v[row].map(FieldValue::Boolean),
            Column::Utf8(v) => v[row].clone().map(FieldValue::Utf8),
        };
        value.unwrap_or(FieldValue::Null)
    }

    fn to_array(&self) -> ArrayRef {
        match self {
            Column::Int64(v) => Arc::new(Int64Array::from(v.clone())),
            Column::Float64(v) => Arc::new(Float64Array::from(v.clone())),
            Column::Boolean(v) => Arc::new(BooleanArray::from(v.clone())),
            Column::Utf8(v) => Arc::new(StringArray::from(
                v.iter().map(|s| s.as_deref()).collect::<Vec<_>>(),
            )),
        }
    }

    /// Append the values of a decoded array. Returns false on type mismatch.
    fn load(&mut self, array: &ArrayRef) -> bool {
        match self {
            Column::Int64(v) => match array.as_primitive_opt::<Int64Type>() {
                Some(a) => v.extend(a.iter()),
                None => return false,
            },
            Column::Float64(v) => match array.as_primitive_opt::<Float64Type>() {
                Some(a) => v.extend(a.iter()),
                None => return false,
            },
            Column::Boolean(v) => match array.as_boolean_opt() {
                Some(a) => v.extend(a.iter()),
                None => return false,
            },
            Column::Utf8(v) => match array.as_string_opt::<i32>() {
                Some(a) => v.extend(a.iter().map(|s| s.map(str::to_string))),
                None => return false,
            },
        }
        true
    }
}

/// In-memory Parquet shard
struct ParquetTable {
    schema: CatalogSchema,
    arrow: SchemaRef,
    props: WriterProperties,
    columns: Vec<Column>,
    len: usize,
}

impl ParquetTable {
    fn new(schema: CatalogSchema, arrow: SchemaRef, props: WriterProperties) -> Self {
        let columns = schema
            .fields()
            .iter()
            .map(|f| Column::new(f.field_type))
            .collect();

        Self {
            schema,
            arrow,
            props,
            columns,
            len: 0,
        }
    }

    fn load_batch(&mut self, path: &Path, batch: &RecordBatch) -> ShardResult<()> {
        for (column, array) in self.columns.iter_mut().zip(batch.columns()) {
            if !column.load(array) {
                return Err(ShardError::SchemaMismatch {
                    path: path.to_path_buf(),
                    expected: self.schema.describe(),
                    found: format!("column of type {}", array.data_type()),
                });
            }
        }
        self.len += batch.num_rows();
        Ok(())
    }

    fn to_batch(&self) -> ShardResult<RecordBatch> {
        let arrays = self.columns.iter().map(Column::to_array).collect();
        Ok(RecordBatch::try_new(self.arrow.clone(), arrays)?)
    }
}

impl ShardTable for ParquetTable {
    fn schema(&self) -> &CatalogSchema {
        &self.schema
    }

    fn len(&self) -> usize {
        self.len
    }

    fn extend_by(&mut self, n: usize) {
        for column in &mut self.columns {
            column.extend_by(n);
        }
        self.len += n;
    }

    fn set_field(&mut self, row: usize, field: usize, value: FieldValue) -> ShardResult<()> {
        if row >= self.len {
            return Err(ShardError::RowOutOfBounds { row, len: self.len });
        }
        let def = self
            .schema
            .fields()
            .get(field)
            .ok_or(ShardError::FieldOutOfBounds {
                field,
                len: self.schema.len(),
            })?;

        let mismatch = |found: &'static str| ShardError::TypeMismatch {
            field: def.name.clone(),
            expected: def.field_type.name(),
            found,
        };

        match (&mut self.columns[field], value) {
            (_, FieldValue::Null) if !def.nullable => return Err(mismatch("null")),
            (Column::Int64(v), FieldValue::Null) => v[row] = None,
            (Column::Float64(v), FieldValue::Null) => v[row] = None,
            (Column::Boolean(v), FieldValue::Null) => v[row] = None,
            (Column::Utf8(v), FieldValue::Null) => v[row] = None,
            (Column::Int64(v), FieldValue::Int64(x)) => v[row] = Some(x),
            (Column::Float64(v), FieldValue::Float64(x)) => v[row] = Some(x),
            (Column::Boolean(v), FieldValue::Boolean(x)) => v[row] = Some(x),
            (Column::Utf8(v), FieldValue::Utf8(x)) => v[row] = Some(x),
            (_, other) => return Err(mismatch(other.type_name())),
        }

        Ok(())
    }

    fn persist(&self, path: &Path) -> ShardResult<u64> {
        let batch = self.to_batch()?;
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(TEMP_SUFFIX)
            .tempfile_in(dir)
            .map_err(|e| ShardError::io(dir, e))?;

        {
            let mut writer =
                ArrowWriter::try_new(temp.as_file_mut(), self.arrow.clone(), Some(self.props.clone()))?;
            writer.write(&batch)?;
            writer.close()?;
        }

        let file = temp.as_file();
        file.sync_all().map_err(|e| ShardError::io(temp.path(), e))?;
        let bytes = file
            .metadata()
            .map_err(|e| ShardError::io(temp.path(), e))?
            .len();

        temp.persist(path)
            .map_err(|e| ShardError::io(path, e.error))?;

        // Make the rename durable
        if let Ok(d) = File::open(dir) {
            let _ = d.sync_all();
        }

        Ok(bytes)
    }

    fn read_rows(&self) -> Vec<Record> {
        (0..self.len)
            .map(|row| Record::new(self.columns.iter().map(|c| c.value(row)).collect()))
            .collect()
    }
}
