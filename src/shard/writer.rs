//! The append path
//!
//! [`ShardWriter`] is the only code that mutates shard files. Each call to
//! [`ShardWriter::append_rows`] is one transaction under the shard's lock:
//! load (or create), extend, fill, persist by atomic replace, release.

use super::lock::ShardLockTable;
use super::store::ShardStore;
use super::ShardLayout;
use crate::error::{ShardError, ShardResult};
use crate::index::ShardId;
use crate::record::{CatalogSchema, Record};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Append counters shared by all workers
#[derive(Debug, Default)]
pub struct WriterStats {
    /// Successful append calls
    pub appends: AtomicU64,

    /// Rows appended
    pub rows: AtomicU64,

    /// Bytes of shard files written (full file size per persist)
    pub bytes: AtomicU64,

    /// Shards created by this run
    pub created: AtomicU64,

    /// Failed append calls
    pub failures: AtomicU64,
}

impl WriterStats {
    fn record_append(&self, rows: u64, bytes: u64, created: bool) {
        self.appends.fetch_add(1, Ordering::Relaxed);
        self.rows.fetch_add(rows, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
        if created {
            self.created.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rows(&self) -> u64 {
        self.rows.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

/// Appends record groups to shard files
pub struct ShardWriter {
    layout: ShardLayout,
    schema: CatalogSchema,
    store: Arc<dyn ShardStore>,
    locks: Arc<ShardLockTable>,
    stats: WriterStats,
}

impl ShardWriter {
    pub fn new(
        layout: ShardLayout,
        schema: CatalogSchema,
        store: Arc<dyn ShardStore>,
        locks: Arc<ShardLockTable>,
    ) -> Self {
        Self {
            layout,
            schema,
            store,
            locks,
            stats: WriterStats::default(),
        }
    }

    pub fn schema(&self) -> &CatalogSchema {
        &self.schema
    }

    pub fn layout(&self) -> &ShardLayout {
        &self.layout
    }

    pub fn store(&self) -> &dyn ShardStore {
        self.store.as_ref()
    }

    pub fn locks(&self) -> &ShardLockTable {
        &self.locks
    }

    pub fn stats(&self) -> &WriterStats {
        &self.stats
    }

    /// Append `rows` to the end of a shard, in order.
    ///
    /// Either every row lands or the shard file is left exactly as it was.
    /// Returns the number of rows written.
    pub fn append_rows(&self, shard: ShardId, rows: &[Record]) -> ShardResult<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        if let Some(bad) = rows.iter().find(|r| r.len() != self.schema.len()) {
            self.stats.record_failure();
            return Err(ShardError::RecordWidth {
                expected: self.schema.len(),
                found: bad.len(),
            });
        }

        let result = self.append_locked(shard, rows);
        if let Err(e) = &result {
            self.stats.record_failure();
            warn!(shard = %shard, rows = rows.len(), error = %e, "Shard append failed");
        }
        result
    }

    fn append_locked(&self, shard: ShardId, rows: &[Record]) -> ShardResult<usize> {
        let started = Instant::now();
        let _guard = self.locks.acquire(shard)?;

        let path = self.layout.shard_path(shard, self.store.extension());
        let (mut table, created) = match self.store.open(&path, &self.schema)? {
            Some(table) => (table, false),
            None => (self.store.create(&self.schema), true),
        };

        let start = table.len();
        table.extend_by(rows.len());

        for (offset, record) in rows.iter().enumerate() {
            for (field, value) in record.values().iter().enumerate() {
                table.set_field(start + offset, field, value.clone())?;
            }
        }

        let bytes = table.persist(&path)?;
        self.stats.record_append(rows.len() as u64, bytes, created);

        debug!(
            shard = %shard,
            rows = rows.len(),
            total = table.len(),
            created,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Shard appended"
        );

        Ok(rows.len())
    }

    /// Read a shard back (under its lock); empty when the shard does not exist
    pub fn read_shard(&self, shard: ShardId) -> ShardResult<Vec<Record>> {
        let _guard = self.locks.acquire(shard)?;
        let path = self.layout.shard_path(shard, self.store.extension());
        Ok(self
            .store
            .open(&path, &self.schema)?
            .map(|t| t.read_rows())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{FieldMapping, FieldValue};
    use crate::shard::store::{ParquetStore, ShardTable};
    use std::io::Write;
    use std::path::Path;
    use std::sync::atomic::AtomicBool;
    use tempfile::{tempdir, TempDir};

    fn schema() -> CatalogSchema {
        CatalogSchema::from_specs(&FieldMapping::default().field_specs().unwrap())
    }

    fn record(id: i64) -> Record {
        Record::new(vec![
            FieldValue::Int64(id),
            FieldValue::Float64(id as f64 * 0.5),
            FieldValue::Float64(-10.0),
        ])
    }

    fn writer_with(dir: &TempDir, store: Arc<dyn ShardStore>) -> ShardWriter {
        let layout = ShardLayout::new(dir.path());
        layout.prepare().unwrap();
        let locks = Arc::new(ShardLockTable::new(layout.lock_dir(), 0..64).unwrap());
        ShardWriter::new(layout, schema(), store, locks)
    }

    fn ids(rows: &[Record]) -> Vec<i64> {
        rows.iter().filter_map(Record::id).collect()
    }

    #[test]
    fn test_sequential_appends_preserve_order() {
        let dir = tempdir().unwrap();
        let writer = writer_with(&dir, Arc::new(ParquetStore::default()));

        let first: Vec<_> = (0..5).map(record).collect();
        let second: Vec<_> = (100..103).map(record).collect();

        assert_eq!(writer.append_rows(ShardId(9), &first).unwrap(), 5);
        assert_eq!(writer.append_rows(ShardId(9), &second).unwrap(), 3);

        let rows = writer.read_shard(ShardId(9)).unwrap();
        assert_eq!(ids(&rows), vec![0, 1, 2, 3, 4, 100, 101, 102]);
        assert_eq!(writer.stats().rows(), 8);
        assert_eq!(writer.stats().created.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_empty_append_creates_nothing() {
        let dir = tempdir().unwrap();
        let writer = writer_with(&dir, Arc::new(ParquetStore::default()));

        assert_eq!(writer.append_rows(ShardId(3), &[]).unwrap(), 0);
        assert!(!writer.layout().shard_path(ShardId(3), "parquet").exists());
    }

    #[test]
    fn test_wrong_width_rejected_before_locking() {
        let dir = tempdir().unwrap();
        let writer = writer_with(&dir, Arc::new(ParquetStore::default()));

        let bad = Record::new(vec![FieldValue::Int64(1)]);
        assert!(matches!(
            writer.append_rows(ShardId(3), &[bad]),
            Err(ShardError::RecordWidth { expected: 3, found: 1 })
        ));
        assert_eq!(writer.locks().stats().acquisitions(), 0);
    }

    #[test]
    fn test_out_of_universe_shard() {
        let dir = tempdir().unwrap();
        let writer = writer_with(&dir, Arc::new(ParquetStore::default()));
        let err = writer.append_rows(ShardId(64), &[record(1)]).unwrap_err();
        assert!(err.is_lock_failure());
    }

    /// Store whose tables die part way through persist when armed
    struct CrashingStore {
        inner: ParquetStore,
        armed: Arc<AtomicBool>,
    }

    struct CrashingTable {
        inner: Box<dyn ShardTable>,
        armed: Arc<AtomicBool>,
    }

    impl ShardStore for CrashingStore {
        fn name(&self) -> &'static str {
            "crashing"
        }

        fn extension(&self) -> &'static str {
            self.inner.extension()
        }

        fn open(
            &self,
            path: &Path,
            schema: &CatalogSchema,
        ) -> ShardResult<Option<Box<dyn ShardTable>>> {
            Ok(self.inner.open(path, schema)?.map(|inner| {
                Box::new(CrashingTable {
                    inner,
                    armed: Arc::clone(&self.armed),
                }) as Box<dyn ShardTable>
            }))
        }

        fn create(&self, schema: &CatalogSchema) -> Box<dyn ShardTable> {
            Box::new(CrashingTable {
                inner: self.inner.create(schema),
                armed: Arc::clone(&self.armed),
            })
        }
    }

    impl ShardTable for CrashingTable {
        fn schema(&self) -> &CatalogSchema {
            self.inner.schema()
        }

        fn len(&self) -> usize {
            self.inner.len()
        }

        fn extend_by(&mut self, n: usize) {
            self.inner.extend_by(n)
        }

        fn set_field(&mut self, row: usize, field: usize, value: FieldValue) -> ShardResult<()> {
            self.inner.set_field(row, field, value)
        }

        fn persist(&self, path: &Path) -> ShardResult<u64> {
            if self.armed.load(Ordering::SeqCst) {
                // Half-written temp file, then the "crash"
                let dir = path.parent().unwrap();
                let mut temp = tempfile::Builder::new()
                    .prefix(crate::shard::store::TEMP_PREFIX)
                    .suffix(crate::shard::store::TEMP_SUFFIX)
                    .tempfile_in(dir)
                    .unwrap();
                temp.write_all(b"PAR1\0\0\0").unwrap();
                return Err(ShardError::io(
                    path,
                    std::io::Error::other("simulated crash during persist"),
                ));
            }
            self.inner.persist(path)
        }

        fn read_rows(&self) -> Vec<Record> {
            self.inner.read_rows()
        }
    }

    #[test]
    fn test_crash_during_persist_keeps_previous_state() {
        let dir = tempdir().unwrap();
        let armed = Arc::new(AtomicBool::new(false));
        let store = CrashingStore {
            inner: ParquetStore::default(),
            armed: Arc::clone(&armed),
        };
        let writer = writer_with(&dir, Arc::new(store));

        let before: Vec<_> = (0..4).map(record).collect();
        writer.append_rows(ShardId(12), &before).unwrap();

        armed.store(true, Ordering::SeqCst);
        let after: Vec<_> = (10..20).map(record).collect();
        assert!(writer.append_rows(ShardId(12), &after).is_err());
        armed.store(false, Ordering::SeqCst);

        let rows = writer.read_shard(ShardId(12)).unwrap();
        assert_eq!(ids(&rows), vec![0, 1, 2, 3]);
        assert_eq!(writer.stats().failures.load(Ordering::Relaxed), 1);

        // The lock was released on the error path
        assert!(writer.locks().try_acquire(ShardId(12)).unwrap().is_some());
    }
}
