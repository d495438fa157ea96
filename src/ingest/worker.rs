//! Worker thread logic for parallel ingestion
//!
//! Each worker:
//! - Pulls jobs (one input file each) from the job channel
//! - Streams and converts the file's rows, grouping them by shard
//! - Appends each shard group through the shared [`ShardWriter`]
//! - Sends a [`JobReport`] back to the coordinator
//!
//! Workers share nothing but the writer (and through it the lock table),
//! the ledger, and the shutdown flag.

use crate::error::WorkerError;
use crate::index::{ShardId, SpatialIndexer};
use crate::ingest::job::{IngestJob, JobReport, JobState, ShardFailure};
use crate::ledger::{Ledger, LedgerStatus};
use crate::record::{FieldSpec, Record, RecordConverter, RejectReason, Rejection};
use crate::shard::ShardWriter;
use crossbeam_channel::{Receiver, Sender};
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Rows between cancellation checks while reading
const CANCEL_CHECK_INTERVAL: u64 = 10_000;

/// Statistics collected by a worker
#[derive(Debug, Default)]
pub struct WorkerStats {
    /// Jobs finished successfully
    pub files_done: AtomicU64,

    /// Jobs failed
    pub files_failed: AtomicU64,

    /// Jobs cancelled
    pub files_cancelled: AtomicU64,

    /// Rows read from input
    pub rows_read: AtomicU64,

    /// Rows appended to shards
    pub rows_written: AtomicU64,

    /// Rows skipped by validation
    pub rows_rejected: AtomicU64,
}

impl WorkerStats {
    fn record_job(&self, report: &JobReport) {
        let counter = match report.state {
            JobState::Done => &self.files_done,
            JobState::Cancelled => &self.files_cancelled,
            _ => &self.files_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        self.rows_read.fetch_add(report.rows_read, Ordering::Relaxed);
        self.rows_written.fetch_add(report.rows_written, Ordering::Relaxed);
        self.rows_rejected.fetch_add(report.rows_rejected, Ordering::Relaxed);
    }

    /// Jobs finished in any state
    pub fn files_finished(&self) -> u64 {
        self.files_done.load(Ordering::Relaxed)
            + self.files_failed.load(Ordering::Relaxed)
            + self.files_cancelled.load(Ordering::Relaxed)
    }
}

/// Everything a job needs besides its own file
pub struct JobContext {
    /// Ordered output fields with their source columns
    pub specs: Vec<FieldSpec>,

    pub indexer: Arc<dyn SpatialIndexer>,

    pub writer: Arc<ShardWriter>,

    pub ledger: Option<Arc<Ledger>>,

    pub shutdown: Arc<AtomicBool>,
}

impl JobContext {
    fn cancelled(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

/// A worker thread that processes ingest jobs
pub struct Worker {
    /// Worker ID
    id: usize,

    /// Thread handle
    handle: Option<JoinHandle<Result<(), WorkerError>>>,

    /// Worker statistics
    stats: Arc<WorkerStats>,
}

impl Worker {
    /// Spawn a new worker thread
    pub fn spawn(
        id: usize,
        ctx: Arc<JobContext>,
        jobs: Receiver<IngestJob>,
        results: Sender<JobReport>,
    ) -> Result<Self, WorkerError> {
        let stats = Arc::new(WorkerStats::default());
        let stats_clone = Arc::clone(&stats);

        let handle = thread::Builder::new()
            .name(format!("ingest-{}", id))
            .spawn(move || worker_loop(id, ctx, jobs, results, stats_clone))
            .map_err(|e| WorkerError::InitFailed {
                id,
                reason: e.to_string(),
            })?;

        Ok(Self {
            id,
            handle: Some(handle),
            stats,
        })
    }

    /// Get worker ID
    pub fn id(&self) -> usize {
        self.id
    }

    /// Get worker statistics
    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Wait for the worker to finish
    pub fn join(mut self) -> Result<(), WorkerError> {
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(result) => result,
                Err(payload) => Err(WorkerError::Panicked {
                    id: self.id,
                    message: panic_message(payload.as_ref()),
                }),
            }
        } else {
            Ok(())
        }
    }
}

/// Main worker loop
fn worker_loop(
    id: usize,
    ctx: Arc<JobContext>,
    jobs: Receiver<IngestJob>,
    results: Sender<JobReport>,
    stats: Arc<WorkerStats>,
) -> Result<(), WorkerError> {
    debug!(worker = id, "Worker starting");

    for job in jobs.iter() {
        let report = if ctx.cancelled() {
            JobReport::cancelled(&job)
        } else {
            run_guarded(&ctx, &job)
        };

        stats.record_job(&report);

        if results.send(report).is_err() {
            return Err(WorkerError::ResultChannelClosed);
        }
    }

    debug!(
        worker = id,
        done = stats.files_done.load(Ordering::Relaxed),
        failed = stats.files_failed.load(Ordering::Relaxed),
        "Worker shutting down"
    );

    Ok(())
}

/// Run a job, turning a panic into a failed report.
/// Counts gathered before the panic are kept.
fn run_guarded(ctx: &JobContext, job: &IngestJob) -> JobReport {
    let started = Instant::now();
    let mut report = JobReport::new(job.id, &job.path);

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| process(ctx, job, &mut report)));

    if let Err(payload) = outcome {
        let message = panic_message(payload.as_ref());
        let writing = matches!(report.state, JobState::Writing { .. });
        warn!(
            file = %job.path.display(),
            error = %message,
            shards = report.shards_written.len(),
            "Job panicked"
        );

        let reason = if writing {
            format!("panic during shard writes, shards may have been written: {}", message)
        } else {
            format!("panic: {}", message)
        };
        report.advance(JobState::Failed { reason });
        report.elapsed = started.elapsed();

        // The append in flight may have landed without being counted
        finish_ledger(ctx, &report, writing);
    }

    report
}

/// Process one input file from start to finish
pub fn run_job(ctx: &JobContext, job: &IngestJob) -> JobReport {
    let mut report = JobReport::new(job.id, &job.path);
    process(ctx, job, &mut report);
    report
}

fn process(ctx: &JobContext, job: &IngestJob, report: &mut JobReport) {
    let started = Instant::now();

    let Some(groups) = read_groups(ctx, job, report) else {
        report.elapsed = started.elapsed();
        finish_ledger(ctx, report, false);
        return;
    };

    write_groups(ctx, job, groups, report);
    report.elapsed = started.elapsed();
    finish_ledger(ctx, report, false);

    match &report.state {
        JobState::Done => info!(
            file = %job.path.display(),
            rows = report.rows_written,
            rejected = report.rows_rejected,
            shards = report.shards_written.len(),
            "File ingested"
        ),
        JobState::Cancelled => info!(
            file = %job.path.display(),
            shards = report.shards_written.len(),
            "File cancelled between shard writes"
        ),
        state => warn!(
            file = %job.path.display(),
            rows = report.rows_written,
            failed_shards = report.shard_failures.len(),
            state = %state,
            "File failed"
        ),
    }
}

/// Read, validate, and group every row of the file.
/// Returns `None` when the job ended early (report already final).
fn read_groups(
    ctx: &JobContext,
    job: &IngestJob,
    report: &mut JobReport,
) -> Option<BTreeMap<ShardId, Vec<Record>>> {
    report.advance(JobState::Reading);

    let stream = match job.source.open(&job.path) {
        Ok(stream) => stream,
        Err(e) => {
            report.advance(JobState::Failed {
                reason: e.to_string(),
            });
            return None;
        }
    };

    let converter = match RecordConverter::bind(&ctx.specs, stream.columns(), &job.path) {
        Ok(converter) => converter,
        Err(e) => {
            report.advance(JobState::Failed {
                reason: e.to_string(),
            });
            return None;
        }
    };

    report.advance(JobState::Converting);

    let mut groups: BTreeMap<ShardId, Vec<Record>> = BTreeMap::new();

    for item in stream {
        match item {
            Ok(raw) => {
                report.rows_read += 1;
                match converter.convert(&raw) {
                    Ok((coord, record)) => {
                        groups
                            .entry(ctx.indexer.locate(&coord))
                            .or_default()
                            .push(record);
                    }
                    Err(rejection) => report.reject(rejection),
                }
            }
            Err(e) if e.is_row_scoped() => {
                report.rows_read += 1;
                report.reject(Rejection::new(RejectReason::MalformedRow, e.to_string()));
            }
            Err(e) => {
                report.advance(JobState::Failed {
                    reason: e.to_string(),
                });
                return None;
            }
        }

        // Nothing has been written yet, so stopping here loses nothing
        if report.rows_read % CANCEL_CHECK_INTERVAL == 0 && ctx.cancelled() {
            report.advance(JobState::Cancelled);
            return None;
        }
    }

    if ctx.cancelled() {
        report.advance(JobState::Cancelled);
        return None;
    }

    Some(groups)
}

/// Append each shard group, continuing past failed shards
fn write_groups(
    ctx: &JobContext,
    job: &IngestJob,
    groups: BTreeMap<ShardId, Vec<Record>>,
    report: &mut JobReport,
) {
    let total = groups.len();
    if total == 0 {
        report.advance(JobState::Done);
        return;
    }

    if let Some(ledger) = &ctx.ledger {
        if let Err(e) = ledger.mark_running(&job.path) {
            report.advance(JobState::Failed {
                reason: format!("ledger unavailable: {}", e),
            });
            return;
        }
    }

    report.advance(JobState::Writing { done: 0, total });

    for (done, (shard, rows)) in groups.into_iter().enumerate() {
        // Never start an append after shutdown; a finished one stays
        if ctx.cancelled() {
            report.advance(JobState::Cancelled);
            return;
        }

        match ctx.writer.append_rows(shard, &rows) {
            Ok(written) => {
                report.rows_written += written as u64;
                report.shards_written.push(shard);
            }
            Err(e) => report.shard_failures.push(ShardFailure {
                shard,
                rows: rows.len(),
                error: e.to_string(),
            }),
        }

        report.advance(JobState::Writing {
            done: done + 1,
            total,
        });
    }

    if report.shard_failures.is_empty() {
        report.advance(JobState::Done);
    } else {
        let shards = report
            .shard_failures
            .iter()
            .map(|f| f.shard.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        report.advance(JobState::Failed {
            reason: format!(
                "{} of {} shard writes failed (shards {})",
                report.shard_failures.len(),
                total,
                shards
            ),
        });
    }
}

/// Record the final state of a started job.
/// `uncertain` marks a job whose last append may have landed uncounted.
fn finish_ledger(ctx: &JobContext, report: &JobReport, uncertain: bool) {
    let Some(ledger) = &ctx.ledger else {
        return;
    };

    let status = match &report.state {
        JobState::Done => LedgerStatus::Done,
        JobState::Failed { .. } | JobState::Cancelled
            if report.rows_written > 0 || uncertain =>
        {
            LedgerStatus::Partial
        }
        JobState::Failed { .. } => LedgerStatus::Failed,
        JobState::Cancelled => LedgerStatus::Cancelled,
        _ => return,
    };

    let result = ledger.finish(
        &report.path,
        status,
        report.rows_written,
        report.shards_written.len() as u64,
        report.error(),
    );

    if let Err(e) = result {
        warn!(file = %report.path.display(), error = %e, "Failed to update ledger");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Aggregate statistics from multiple workers
pub fn aggregate_stats(workers: &[Worker]) -> WorkerTotals {
    let mut totals = WorkerTotals::default();

    for worker in workers {
        let s = &worker.stats;
        totals.files_done += s.files_done.load(Ordering::Relaxed);
        totals.files_failed += s.files_failed.load(Ordering::Relaxed);
        totals.files_cancelled += s.files_cancelled.load(Ordering::Relaxed);
        totals.rows_read += s.rows_read.load(Ordering::Relaxed);
        totals.rows_written += s.rows_written.load(Ordering::Relaxed);
        totals.rows_rejected += s.rows_rejected.load(Ordering::Relaxed);
    }

    totals
}

/// Snapshot of summed worker statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerTotals {
    pub files_done: u64,
    pub files_failed: u64,
    pub files_cancelled: u64,
    pub rows_read: u64,
    pub rows_written: u64,
    pub rows_rejected: u64,
}

impl WorkerTotals {
    pub fn files_finished(&self) -> u64 {
        self.files_done + self.files_failed + self.files_cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ShardResult;
    use crate::index::GridIndexer;
    use crate::ledger::Decision;
    use crate::record::{CatalogSchema, FieldMapping, FieldValue};
    use crate::shard::{ParquetStore, ShardLayout, ShardLockTable, ShardStore, ShardTable};
    use crate::source::CsvSource;
    use std::fs;
    use std::path::Path;
    use tempfile::{tempdir, TempDir};

    fn context(dir: &TempDir, ledger: Option<Arc<Ledger>>) -> JobContext {
        let specs = FieldMapping::default().field_specs().unwrap();
        let indexer: Arc<dyn SpatialIndexer> = Arc::new(GridIndexer::new(1).unwrap());
        let layout = ShardLayout::new(dir.path().join("catalog"));
        layout.prepare().unwrap();
        let locks = Arc::new(ShardLockTable::new(layout.lock_dir(), indexer.universe()).unwrap());
        let writer = Arc::new(ShardWriter::new(
            layout,
            CatalogSchema::from_specs(&specs),
            Arc::new(ParquetStore::default()),
            locks,
        ));

        JobContext {
            specs,
            indexer,
            writer,
            ledger,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    fn job(path: &Path) -> IngestJob {
        IngestJob::new(0, path.to_path_buf(), Arc::new(CsvSource::default()))
    }

    fn record(id: i64) -> Record {
        Record::new(vec![
            FieldValue::Int64(id),
            FieldValue::Float64(10.0),
            FieldValue::Float64(10.0),
        ])
    }

    /// Raises the shutdown flag from inside an append
    struct ShutdownDuringAppend {
        inner: ParquetStore,
        shutdown: Arc<AtomicBool>,
    }

    impl ShardStore for ShutdownDuringAppend {
        fn name(&self) -> &'static str {
            self.inner.name()
        }

        fn extension(&self) -> &'static str {
            self.inner.extension()
        }

        fn open(
            &self,
            path: &Path,
            schema: &CatalogSchema,
        ) -> ShardResult<Option<Box<dyn ShardTable>>> {
            self.shutdown.store(true, Ordering::SeqCst);
            self.inner.open(path, schema)
        }

        fn create(&self, schema: &CatalogSchema) -> Box<dyn ShardTable> {
            self.inner.create(schema)
        }
    }

    /// Panics when asked to open one particular shard
    struct PanicOnShard {
        inner: ParquetStore,
        shard: &'static str,
    }

    impl ShardStore for PanicOnShard {
        fn name(&self) -> &'static str {
            self.inner.name()
        }

        fn extension(&self) -> &'static str {
            self.inner.extension()
        }

        fn open(
            &self,
            path: &Path,
            schema: &CatalogSchema,
        ) -> ShardResult<Option<Box<dyn ShardTable>>> {
            if path.file_stem().and_then(|s| s.to_str()) == Some(self.shard) {
                panic!("shard {} unreadable", self.shard);
            }
            self.inner.open(path, schema)
        }

        fn create(&self, schema: &CatalogSchema) -> Box<dyn ShardTable> {
            self.inner.create(schema)
        }
    }

    #[test]
    fn test_worker_stats() {
        let stats = WorkerStats::default();
        let mut report = JobReport::new(0, Path::new("a.csv"));
        report.state = JobState::Done;
        report.rows_read = 10;
        report.rows_written = 9;
        report.rows_rejected = 1;
        stats.record_job(&report);
        stats.record_job(&JobReport::failed(1, Path::new("b.csv"), "x"));

        assert_eq!(stats.files_done.load(Ordering::Relaxed), 1);
        assert_eq!(stats.files_failed.load(Ordering::Relaxed), 1);
        assert_eq!(stats.rows_written.load(Ordering::Relaxed), 9);
        assert_eq!(stats.files_finished(), 2);
    }

    #[test]
    fn test_job_groups_by_shard_and_rejects_bad_rows() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("a.csv");
        fs::write(
            &input,
            "id,ra,dec\n1,10.0,10.0\n2,10.5,10.5\n3,200.0,-60.0\n4,10.0,97.0\n5,,1.0\n",
        )
        .unwrap();

        let ctx = context(&dir, None);
        let report = run_job(&ctx, &job(&input));

        assert_eq!(report.state, JobState::Done);
        assert_eq!(report.rows_read, 5);
        assert_eq!(report.rows_written, 3);
        assert_eq!(report.rows_rejected, 2);
        assert_eq!(report.rejections[&RejectReason::CoordinateOutOfRange], 1);
        assert_eq!(report.rejections[&RejectReason::MissingField], 1);
        assert_eq!(report.shards_written.len(), 2);
    }

    #[test]
    fn test_unopenable_file_fails_job() {
        let dir = tempdir().unwrap();
        let ledger = Arc::new(Ledger::open_in_memory().unwrap());
        let ctx = context(&dir, Some(Arc::clone(&ledger)));
        let missing = dir.path().join("missing.csv");

        let report = run_job(&ctx, &job(&missing));
        assert!(report.is_failed());
        assert_eq!(report.rows_written, 0);

        let entry = ledger.entry(&missing).unwrap().unwrap();
        assert_eq!(entry.status, LedgerStatus::Failed);
        assert!(!entry.needs_attention());
    }

    #[test]
    fn test_missing_column_fails_job() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("a.csv");
        fs::write(&input, "id,ra\n1,10.0\n").unwrap();

        let ctx = context(&dir, None);
        let report = run_job(&ctx, &job(&input));
        assert!(report.error().unwrap().contains("dec"));
    }

    #[test]
    fn test_cancelled_before_writes() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("a.csv");
        fs::write(&input, "id,ra,dec\n1,10.0,10.0\n2,200.0,-60.0\n").unwrap();

        let ledger = Arc::new(Ledger::open_in_memory().unwrap());
        let ctx = context(&dir, Some(Arc::clone(&ledger)));
        ctx.shutdown.store(true, Ordering::SeqCst);
        let report = run_job(&ctx, &job(&input));

        assert!(report.is_cancelled());
        assert_eq!(report.rows_read, 2);
        assert_eq!(report.rows_written, 0);
        assert!(report.shards_written.is_empty());
        assert_eq!(ctx.writer.locks().stats().acquisitions(), 0);

        // Nothing was written, so the next run retries the file
        let entry = ledger.entry(&input).unwrap().unwrap();
        assert_eq!(entry.status, LedgerStatus::Cancelled);
        assert_eq!(ledger.decide(&input).unwrap(), Decision::Process);
    }

    #[test]
    fn test_cancelled_between_shard_writes() {
        let dir = tempdir().unwrap();
        let ctx = context(&dir, None);
        let groups: BTreeMap<ShardId, Vec<Record>> = [
            (ShardId(4), vec![record(1)]),
            (ShardId(8), vec![record(2)]),
        ]
        .into_iter()
        .collect();

        let mut report = JobReport::new(0, Path::new("a.csv"));
        report.advance(JobState::Reading);
        report.advance(JobState::Converting);

        // Shutdown arrives while the first append is running
        let store = Arc::new(ShutdownDuringAppend {
            inner: ParquetStore::default(),
            shutdown: Arc::clone(&ctx.shutdown),
        });
        let ctx = JobContext {
            writer: Arc::new(ShardWriter::new(
                ctx.writer.layout().clone(),
                ctx.writer.schema().clone(),
                store,
                Arc::new(ShardLockTable::new(ctx.writer.layout().lock_dir(), ctx.indexer.universe()).unwrap()),
            )),
            ..ctx
        };

        write_groups(&ctx, &job(Path::new("a.csv")), groups, &mut report);

        assert!(report.is_cancelled());
        assert_eq!(report.shards_written, vec![ShardId(4)]);
        assert_eq!(report.rows_written, 1);
    }

    #[test]
    fn test_panic_keeps_partial_counts() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("a.csv");
        // Grid depth 1: (200,-60) is shard 4, (10,10) is shard 8
        fs::write(&input, "id,ra,dec\n1,10.0,10.0\n2,200.0,-60.0\n").unwrap();

        let ledger = Arc::new(Ledger::open_in_memory().unwrap());
        let base = context(&dir, Some(Arc::clone(&ledger)));
        let ctx = JobContext {
            writer: Arc::new(ShardWriter::new(
                base.writer.layout().clone(),
                base.writer.schema().clone(),
                Arc::new(PanicOnShard {
                    inner: ParquetStore::default(),
                    shard: "8",
                }),
                Arc::new(ShardLockTable::new(base.writer.layout().lock_dir(), base.indexer.universe()).unwrap()),
            )),
            ..base
        };

        let report = run_guarded(&ctx, &job(&input));

        assert!(report.is_failed());
        assert!(report.error().unwrap().contains("shards may have been written"));
        assert_eq!(report.rows_written, 1);
        assert_eq!(report.shards_written, vec![ShardId(4)]);

        let entry = ledger.entry(&input).unwrap().unwrap();
        assert_eq!(entry.status, LedgerStatus::Partial);
        assert!(entry.needs_attention());
    }

    #[test]
    fn test_ledger_marks_done() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("a.csv");
        fs::write(&input, "id,ra,dec\n1,10.0,10.0\n").unwrap();

        let ledger = Arc::new(Ledger::open_in_memory().unwrap());
        let ctx = context(&dir, Some(Arc::clone(&ledger)));
        run_job(&ctx, &job(&input));

        let entry = ledger.entry(&input).unwrap().unwrap();
        assert_eq!(entry.status, LedgerStatus::Done);
        assert_eq!(entry.rows_written, 1);
    }
}
