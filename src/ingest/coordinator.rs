//! Ingest coordinator - orchestrates a parallel ingest run
//!
//! The coordinator is responsible for:
//! - Every fatal check before a worker starts (output root, manifest,
//!   ledger, lock table)
//! - Turning input files into jobs, consulting the ledger
//! - Running the worker pool and collecting job reports
//! - Progress reporting and cooperative cancellation
//! - Rolling everything up into a [`RunReport`]

use crate::config::IngestConfig;
use crate::error::{ConfigError, Result, SourceError};
use crate::ingest::job::{IngestJob, JobReport};
use crate::ingest::report::{RunReport, SkippedFile};
use crate::ingest::worker::{aggregate_stats, JobContext, Worker};
use crate::ledger::{Decision, Ledger};
use crate::manifest::CatalogManifest;
use crate::progress::{IngestProgress, ProgressReporter};
use crate::record::CatalogSchema;
use crate::registry::Registry;
use crate::shard::{ShardLayout, ShardLockTable, ShardWriter};
use crate::source::{CsvSource, RowSource};
use crossbeam_channel::{unbounded, RecvTimeoutError};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Temp files older than this are leftovers of a crashed run
const STALE_TEMP_AGE: Duration = Duration::from_secs(3600);

/// How often progress is refreshed while waiting for results
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Coordinates a parallel ingest run
pub struct IngestCoordinator {
    /// Configuration
    config: Arc<IngestConfig>,

    /// State shared with every worker
    ctx: Arc<JobContext>,

    /// Row sources, looked up per file by extension
    registry: Registry,

    /// Source chosen by `--format`, overriding extension lookup
    forced_source: Option<Arc<dyn RowSource>>,

    /// Catalog manifest, verified against this run's settings
    manifest: CatalogManifest,

    /// Worker threads
    workers: Vec<Worker>,

    /// Shutdown signal
    shutdown: Arc<AtomicBool>,

    /// Optional progress bar
    progress: Option<ProgressReporter>,
}

impl IngestCoordinator {
    /// Create a coordinator, failing on anything that would doom the whole run
    pub fn new(config: IngestConfig, registry: &Registry) -> Result<Self> {
        let mut registry = registry.clone();
        if let Some(delimiter) = config.delimiter {
            registry.register_source(Arc::new(CsvSource::with_delimiter(delimiter)));
        }

        let indexer = registry.indexer(&config.indexer, config.depth)?;
        let store = registry.store(&config.store)?;
        let forced_source = config
            .format
            .as_deref()
            .map(|name| registry.source(name))
            .transpose()?;

        let specs = config.mapping.field_specs()?;
        let schema = CatalogSchema::from_specs(&specs);

        let layout = ShardLayout::new(&config.output_root);
        prepare_output_root(&layout)?;

        let manifest = CatalogManifest::load_or_create(
            &layout.manifest_path(),
            CatalogManifest::new(indexer.name(), indexer.depth(), store.name(), schema.clone()),
        )?;

        let ledger = if config.use_ledger {
            Some(Arc::new(Ledger::open(&layout.ledger_path())?))
        } else {
            None
        };

        // Every slot of the universe exists before any worker runs
        let locks = ShardLockTable::new(layout.lock_dir(), indexer.universe()).map_err(|e| {
            ConfigError::InvalidOutputRoot {
                path: layout.lock_dir(),
                reason: format!("cannot create lock table: {}", e),
            }
        })?;

        match layout.sweep_stale_temp_files(STALE_TEMP_AGE) {
            Ok(0) => {}
            Ok(removed) => info!(removed, "Removed stale shard temp files"),
            Err(e) => warn!(error = %e, "Failed to sweep stale shard temp files"),
        }

        debug!(
            indexer = indexer.name(),
            depth = indexer.depth(),
            shards = locks.len(),
            store = store.name(),
            fields = schema.len(),
            "Catalog ready"
        );

        let writer = Arc::new(ShardWriter::new(layout, schema, store, Arc::new(locks)));
        let shutdown = Arc::new(AtomicBool::new(false));

        let ctx = Arc::new(JobContext {
            specs,
            indexer,
            writer,
            ledger,
            shutdown: Arc::clone(&shutdown),
        });

        Ok(Self {
            config: Arc::new(config),
            ctx,
            registry,
            forced_source,
            manifest,
            workers: Vec::new(),
            shutdown,
            progress: None,
        })
    }

    /// Get a clone of the shutdown flag (for signal handlers)
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Show a progress bar while running
    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn writer(&self) -> &ShardWriter {
        &self.ctx.writer
    }

    pub fn manifest(&self) -> &CatalogManifest {
        &self.manifest
    }

    pub fn ledger(&self) -> Option<&Ledger> {
        self.ctx.ledger.as_deref()
    }

    /// Ingest every input file and report the outcome.
    /// A failing file never stops the others.
    pub fn run(mut self, inputs: Vec<PathBuf>) -> Result<RunReport> {
        let start_time = Instant::now();
        let mut report = RunReport::new(
            &self.config.output_root,
            self.ctx.indexer.name(),
            self.ctx.indexer.depth(),
            self.config.worker_count,
        );
        report.files_total = inputs.len();

        info!(
            run_id = %report.run_id,
            files = inputs.len(),
            workers = self.config.worker_count,
            root = %self.config.output_root.display(),
            "Starting ingest"
        );

        self.record_run_info("last_run_id", &report.run_id.to_string());
        self.record_run_info("last_run_started", &report.started_at.to_rfc3339());

        let jobs = self.plan_jobs(inputs, &mut report)?;
        let pending: BTreeSet<(usize, PathBuf)> =
            jobs.iter().map(|j| (j.id, j.path.clone())).collect();

        if !jobs.is_empty() {
            self.execute(jobs, pending, &mut report, start_time)?;
        }

        report.duration = start_time.elapsed();
        report.cancelled = report.files_cancelled > 0 || self.shutdown.load(Ordering::Relaxed);
        report.bytes_written = self.ctx.writer.stats().bytes();
        report.lock_acquisitions = self.ctx.writer.locks().stats().acquisitions();
        report.lock_contended = self.ctx.writer.locks().stats().contended();
        report.sort_jobs();

        self.record_run_info("last_run_finished", &chrono::Utc::now().to_rfc3339());

        if let Some(progress) = &self.progress {
            progress.finish_and_clear();
        }

        info!(
            run_id = %report.run_id,
            succeeded = report.files_succeeded,
            failed = report.files_failed,
            cancelled = report.files_cancelled,
            skipped = report.skipped.len(),
            needs_attention = report.needs_attention.len(),
            rows = report.rows_written,
            rejected = report.rows_rejected,
            shards = report.shards_touched,
            duration_secs = report.duration.as_secs(),
            "Ingest completed"
        );

        Ok(report)
    }

    /// Build the job list, leaving out files the ledger holds back
    fn plan_jobs(&self, inputs: Vec<PathBuf>, report: &mut RunReport) -> Result<Vec<IngestJob>> {
        let mut jobs = Vec::with_capacity(inputs.len());

        for (id, path) in inputs.into_iter().enumerate() {
            if let Some(ledger) = &self.ctx.ledger {
                match ledger.decide(&path)? {
                    Decision::Process => {}
                    Decision::SkipDone(entry) => {
                        debug!(file = %path.display(), "Already ingested, skipping");
                        report.skipped.push(SkippedFile {
                            path,
                            status: entry.status,
                            rows_written: entry.rows_written,
                        });
                        continue;
                    }
                    Decision::NeedsAttention(entry) if !self.config.allow_duplicates => {
                        warn!(
                            file = %path.display(),
                            status = %entry.status,
                            rows = entry.rows_written,
                            "Earlier attempt may have written rows, skipping"
                        );
                        report.needs_attention.push(SkippedFile {
                            path,
                            status: entry.status,
                            rows_written: entry.rows_written,
                        });
                        continue;
                    }
                    Decision::NeedsAttention(entry) => {
                        warn!(
                            file = %path.display(),
                            status = %entry.status,
                            rows = entry.rows_written,
                            "Re-ingesting file that may duplicate rows"
                        );
                    }
                }
            }

            let source = match &self.forced_source {
                Some(source) => Some(Arc::clone(source)),
                None => self.registry.source_for(&path),
            };

            match source {
                Some(source) => jobs.push(IngestJob::new(id, path, source)),
                None => {
                    let err = SourceError::UnknownFormat { path: path.clone() };
                    warn!(file = %path.display(), "No row source for file");
                    report.add_job(JobReport::failed(id, &path, err.to_string()));
                }
            }
        }

        Ok(jobs)
    }

    /// Run the worker pool over the planned jobs
    fn execute(
        &mut self,
        jobs: Vec<IngestJob>,
        mut pending: BTreeSet<(usize, PathBuf)>,
        report: &mut RunReport,
        start_time: Instant,
    ) -> Result<()> {
        let total = jobs.len();
        let (job_tx, job_rx) = unbounded();
        let (result_tx, result_rx) = unbounded();

        for job in jobs {
            // The receiver is alive until the workers are spawned
            let _ = job_tx.send(job);
        }
        drop(job_tx);

        self.spawn_workers(total.min(self.config.worker_count), job_rx, result_tx)?;

        if let Some(progress) = &self.progress {
            progress.set_total(report.files_total as u64);
        }

        let already_done = report.files_total - total;
        let mut received = 0;
        let mut next_milestone = 10;

        while received < total {
            match result_rx.recv_timeout(PROGRESS_INTERVAL) {
                Ok(job) => {
                    pending.remove(&(job.job_id, job.path.clone()));
                    report.add_job(job);
                    received += 1;

                    let percent = received * 100 / total;
                    if percent >= next_milestone {
                        info!(
                            files = received,
                            total,
                            percent,
                            rows = report.rows_written,
                            failed = report.files_failed,
                            "Ingest progress"
                        );
                        next_milestone = (percent / 10 + 1) * 10;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            self.refresh_progress(report, already_done + received, start_time);
        }

        // Workers that died without reporting leave their jobs unaccounted for
        for (id, path) in pending {
            warn!(file = %path.display(), "Worker exited before reporting");
            report.add_job(JobReport::failed(id, &path, "worker exited before reporting"));
        }

        self.join_workers();
        Ok(())
    }

    /// Spawn worker threads
    fn spawn_workers(
        &mut self,
        count: usize,
        jobs: crossbeam_channel::Receiver<IngestJob>,
        results: crossbeam_channel::Sender<JobReport>,
    ) -> Result<()> {
        for id in 0..count {
            let worker = Worker::spawn(id, Arc::clone(&self.ctx), jobs.clone(), results.clone())?;
            self.workers.push(worker);
        }

        info!(count = self.workers.len(), "Workers spawned");
        Ok(())
    }

    /// Join all worker threads
    fn join_workers(&mut self) {
        let totals = aggregate_stats(&self.workers);
        debug!(
            done = totals.files_done,
            failed = totals.files_failed,
            cancelled = totals.files_cancelled,
            rows = totals.rows_written,
            "Joining workers"
        );

        let workers = std::mem::take(&mut self.workers);
        for worker in workers {
            let id = worker.id();
            if let Err(e) = worker.join() {
                warn!(worker = id, error = %e, "Worker failed to join cleanly");
            }
        }
    }

    fn refresh_progress(&self, report: &RunReport, files_done: usize, start_time: Instant) {
        let Some(progress) = &self.progress else {
            return;
        };

        progress.update(&IngestProgress {
            files_done: files_done as u64,
            files_total: report.files_total as u64,
            files_failed: report.files_failed as u64,
            rows_written: report.rows_written,
            rows_rejected: report.rows_rejected,
            bytes_written: self.ctx.writer.stats().bytes(),
            elapsed: start_time.elapsed(),
        });

        if self.shutdown.load(Ordering::Relaxed) {
            progress.set_status("Cancelling: finishing in-flight shard writes...");
        }
    }

    fn record_run_info(&self, key: &str, value: &str) {
        if let Some(ledger) = &self.ctx.ledger {
            if let Err(e) = ledger.set_run_info(key, value) {
                warn!(key, error = %e, "Failed to record run info");
            }
        }
    }
}

/// Create the catalog root and check it can be written to
fn prepare_output_root(layout: &ShardLayout) -> std::result::Result<(), ConfigError> {
    let root = layout.root();
    let invalid = |reason: String| ConfigError::InvalidOutputRoot {
        path: root.to_path_buf(),
        reason,
    };

    if root.exists() && !root.is_dir() {
        return Err(invalid("not a directory".into()));
    }

    fs::create_dir_all(root).map_err(|e| invalid(e.to_string()))?;
    tempfile::tempfile_in(root).map_err(|e| invalid(format!("not writable: {}", e)))?;
    layout.prepare().map_err(|e| invalid(e.to_string()))?;

    Ok(())
}

/// Open an existing catalog's ledger without starting a run
pub fn open_ledger(root: &Path) -> Result<Ledger> {
    let layout = ShardLayout::new(root);
    let path = layout.ledger_path();
    if !path.exists() {
        return Err(ConfigError::InvalidOutputRoot {
            path: root.to_path_buf(),
            reason: "no ingest ledger found".into(),
        }
        .into());
    }
    Ok(Ledger::open(&path)?)
}
