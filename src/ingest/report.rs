//! Run report
//!
//! The completion artifact of a run: per-file outcomes rolled up into
//! totals, every failure with its error text, and the files the ledger held
//! back. Serialized to JSON with `--report`.

use crate::index::ShardId;
use crate::ingest::job::{serialize_secs, JobReport, JobState, ShardFailure};
use crate::ledger::LedgerStatus;
use crate::record::RejectReason;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// A file that failed, with enough context to re-run it
#[derive(Debug, Clone, Serialize)]
pub struct FailedFile {
    pub path: PathBuf,
    pub error: String,
    pub rows_written: u64,
    pub shard_failures: Vec<ShardFailure>,
}

/// A file the ledger kept out of this run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub status: LedgerStatus,
    pub rows_written: u64,
}

/// Summary of one ingest run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(rename = "duration_secs", serialize_with = "serialize_secs")]
    pub duration: Duration,
    pub output_root: PathBuf,
    pub indexer: String,
    pub depth: u8,
    pub workers: usize,

    /// Files handed to the run (before ledger filtering)
    pub files_total: usize,
    /// Files that ran to completion or failure
    pub files_processed: usize,
    pub files_succeeded: usize,
    pub files_failed: usize,
    pub files_cancelled: usize,

    pub rows_read: u64,
    pub rows_written: u64,
    pub rows_rejected: u64,
    pub rejections: BTreeMap<RejectReason, u64>,

    /// Distinct shards appended to
    pub shards_touched: usize,
    /// Bytes of shard files written
    pub bytes_written: u64,
    pub lock_acquisitions: u64,
    pub lock_contended: u64,

    pub failed: Vec<FailedFile>,
    /// Already ingested by an earlier run
    pub skipped: Vec<SkippedFile>,
    /// Earlier attempt may have written rows; held back
    pub needs_attention: Vec<SkippedFile>,

    /// Run stopped by cancellation
    pub cancelled: bool,

    pub jobs: Vec<JobReport>,

    #[serde(skip)]
    shard_set: BTreeSet<ShardId>,
}

impl RunReport {
    pub fn new(output_root: &Path, indexer: &str, depth: u8, workers: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            duration: Duration::ZERO,
            output_root: output_root.to_path_buf(),
            indexer: indexer.to_string(),
            depth,
            workers,
            files_total: 0,
            files_processed: 0,
            files_succeeded: 0,
            files_failed: 0,
            files_cancelled: 0,
            rows_read: 0,
            rows_written: 0,
            rows_rejected: 0,
            rejections: BTreeMap::new(),
            shards_touched: 0,
            bytes_written: 0,
            lock_acquisitions: 0,
            lock_contended: 0,
            failed: Vec::new(),
            skipped: Vec::new(),
            needs_attention: Vec::new(),
            cancelled: false,
            jobs: Vec::new(),
            shard_set: BTreeSet::new(),
        }
    }

    /// Fold one job outcome into the totals
    pub fn add_job(&mut self, job: JobReport) {
        match &job.state {
            JobState::Done => {
                self.files_processed += 1;
                self.files_succeeded += 1;
            }
            JobState::Failed { reason } => {
                self.files_processed += 1;
                self.files_failed += 1;
                self.failed.push(FailedFile {
                    path: job.path.clone(),
                    error: reason.clone(),
                    rows_written: job.rows_written,
                    shard_failures: job.shard_failures.clone(),
                });
            }
            JobState::Cancelled => self.files_cancelled += 1,
            // Reports are only produced in terminal states
            _ => {}
        }

        self.rows_read += job.rows_read;
        self.rows_written += job.rows_written;
        self.rows_rejected += job.rows_rejected;
        for (reason, count) in &job.rejections {
            *self.rejections.entry(*reason).or_insert(0) += count;
        }
        self.shard_set.extend(job.shards_written.iter().copied());
        self.shards_touched = self.shard_set.len();

        self.jobs.push(job);
    }

    /// Order jobs by id so reports are stable regardless of completion order
    pub fn sort_jobs(&mut self) {
        self.jobs.sort_by_key(|j| j.job_id);
        self.failed.sort_by(|a, b| a.path.cmp(&b.path));
    }

    /// Every file succeeded and nothing was held back or cancelled
    pub fn is_success(&self) -> bool {
        self.files_failed == 0 && self.needs_attention.is_empty() && !self.cancelled
    }

    /// Job report for a path
    pub fn job(&self, path: &Path) -> Option<&JobReport> {
        self.jobs.iter().find(|j| j.path == path)
    }

    /// Write the report as pretty JSON
    pub fn write_json(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
        let mut file = fs::File::create(path)?;
        file.write_all(json.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }
}
