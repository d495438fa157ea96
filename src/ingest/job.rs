//! Ingest jobs and their lifecycle
//!
//! ```text
//! Pending -> Reading -> Converting -> Writing{0..n} -> Done
//!     \          \            \              \
//!      +----------+------------+--------------+--> Failed | Cancelled
//! ```
//!
//! A file with no accepted rows goes straight from Converting to Done.

use crate::index::ShardId;
use crate::record::{RejectReason, Rejection};
use crate::source::RowSource;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Rejection messages kept per file
pub const MAX_SAMPLES: usize = 20;

/// One input file to ingest
#[derive(Clone)]
pub struct IngestJob {
    pub id: usize,
    pub path: PathBuf,
    pub source: Arc<dyn RowSource>,
}

impl IngestJob {
    pub fn new(id: usize, path: PathBuf, source: Arc<dyn RowSource>) -> Self {
        Self { id, path, source }
    }
}

impl fmt::Debug for IngestJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestJob")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("source", &self.source.name())
            .finish()
    }
}

/// Where a job is in its lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Reading,
    Converting,
    Writing { done: usize, total: usize },
    Done,
    Failed { reason: String },
    Cancelled,
}

impl JobState {
    pub fn name(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Reading => "reading",
            JobState::Converting => "converting",
            JobState::Writing { .. } => "writing",
            JobState::Done => "done",
            JobState::Failed { .. } => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Done | JobState::Failed { .. } | JobState::Cancelled
        )
    }

    /// Whether `next` is a legal successor of this state
    pub fn can_advance_to(&self, next: &JobState) -> bool {
        use JobState::*;

        if self.is_terminal() {
            return false;
        }

        match (self, next) {
            (_, Failed { .. }) | (_, Cancelled) => true,
            (Pending, Reading) => true,
            (Reading, Converting) => true,
            (Converting, Writing { done: 0, total }) => *total > 0,
            (Converting, Done) => true,
            (Writing { done, total }, Writing { done: d, total: t }) => t == total && *d == done + 1,
            (Writing { done, total }, Done) => done == total,
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Writing { done, total } => write!(f, "writing ({}/{})", done, total),
            JobState::Failed { reason } => write!(f, "failed: {}", reason),
            other => f.write_str(other.name()),
        }
    }
}

/// A shard append that failed for this file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShardFailure {
    pub shard: ShardId,
    pub rows: usize,
    pub error: String,
}

/// Outcome of one job
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job_id: usize,
    pub path: PathBuf,
    pub state: JobState,
    pub rows_read: u64,
    pub rows_written: u64,
    pub rows_rejected: u64,
    pub rejections: BTreeMap<RejectReason, u64>,
    pub samples: Vec<String>,
    pub shards_written: Vec<ShardId>,
    pub shard_failures: Vec<ShardFailure>,
    #[serde(rename = "elapsed_secs", serialize_with = "serialize_secs")]
    pub elapsed: Duration,
}

impl JobReport {
    pub fn new(job_id: usize, path: &Path) -> Self {
        Self {
            job_id,
            path: path.to_path_buf(),
            state: JobState::Pending,
            rows_read: 0,
            rows_written: 0,
            rows_rejected: 0,
            rejections: BTreeMap::new(),
            samples: Vec::new(),
            shards_written: Vec::new(),
            shard_failures: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    /// Report for a job that was never started
    pub fn cancelled(job: &IngestJob) -> Self {
        let mut report = Self::new(job.id, &job.path);
        report.state = JobState::Cancelled;
        report
    }

    /// Report for a job that failed before reaching a worker
    pub fn failed(job_id: usize, path: &Path, reason: impl Into<String>) -> Self {
        let mut report = Self::new(job_id, path);
        report.state = JobState::Failed {
            reason: reason.into(),
        };
        report
    }

    /// Move to the next state, logging the transition
    pub fn advance(&mut self, next: JobState) {
        if !self.state.can_advance_to(&next) {
            warn!(
                job = self.job_id,
                from = %self.state,
                to = %next,
                "Unexpected job state transition"
            );
        }
        debug!(job = self.job_id, file = %self.path.display(), state = %next, "Job state");
        self.state = next;
    }

    /// Count a skipped row
    pub fn reject(&mut self, rejection: Rejection) {
        self.rows_rejected += 1;
        *self.rejections.entry(rejection.reason).or_insert(0) += 1;
        if self.samples.len() < MAX_SAMPLES {
            self.samples.push(rejection.message);
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == JobState::Done
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state, JobState::Failed { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        self.state == JobState::Cancelled
    }

    /// Failure text, if the job failed
    pub fn error(&self) -> Option<&str> {
        match &self.state {
            JobState::Failed { reason } => Some(reason),
            _ => None,
        }
    }
}

pub(crate) fn serialize_secs<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let steps = [
            JobState::Pending,
            JobState::Reading,
            JobState::Converting,
            JobState::Writing { done: 0, total: 2 },
            JobState::Writing { done: 1, total: 2 },
            JobState::Writing { done: 2, total: 2 },
            JobState::Done,
        ];
        for pair in steps.windows(2) {
            assert!(pair[0].can_advance_to(&pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!JobState::Pending.can_advance_to(&JobState::Done));
        assert!(!JobState::Reading.can_advance_to(&JobState::Writing { done: 0, total: 1 }));
        assert!(!JobState::Writing { done: 1, total: 3 }.can_advance_to(&JobState::Done));
        assert!(!JobState::Done.can_advance_to(&JobState::Cancelled));
        assert!(!JobState::Converting.can_advance_to(&JobState::Writing { done: 0, total: 0 }));
    }

    #[test]
    fn test_failure_from_any_live_state() {
        let failed = JobState::Failed {
            reason: "io".into(),
        };
        for state in [
            JobState::Pending,
            JobState::Reading,
            JobState::Converting,
            JobState::Writing { done: 1, total: 4 },
        ] {
            assert!(state.can_advance_to(&failed));
            assert!(state.can_advance_to(&JobState::Cancelled));
        }
    }

    #[test]
    fn test_reject_keeps_bounded_samples() {
        let mut report = JobReport::new(0, Path::new("a.csv"));
        for i in 0..50 {
            let reason = if i % 2 == 0 {
                RejectReason::MissingField
            } else {
                RejectReason::CoordinateOutOfRange
            };
            report.reject(Rejection::new(reason, format!("row {}", i)));
        }

        assert_eq!(report.rows_rejected, 50);
        assert_eq!(report.rejections[&RejectReason::MissingField], 25);
        assert_eq!(report.samples.len(), MAX_SAMPLES);
        assert_eq!(report.samples[0], "row 0");
    }

    #[test]
    fn test_report_serializes_state_tag() {
        let report = JobReport::failed(3, Path::new("x.csv"), "cannot open");
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["state"]["state"], "failed");
        assert_eq!(json["state"]["reason"], "cannot open");
        assert_eq!(json["job_id"], 3);
    }
}
