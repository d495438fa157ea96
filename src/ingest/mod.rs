//! Parallel ingest
//!
//! One job per input file. A fixed pool of worker threads pulls jobs from a
//! channel, groups each file's rows by shard, and appends the groups through
//! the shared [`ShardWriter`](crate::shard::ShardWriter). The coordinator
//! collects the job reports into a [`RunReport`].

pub mod coordinator;
pub mod input;
pub mod job;
pub mod report;
pub mod worker;

pub use coordinator::{open_ledger, IngestCoordinator};
pub use input::{discover_inputs, InputFilter};
pub use job::{IngestJob, JobReport, JobState, ShardFailure};
pub use report::{FailedFile, RunReport, SkippedFile};
pub use worker::{run_job, JobContext, Worker, WorkerStats};
