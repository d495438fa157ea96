//! skyshard - Spatially Sharded Astronomical Catalog Ingest
//!
//! A tool for loading very large astronomical source catalogs (CSV, TSV or
//! Parquet files with one detection per row) into a directory of Parquet
//! shards, one shard per cell of a spatial index over the sky. Many files
//! are ingested in parallel; rows for the same cell from different files are
//! appended to the same shard under a per-shard lock.
//!
//! # Features
//!
//! - **Pluggable Spatial Index**: Hierarchical Triangular Mesh or an
//!   equal-angle RA/Dec grid, selected by name at startup.
//!
//! - **Parallel Ingest**: A fixed pool of worker threads, one input file
//!   per job. A bad file is reported and never stops its siblings.
//!
//! - **Crash-Safe Appends**: Each shard append rewrites the shard into a
//!   temp file and renames it over the old one, so a shard on disk is always
//!   either the old or the new version.
//!
//! - **Run Ledger**: Per-file outcomes in SQLite, so re-runs skip finished
//!   files and hold back files that may have written rows.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   Input Files (csv/tsv/parquet)                 │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │
//!                               │ one IngestJob per file
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Worker Threads                             │
//! │  ┌─────────┐  ┌─────────┐  ┌─────────┐         ┌─────────┐      │
//! │  │Worker 1 │  │Worker 2 │  │Worker 3 │  ...    │Worker N │      │
//! │  │ convert │  │ convert │  │ convert │         │ convert │      │
//! │  │ locate  │  │ locate  │  │ locate  │         │ locate  │      │
//! │  └────┬────┘  └────┬────┘  └────┬────┘         └────┬────┘      │
//! │       │            │            │                    │          │
//! │       └────────────┼────────────┼────────────────────┘          │
//! │                    │ rows grouped by shard                      │
//! │                    ▼                                            │
//! │            ┌──────────────────────────┐                         │
//! │            │     ShardWriter          │                         │
//! │            │  - ShardLockTable        │                         │
//! │            │  - temp file + rename    │                         │
//! │            └──────────────────────────┘                         │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//!                    ┌──────────────────────┐
//!                    │  <root>/shards/      │
//!                    │  <id>.parquet        │
//!                    └──────────────────────┘
//! ```
//!
//! # Example
//!
//! ```bash
//! # Ingest a directory of CSV files at HTM depth 7
//! skyshard ingest /data/survey -o /catalog -w 16
//!
//! # Which shard holds a position?
//! skyshard locate --ra 187.7 --dec 12.4 --neighbors
//!
//! # Files from earlier runs that need a look
//! skyshard status -o /catalog
//! ```

pub mod config;
pub mod error;
pub mod index;
pub mod ingest;
pub mod ledger;
pub mod manifest;
pub mod progress;
pub mod record;
pub mod registry;
pub mod shard;
pub mod source;

pub use config::{CliArgs, IngestConfig};
pub use error::{IngestError, Result};
pub use index::{Coordinate, ShardId, SpatialIndexer};
pub use ingest::{IngestCoordinator, RunReport};
pub use registry::Registry;
