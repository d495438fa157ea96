//! Shard files: storage, locking, and the append path
//!
//! Output catalog layout:
//!
//! ```text
//! <root>/
//!   catalog.json          manifest (indexer, depth, schema)
//!   ingest.db             run ledger
//!   shards/<id>.parquet   one file per spatial cell
//!   locks/<id>.lock       advisory lock files
//! ```

pub mod lock;
pub mod store;
pub mod writer;

pub use lock::{LockStats, ShardLockGuard, ShardLockTable};
pub use store::{arrow_schema, ParquetStore, ShardStore, ShardTable};
pub use writer::{ShardWriter, WriterStats};

use crate::index::ShardId;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::debug;

/// Paths inside an output catalog root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardLayout {
    root: PathBuf,
}

impl ShardLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn shard_dir(&self) -> PathBuf {
        self.root.join("shards")
    }

    pub fn lock_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.root.join("ingest.db")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join("catalog.json")
    }

    /// File holding one shard
    pub fn shard_path(&self, shard: ShardId, extension: &str) -> PathBuf {
        self.shard_dir().join(format!("{}.{}", shard, extension))
    }

    /// Create the shard and lock directories
    pub fn prepare(&self) -> io::Result<()> {
        fs::create_dir_all(self.shard_dir())?;
        fs::create_dir_all(self.lock_dir())
    }

    /// Existing shard files with the given extension, sorted by id
    pub fn list_shards(&self, extension: &str) -> io::Result<Vec<(ShardId, PathBuf)>> {
        let mut shards = Vec::new();

        let entries = match fs::read_dir(self.shard_dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(shards),
            Err(e) => return Err(e),
        };

        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(extension) {
                continue;
            }
            let id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok());
            if let Some(id) = id {
                shards.push((ShardId(id), path));
            }
        }

        shards.sort();
        Ok(shards)
    }

    /// Remove temp files left by processes killed mid-persist.
    ///
    /// Only files older than `min_age` are touched, so a concurrent run's
    /// in-flight writes are left alone.
    pub fn sweep_stale_temp_files(&self, min_age: Duration) -> io::Result<usize> {
        let entries = match fs::read_dir(self.shard_dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let now = SystemTime::now();
        let mut removed = 0;

        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with(store::TEMP_PREFIX) || !name.ends_with(store::TEMP_SUFFIX) {
                continue;
            }

            let age = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|t| now.duration_since(t).ok())
                .unwrap_or_default();

            if age >= min_age && fs::remove_file(entry.path()).is_ok() {
                debug!(path = %entry.path().display(), "Removed stale shard temp file");
                removed += 1;
            }
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_layout_paths() {
        let layout = ShardLayout::new("/data/catalog");
        assert_eq!(
            layout.shard_path(ShardId(131072), "parquet"),
            PathBuf::from("/data/catalog/shards/131072.parquet")
        );
        assert_eq!(layout.ledger_path(), PathBuf::from("/data/catalog/ingest.db"));
        assert_eq!(layout.manifest_path(), PathBuf::from("/data/catalog/catalog.json"));
    }

    #[test]
    fn test_list_shards_sorted_by_id() {
        let dir = tempdir().unwrap();
        let layout = ShardLayout::new(dir.path());
        layout.prepare().unwrap();

        for name in ["12.parquet", "9.parquet", "100.parquet", "notes.txt", "x.parquet"] {
            fs::write(layout.shard_dir().join(name), b"").unwrap();
        }

        let ids: Vec<u64> = layout
            .list_shards("parquet")
            .unwrap()
            .into_iter()
            .map(|(id, _)| id.value())
            .collect();
        assert_eq!(ids, vec![9, 12, 100]);
    }

    #[test]
    fn test_sweep_respects_age() {
        let dir = tempdir().unwrap();
        let layout = ShardLayout::new(dir.path());
        layout.prepare().unwrap();

        let temp = layout.shard_dir().join(".shard-abc.tmp");
        fs::write(&temp, b"partial").unwrap();
        fs::write(layout.shard_dir().join("9.parquet"), b"").unwrap();

        assert_eq!(layout.sweep_stale_temp_files(Duration::from_secs(3600)).unwrap(), 0);
        assert!(temp.exists());

        assert_eq!(layout.sweep_stale_temp_files(Duration::ZERO).unwrap(), 1);
        assert!(!temp.exists());
        assert!(layout.shard_dir().join("9.parquet").exists());
    }
}
