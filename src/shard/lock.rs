//! Per-shard mutual exclusion
//!
//! Two layers guard every shard:
//! - an in-process mutex slot, preallocated for every id in the universe
//! - an exclusive advisory lock on `<locks>/<id>.lock`, which other
//!   processes (and other hosts on a lock-aware filesystem) respect
//!
//! The kernel drops advisory locks when a process dies, so a crashed run
//! never leaves a lock behind for the next one. Lock files themselves are
//! left in place; they are empty and reused.

use crate::error::{ShardError, ShardResult};
use crate::index::ShardId;
use parking_lot::{Mutex, MutexGuard};
use std::fs::{self, File, OpenOptions, TryLockError};
use std::io;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Lock counters
#[derive(Debug, Default)]
pub struct LockStats {
    /// Successful acquisitions
    pub acquisitions: AtomicU64,

    /// Acquisitions that had to wait for another holder
    pub contended: AtomicU64,
}

impl LockStats {
    fn record_acquire(&self, contended: bool) {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        if contended {
            self.contended.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::Relaxed)
    }

    pub fn contended(&self) -> u64 {
        self.contended.load(Ordering::Relaxed)
    }
}

/// Lock table covering every shard id of one catalog
pub struct ShardLockTable {
    lock_dir: PathBuf,
    universe: Range<u64>,
    slots: Vec<Mutex<()>>,
    stats: LockStats,
}

impl ShardLockTable {
    /// Allocate one slot per id in `universe` and create the lock directory
    pub fn new(lock_dir: impl Into<PathBuf>, universe: Range<u64>) -> io::Result<Self> {
        let lock_dir = lock_dir.into();
        fs::create_dir_all(&lock_dir)?;

        let size = (universe.end - universe.start) as usize;
        let mut slots = Vec::with_capacity(size);
        slots.resize_with(size, || Mutex::new(()));

        Ok(Self {
            lock_dir,
            universe,
            slots,
            stats: LockStats::default(),
        })
    }

    /// Number of shard ids covered
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn lock_dir(&self) -> &Path {
        &self.lock_dir
    }

    pub fn stats(&self) -> &LockStats {
        &self.stats
    }

    /// Path of the advisory lock file for a shard
    pub fn lock_path(&self, shard: ShardId) -> PathBuf {
        self.lock_dir.join(format!("{}.lock", shard))
    }

    /// Block until the shard is free, then hold it until the guard drops
    pub fn acquire(&self, shard: ShardId) -> ShardResult<ShardLockGuard<'_>> {
        let slot = self.slot(shard)?;

        let (guard, contended) = match slot.try_lock() {
            Some(guard) => (guard, false),
            None => (slot.lock(), true),
        };

        let path = self.lock_path(shard);
        let file = open_lock_file(shard, &path)?;

        // Another process may hold the file lock even when the slot was free
        let contended = match file.try_lock() {
            Ok(()) => contended,
            Err(TryLockError::WouldBlock) => {
                file.lock().map_err(|e| lock_error(shard, &path, e))?;
                true
            }
            Err(TryLockError::Error(e)) => return Err(lock_error(shard, &path, e)),
        };

        self.stats.record_acquire(contended);
        trace!(shard = %shard, contended, "Shard lock acquired");

        Ok(ShardLockGuard {
            shard,
            file,
            _slot: guard,
        })
    }

    /// Take the lock only if nobody holds it, in this process or another
    pub fn try_acquire(&self, shard: ShardId) -> ShardResult<Option<ShardLockGuard<'_>>> {
        let slot = self.slot(shard)?;

        let guard = match slot.try_lock() {
            Some(guard) => guard,
            None => return Ok(None),
        };

        let path = self.lock_path(shard);
        let file = open_lock_file(shard, &path)?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => return Ok(None),
            Err(TryLockError::Error(e)) => return Err(lock_error(shard, &path, e)),
        }

        self.stats.record_acquire(false);

        Ok(Some(ShardLockGuard {
            shard,
            file,
            _slot: guard,
        }))
    }

    fn slot(&self, shard: ShardId) -> ShardResult<&Mutex<()>> {
        if !self.universe.contains(&shard.value()) {
            return Err(ShardError::OutOfUniverse { shard });
        }
        Ok(&self.slots[(shard.value() - self.universe.start) as usize])
    }
}

fn open_lock_file(shard: ShardId, path: &Path) -> ShardResult<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| lock_error(shard, path, e))
}

fn lock_error(shard: ShardId, path: &Path, err: io::Error) -> ShardError {
    ShardError::Lock {
        shard,
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

/// Held shard lock. Dropping it releases the file lock, then the slot.
pub struct ShardLockGuard<'a> {
    shard: ShardId,
    file: File,
    _slot: MutexGuard<'a, ()>,
}

impl ShardLockGuard<'_> {
    pub fn shard(&self) -> ShardId {
        self.shard
    }
}

impl Drop for ShardLockGuard<'_> {
    fn drop(&mut self) {
        // Closing the descriptor would release it too; unlock first so the
        // slot is never free while the file lock is still held.
        let _ = self.file.unlock();
        trace!(shard = %self.shard, "Shard lock released");
    }
}
