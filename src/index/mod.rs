//! Spatial indexing strategies
//!
//! An indexer maps a sky coordinate to the shard that owns it. Indexers are
//! pure: no I/O and no shared mutable state, so any number of workers can
//! call them concurrently.
//!
//! # Strategies
//!
//! - `htm`: Hierarchical Triangular Mesh. 8 root triangles, each split into
//!   4 children per level. Universe size `8 * 4^depth`.
//! - `grid`: equal-angle RA/Dec grid with `2^(depth+2)` columns and
//!   `2^depth` rows. Universe size `4 * 4^depth`.
//!
//! Both strategies break boundary ties with a fixed rule, so a coordinate
//! that sits exactly on a cell edge always lands in the same cell.

pub mod coord;
pub mod grid;
pub mod htm;

pub use coord::{Coordinate, ShardId, Vec3};
pub use grid::GridIndexer;
pub use htm::HtmIndexer;

use crate::error::IndexError;
use std::collections::BTreeSet;
use std::ops::Range;

/// Deepest subdivision any strategy accepts (lock table memory bound)
pub const MAX_INDEX_DEPTH: u8 = 10;

/// Default depth (131 072 HTM cells)
pub const DEFAULT_INDEX_DEPTH: u8 = 7;

/// A pluggable sky subdivision scheme at a fixed depth
pub trait SpatialIndexer: Send + Sync {
    /// Registry name of this strategy
    fn name(&self) -> &'static str;

    /// Subdivision depth
    fn depth(&self) -> u8;

    /// Dense range of valid shard ids
    fn universe(&self) -> Range<u64>;

    /// Shard owning a coordinate. Total and deterministic.
    fn locate(&self, coord: &Coordinate) -> ShardId;

    /// Cells sharing an edge or vertex with `id`, excluding `id` itself
    fn neighbors(&self, id: ShardId) -> Result<BTreeSet<ShardId>, IndexError>;

    /// A representative interior point of the cell
    fn center(&self, id: ShardId) -> Result<Coordinate, IndexError>;

    /// Number of cells in the universe
    fn universe_len(&self) -> usize {
        let range = self.universe();
        (range.end - range.start) as usize
    }

    /// Check whether `id` is a valid cell
    fn contains(&self, id: ShardId) -> bool {
        self.universe().contains(&id.0)
    }

    /// Offset of `id` within the universe
    fn slot(&self, id: ShardId) -> Option<usize> {
        let range = self.universe();
        range
            .contains(&id.0)
            .then(|| (id.0 - range.start) as usize)
    }

    /// Error for an id outside the universe
    fn unknown(&self, id: ShardId) -> IndexError {
        IndexError::UnknownShard {
            id,
            indexer: self.name(),
            depth: self.depth(),
        }
    }
}

pub(crate) fn check_depth(depth: u8) -> Result<(), IndexError> {
    if depth > MAX_INDEX_DEPTH {
        return Err(IndexError::DepthOutOfRange {
            depth,
            max: MAX_INDEX_DEPTH,
        });
    }
    Ok(())
}
