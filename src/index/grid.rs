//! Equal-angle RA/Dec grid indexer
//!
//! At depth `d` the sky is cut into `2^(d+2)` RA columns and `2^d` Dec rows,
//! giving `4 * 4^d` cells numbered row-major from the south pole:
//! `id = row * columns + column`.
//!
//! Cells are half-open on both axes (`[lo, hi)`), so a coordinate on a grid
//! line belongs to the cell above/east of it. Dec = +90 is folded into the
//! top row.

use super::coord::{Coordinate, ShardId};
use super::{check_depth, SpatialIndexer};
use crate::error::IndexError;
use std::collections::BTreeSet;
use std::ops::Range;

/// Grid indexer at a fixed depth
#[derive(Debug, Clone, Copy)]
pub struct GridIndexer {
    depth: u8,
    columns: u64,
    rows: u64,
}

impl GridIndexer {
    /// Registry name
    pub const NAME: &'static str = "grid";

    /// Create a grid indexer
    pub fn new(depth: u8) -> Result<Self, IndexError> {
        check_depth(depth)?;
        Ok(Self {
            depth,
            columns: 1 << (depth + 2),
            rows: 1 << depth,
        })
    }

    fn cell(&self, id: ShardId) -> Result<(u64, u64), IndexError> {
        if !self.contains(id) {
            return Err(self.unknown(id));
        }
        Ok((id.0 / self.columns, id.0 % self.columns))
    }

    fn id(&self, row: u64, column: u64) -> ShardId {
        ShardId(row * self.columns + column)
    }

    fn column_width(&self) -> f64 {
        360.0 / self.columns as f64
    }

    fn row_height(&self) -> f64 {
        180.0 / self.rows as f64
    }
}

impl SpatialIndexer for GridIndexer {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn depth(&self) -> u8 {
        self.depth
    }

    fn universe(&self) -> Range<u64> {
        0..self.columns * self.rows
    }

    fn locate(&self, coord: &Coordinate) -> ShardId {
        let column = ((coord.ra() / 360.0) * self.columns as f64).floor() as u64;
        let row = (((coord.dec() + 90.0) / 180.0) * self.rows as f64).floor() as u64;

        self.id(row.min(self.rows - 1), column.min(self.columns - 1))
    }

    fn neighbors(&self, id: ShardId) -> Result<BTreeSet<ShardId>, IndexError> {
        let (row, column) = self.cell(id)?;
        let mut found = BTreeSet::new();

        for dr in -1i64..=1 {
            let r = row as i64 + dr;
            if r < 0 || r >= self.rows as i64 {
                continue;
            }
            for dc in -1i64..=1 {
                let c = (column as i64 + dc).rem_euclid(self.columns as i64);
                found.insert(self.id(r as u64, c as u64));
            }
        }

        // Every cell in a polar row touches the pole
        if row == 0 || row == self.rows - 1 {
            for c in 0..self.columns {
                found.insert(self.id(row, c));
            }
        }

        found.remove(&id);
        Ok(found)
    }

    fn center(&self, id: ShardId) -> Result<Coordinate, IndexError> {
        let (row, column) = self.cell(id)?;
        let ra = (column as f64 + 0.5) * self.column_width();
        let dec = -90.0 + (row as f64 + 0.5) * self.row_height();
        Coordinate::new(ra, dec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_universe_is_four_times_four_to_the_depth() {
        for depth in 0..=5u8 {
            let grid = GridIndexer::new(depth).unwrap();
            assert_eq!(grid.universe_len(), 4 * 4usize.pow(depth as u32));
        }
    }

    #[test]
    fn test_half_open_tie_break() {
        let grid = GridIndexer::new(1).unwrap(); // 8 columns of 45deg, 2 rows of 90deg
        let on_line = Coordinate::new(45.0, 0.0).unwrap();
        // ra=45 belongs to column 1, dec=0 to row 1
        assert_eq!(grid.locate(&on_line), ShardId(8 + 1));

        let just_below = Coordinate::new(44.999_999, -0.000_001).unwrap();
        assert_eq!(grid.locate(&just_below), ShardId(0));
    }

    #[test]
    fn test_poles_fold_into_edge_rows() {
        let grid = GridIndexer::new(2).unwrap();
        let north = grid.locate(&Coordinate::new(0.0, 90.0).unwrap());
        let south = grid.locate(&Coordinate::new(0.0, -90.0).unwrap());
        assert_eq!(north, ShardId(3 * 16));
        assert_eq!(south, ShardId(0));
    }

    #[test]
    fn test_every_cell_reachable() {
        let grid = GridIndexer::new(3).unwrap();
        for raw in grid.universe() {
            let id = ShardId(raw);
            assert_eq!(grid.locate(&grid.center(id).unwrap()), id);
        }
    }

    #[test]
    fn test_neighbors_wrap_in_ra() {
        let grid = GridIndexer::new(2).unwrap(); // 16 x 4
        let id = ShardId(16); // row 1, column 0
        let neighbors = grid.neighbors(id).unwrap();
        assert_eq!(neighbors.len(), 8);
        assert!(neighbors.contains(&ShardId(15))); // row 0, column 15
        assert!(neighbors.contains(&ShardId(31))); // row 1, column 15
        assert!(neighbors.contains(&ShardId(47))); // row 2, column 15
    }

    #[test]
    fn test_polar_row_neighbors_include_whole_row() {
        let grid = GridIndexer::new(2).unwrap();
        let neighbors = grid.neighbors(ShardId(0)).unwrap();
        for c in 1..16 {
            assert!(neighbors.contains(&ShardId(c)));
        }
        assert!(!neighbors.contains(&ShardId(0)));
    }
}
