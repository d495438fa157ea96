//! Hierarchical Triangular Mesh indexer
//!
//! The sphere is split into 8 spherical triangles (trixels) spanned by the
//! six unit vectors along the coordinate axes. Each trixel is recursively
//! split into 4 children using the normalized midpoints of its edges:
//!
//! ```text
//!             v0
//!             /\
//!            /  \
//!        w2 /____\ w1        child 0: (v0, w2, w1)
//!          /\    /\          child 1: (v1, w0, w2)
//!         /  \  /  \         child 2: (v2, w1, w0)
//!        /____\/____\        child 3: (w0, w1, w2)
//!      v1     w0     v2
//! ```
//!
//! Root ids are 8..16 (S0..S3, N0..N3); a child id is `parent * 4 + k`.
//! At depth `d` every id lies in `[8 * 4^d, 16 * 4^d)`.
//!
//! Containment uses closed half-space tests and the first matching child
//! wins, so points on a shared edge resolve to the lower child index. If
//! rounding leaves a point outside every candidate, the candidate with the
//! largest (least negative) edge margin is chosen.

use super::coord::{add, cross, dot, normalize, Coordinate, ShardId, Vec3};
use super::{check_depth, SpatialIndexer};
use crate::error::IndexError;
use std::collections::BTreeSet;
use std::f64::consts::FRAC_PI_2;
use std::ops::Range;

/// Octahedron vertices
const VERTICES: [Vec3; 6] = [
    [0.0, 0.0, 1.0],
    [1.0, 0.0, 0.0],
    [0.0, 1.0, 0.0],
    [-1.0, 0.0, 0.0],
    [0.0, -1.0, 0.0],
    [0.0, 0.0, -1.0],
];

/// Vertex indices of the root trixels S0..S3, N0..N3 (counter-clockwise)
const ROOTS: [[usize; 3]; 8] = [
    [1, 5, 2],
    [2, 5, 3],
    [3, 5, 4],
    [4, 5, 1],
    [1, 0, 4],
    [4, 0, 3],
    [3, 0, 2],
    [2, 0, 1],
];

const FIRST_ROOT_ID: u64 = 8;

/// Directions sampled around each vertex when collecting neighbors
const RING_SAMPLES: usize = 48;

#[derive(Debug, Clone, Copy)]
struct Trixel {
    v: [Vec3; 3],
}

impl Trixel {
    fn root(k: usize) -> Self {
        let [a, b, c] = ROOTS[k];
        Self {
            v: [VERTICES[a], VERTICES[b], VERTICES[c]],
        }
    }

    /// Smallest signed distance (scaled) from `p` to the three edge planes.
    /// Non-negative means inside or on the boundary.
    fn margin(&self, p: Vec3) -> f64 {
        let [a, b, c] = self.v;
        dot(cross(a, b), p)
            .min(dot(cross(b, c), p))
            .min(dot(cross(c, a), p))
    }

    fn children(&self) -> [Trixel; 4] {
        let [v0, v1, v2] = self.v;
        let w0 = normalize(add(v1, v2));
        let w1 = normalize(add(v0, v2));
        let w2 = normalize(add(v0, v1));

        [
            Trixel { v: [v0, w2, w1] },
            Trixel { v: [v1, w0, w2] },
            Trixel { v: [v2, w1, w0] },
            Trixel { v: [w0, w1, w2] },
        ]
    }

    fn center(&self) -> Vec3 {
        let [a, b, c] = self.v;
        normalize(add(add(a, b), c))
    }
}

/// Index of the candidate containing `p` (first match, then best margin)
fn pick(candidates: &[Trixel], p: Vec3) -> usize {
    let mut best = 0;
    let mut best_margin = f64::NEG_INFINITY;

    for (k, trixel) in candidates.iter().enumerate() {
        let margin = trixel.margin(p);
        if margin >= 0.0 {
            return k;
        }
        if margin > best_margin {
            best = k;
            best_margin = margin;
        }
    }

    best
}

/// HTM indexer at a fixed depth
#[derive(Debug, Clone, Copy)]
pub struct HtmIndexer {
    depth: u8,
}

impl HtmIndexer {
    /// Registry name
    pub const NAME: &'static str = "htm";

    /// Create an indexer for `depth` levels below the 8 root trixels
    pub fn new(depth: u8) -> Result<Self, IndexError> {
        check_depth(depth)?;
        Ok(Self { depth })
    }

    /// Locate a unit vector
    pub fn locate_vector(&self, p: Vec3) -> ShardId {
        let roots: [Trixel; 8] = std::array::from_fn(Trixel::root);
        let k = pick(&roots, p);

        let mut id = FIRST_ROOT_ID + k as u64;
        let mut trixel = roots[k];

        for _ in 0..self.depth {
            let children = trixel.children();
            let k = pick(&children, p);
            id = id * 4 + k as u64;
            trixel = children[k];
        }

        ShardId(id)
    }

    fn trixel(&self, id: ShardId) -> Result<Trixel, IndexError> {
        if !self.contains(id) {
            return Err(self.unknown(id));
        }

        let shift = 2 * self.depth as u32;
        let root = (id.0 >> shift) - FIRST_ROOT_ID;
        let mut trixel = Trixel::root(root as usize);

        for level in (0..self.depth as u32).rev() {
            let k = ((id.0 >> (2 * level)) & 3) as usize;
            trixel = trixel.children()[k];
        }

        Ok(trixel)
    }

    /// Angular offset small enough to stay within adjacent cells
    fn sample_radius(&self) -> f64 {
        FRAC_PI_2 / f64::from(1u32 << self.depth) * 1e-3
    }
}

impl SpatialIndexer for HtmIndexer {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn depth(&self) -> u8 {
        self.depth
    }

    fn universe(&self) -> Range<u64> {
        let shift = 2 * self.depth as u32;
        (FIRST_ROOT_ID << shift)..((FIRST_ROOT_ID * 2) << shift)
    }

    fn locate(&self, coord: &Coordinate) -> ShardId {
        self.locate_vector(coord.to_unit_vector())
    }

    fn neighbors(&self, id: ShardId) -> Result<BTreeSet<ShardId>, IndexError> {
        let trixel = self.trixel(id)?;
        let eps = self.sample_radius();
        let (sin_eps, cos_eps) = eps.sin_cos();

        let mut found = BTreeSet::new();
        for vertex in trixel.v {
            // Tangent basis at the vertex
            let axis = if vertex[2].abs() < 0.9 {
                [0.0, 0.0, 1.0]
            } else {
                [1.0, 0.0, 0.0]
            };
            let e1 = normalize(cross(vertex, axis));
            let e2 = cross(vertex, e1);

            for step in 0..RING_SAMPLES {
                let theta = std::f64::consts::TAU * step as f64 / RING_SAMPLES as f64;
                let (sin_t, cos_t) = theta.sin_cos();
                let sample = [
                    vertex[0] * cos_eps + (e1[0] * cos_t + e2[0] * sin_t) * sin_eps,
                    vertex[1] * cos_eps + (e1[1] * cos_t + e2[1] * sin_t) * sin_eps,
                    vertex[2] * cos_eps + (e1[2] * cos_t + e2[2] * sin_t) * sin_eps,
                ];
                found.insert(self.locate_vector(normalize(sample)));
            }
        }

        found.remove(&id);
        Ok(found)
    }

    fn center(&self, id: ShardId) -> Result<Coordinate, IndexError> {
        Coordinate::from_vector(self.trixel(id)?.center())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_universe_sizes() {
        assert_eq!(HtmIndexer::new(0).unwrap().universe(), 8..16);
        assert_eq!(HtmIndexer::new(1).unwrap().universe(), 32..64);
        assert_eq!(HtmIndexer::new(7).unwrap().universe_len(), 131_072);
    }

    #[test]
    fn test_rejects_excessive_depth() {
        assert!(HtmIndexer::new(11).is_err());
    }

    #[test]
    fn test_root_assignment() {
        let htm = HtmIndexer::new(0).unwrap();
        // Octant x>0, y>0, z<0 is S0
        let c = Coordinate::new(45.0, -30.0).unwrap();
        assert_eq!(htm.locate(&c), ShardId(8));
        // Octant x>0, y>0, z>0 is N3
        let c = Coordinate::new(45.0, 30.0).unwrap();
        assert_eq!(htm.locate(&c), ShardId(15));
    }

    #[test]
    fn test_locate_is_deterministic() {
        let htm = HtmIndexer::new(7).unwrap();
        let c = Coordinate::new(201.365, -43.019).unwrap();
        let first = htm.locate(&c);
        for _ in 0..100 {
            assert_eq!(htm.locate(&c), first);
        }
        assert!(htm.contains(first));
    }

    #[test]
    fn test_every_cell_reachable() {
        for depth in 0..=3 {
            let htm = HtmIndexer::new(depth).unwrap();
            for raw in htm.universe() {
                let id = ShardId(raw);
                let center = htm.center(id).unwrap();
                assert_eq!(htm.locate(&center), id, "depth {} id {}", depth, raw);
            }
        }
    }

    #[test]
    fn test_boundary_points_resolve_consistently() {
        let htm = HtmIndexer::new(5).unwrap();
        // Points on great circles that form root edges
        for coord in [
            Coordinate::new(0.0, 0.0).unwrap(),
            Coordinate::new(90.0, 0.0).unwrap(),
            Coordinate::new(180.0, 45.0).unwrap(),
            Coordinate::new(270.0, -45.0).unwrap(),
            Coordinate::new(0.0, 90.0).unwrap(),
            Coordinate::new(0.0, -90.0).unwrap(),
        ] {
            let id = htm.locate(&coord);
            assert!(htm.contains(id));
            assert_eq!(htm.locate(&coord), id);
        }
    }

    #[test]
    fn test_neighbors_share_vertices() {
        let htm = HtmIndexer::new(4).unwrap();
        let id = htm.locate(&Coordinate::new(33.3, 12.1).unwrap());
        let neighbors = htm.neighbors(id).unwrap();

        assert!(!neighbors.contains(&id));
        // Interior trixels touch 3 edge neighbors and several vertex neighbors
        assert!(neighbors.len() >= 9, "got {}", neighbors.len());
        assert!(neighbors.len() <= 15, "got {}", neighbors.len());
        for n in &neighbors {
            assert!(htm.contains(*n));
            // Adjacency is symmetric
            assert!(htm.neighbors(*n).unwrap().contains(&id));
        }
    }

    #[test]
    fn test_neighbors_unknown_id() {
        let htm = HtmIndexer::new(2).unwrap();
        assert!(htm.neighbors(ShardId(3)).is_err());
    }
}
