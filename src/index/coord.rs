//! Sky coordinates and shard identifiers

use crate::error::IndexError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unit vector on the celestial sphere
pub type Vec3 = [f64; 3];

/// Stable identifier of one spatial cell at a fixed index depth.
///
/// Ids are dense within the indexer's universe, so they double as slot
/// offsets for the lock table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardId(pub u64);

impl ShardId {
    /// Raw numeric value
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Equatorial position in degrees.
///
/// Right ascension lies in `[0, 360)`, declination in `[-90, 90]`.
/// Any epoch or proper-motion correction happens before construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    ra: f64,
    dec: f64,
}

impl Coordinate {
    /// Create a validated coordinate
    pub fn new(ra: f64, dec: f64) -> Result<Self, IndexError> {
        let invalid = |reason: &str| IndexError::InvalidCoordinate {
            ra,
            dec,
            reason: reason.to_string(),
        };

        if !ra.is_finite() || !dec.is_finite() {
            return Err(invalid("non-finite value"));
        }
        if !(0.0..360.0).contains(&ra) {
            return Err(invalid("ra must be in [0, 360)"));
        }
        if !(-90.0..=90.0).contains(&dec) {
            return Err(invalid("dec must be in [-90, 90]"));
        }

        Ok(Self { ra, dec })
    }

    /// Right ascension in degrees
    pub fn ra(&self) -> f64 {
        self.ra
    }

    /// Declination in degrees
    pub fn dec(&self) -> f64 {
        self.dec
    }

    /// Cartesian unit vector
    pub fn to_unit_vector(&self) -> Vec3 {
        let (ra, dec) = (self.ra.to_radians(), self.dec.to_radians());
        let cos_dec = dec.cos();
        [cos_dec * ra.cos(), cos_dec * ra.sin(), dec.sin()]
    }

    /// Convert a (not necessarily normalized) vector back to a coordinate
    pub fn from_vector(v: Vec3) -> Result<Self, IndexError> {
        let norm = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
        if norm == 0.0 || !norm.is_finite() {
            return Err(IndexError::InvalidCoordinate {
                ra: f64::NAN,
                dec: f64::NAN,
                reason: "zero-length direction vector".into(),
            });
        }

        let dec = (v[2] / norm).clamp(-1.0, 1.0).asin().to_degrees();
        let mut ra = v[1].atan2(v[0]).to_degrees();
        if ra < 0.0 {
            ra += 360.0;
        }
        // atan2 can round up to exactly 360 for tiny negative angles
        if ra >= 360.0 {
            ra = 0.0;
        }

        Self::new(ra, dec)
    }
}

pub(crate) fn dot(a: Vec3, b: Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

pub(crate) fn cross(a: Vec3, b: Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

pub(crate) fn normalize(v: Vec3) -> Vec3 {
    let n = dot(v, v).sqrt();
    [v[0] / n, v[1] / n, v[2] / n]
}

pub(crate) fn add(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}
