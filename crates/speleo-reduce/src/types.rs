//! Shared types for the speleo reduction pipeline.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Add, Neg, Sub};

use serde::{Deserialize, Serialize};

use crate::loops::LoopClassifierKind;
use crate::survey::Region;
use crate::units::Quantity;

/// A point (or displacement) in survey space, in meters.
///
/// Axes follow the usual survey convention: `x` points east, `y` points
/// north, `z` points up.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point3 {
    /// East.
    pub x: f64,
    /// North.
    pub y: f64,
    /// Up.
    pub z: f64,
}

impl Point3 {
    /// The origin, where the root station of each cave is placed.
    pub const ORIGIN: Self = Self::new(0.0, 0.0, 0.0);

    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Length of this vector.
    #[must_use]
    pub fn length(self) -> f64 {
        self.z.mul_add(self.z, self.x.mul_add(self.x, self.y * self.y)).sqrt()
    }

    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        (other - self).length()
    }
}

impl Add for Point3 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Point3 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Neg for Point3 {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

/// A survey station name.
///
/// Station names are matched case-insensitively everywhere ("A1" and "a1"
/// are the same station); equality, hashing and ordering all fold case,
/// while the original spelling is preserved for display.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StationName(String);

impl StationName {
    /// Create a station name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The name as originally spelled.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the name is empty (an unnamed placeholder station).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    fn folded(&self) -> impl Iterator<Item = char> + '_ {
        self.0.chars().flat_map(char::to_lowercase)
    }
}

impl PartialEq for StationName {
    fn eq(&self, other: &Self) -> bool {
        self.folded().eq(other.folded())
    }
}

impl Eq for StationName {}

impl Hash for StationName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for c in self.folded() {
            c.hash(state);
        }
        state.write_u8(0xff);
    }
}

impl PartialOrd for StationName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StationName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.folded().cmp(other.folded())
    }
}

impl fmt::Display for StationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StationName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for StationName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Why a shot could not be reduced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvalidShotReason {
    /// No distance was recorded.
    MissingDistance,
    /// Neither foresight nor backsight inclination was recorded.
    MissingInclination,
    /// Neither azimuth was recorded and the shot is not vertical.
    MissingAzimuth,
}

impl fmt::Display for InvalidShotReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingDistance => f.write_str("no distance recorded"),
            Self::MissingInclination => f.write_str("no foresight or backsight inclination"),
            Self::MissingAzimuth => f.write_str("no azimuth on a non-vertical shot"),
        }
    }
}

/// Errors that can occur during survey reduction.
///
/// None of these are meant for end users directly; callers decide how to
/// present them. Only [`UnitMismatch`](Self::UnitMismatch) and
/// [`InvalidConfig`](Self::InvalidConfig) are returned from public
/// conversion/configuration entry points; the pipeline itself logs and
/// skips invalid shots and missing positions and keeps going.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum ReduceError {
    /// Conversion between units of different quantity kinds.
    #[error("cannot convert a {from} value into a {to} unit")]
    UnitMismatch {
        /// Kind of the source unit.
        from: Quantity,
        /// Kind of the requested unit.
        to: Quantity,
    },

    /// The shot lacks the measurements needed to reduce it.
    #[error("invalid shot: {0}")]
    InvalidShot(InvalidShotReason),

    /// A station referenced by a shot has no resolved position.
    #[error("station {station} has no resolved position")]
    MissingStationPosition {
        /// The unresolved station.
        station: String,
    },

    /// A split was requested on a station that is not interior to the edge.
    #[error("cannot split edge on station {station}: not an interior station")]
    UnsplittableStation {
        /// The station the split was requested on.
        station: String,
    },

    /// A stage observed cancellation and stopped without a result.
    #[error("reduction was cancelled")]
    Cancelled,

    /// Reduction configuration is invalid.
    #[error("invalid reduction configuration: {0}")]
    InvalidConfig(String),
}

/// Configuration for a reduction run.
///
/// Per-trip instrument and unit settings live on each
/// [`Trip`](crate::survey::Trip) as [`TripCorrections`](crate::survey::TripCorrections);
/// this struct holds the settings that apply to the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReduceConfig {
    /// Which algorithm labels edges as loop members or legs.
    pub loop_classifier: LoopClassifierKind,

    /// Shots whose inclination is within this many degrees of +-90 are
    /// treated as vertical and skip instrument-height correction.
    pub vertical_tolerance: f64,
}

impl ReduceConfig {
    /// Default loop classification strategy.
    pub const DEFAULT_LOOP_CLASSIFIER: LoopClassifierKind = LoopClassifierKind::LowLink;

    /// Default vertical tolerance in degrees.
    pub const DEFAULT_VERTICAL_TOLERANCE: f64 = 0.0001;

    /// Check the configuration for values the pipeline cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`ReduceError::InvalidConfig`] if `vertical_tolerance` is not
    /// a finite value in `[0, 90)`.
    pub fn validate(&self) -> Result<(), ReduceError> {
        if !self.vertical_tolerance.is_finite()
            || self.vertical_tolerance < 0.0
            || self.vertical_tolerance >= 90.0
        {
            return Err(ReduceError::InvalidConfig(format!(
                "vertical_tolerance must be in [0, 90) degrees, got {}",
                self.vertical_tolerance
            )));
        }
        Ok(())
    }
}

impl Default for ReduceConfig {
    fn default() -> Self {
        Self {
            loop_classifier: Self::DEFAULT_LOOP_CLASSIFIER,
            vertical_tolerance: Self::DEFAULT_VERTICAL_TOLERANCE,
        }
    }
}

/// Aggregate statistics for one cave after position resolution.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CaveStats {
    /// Sum of the 3D length of every drawn shot, in meters.
    pub length: f64,
    /// Vertical extent (max z - min z) of all resolved stations, in meters.
    pub depth: f64,
    /// Number of stations with a resolved position.
    pub station_count: usize,
    /// Number of segments appended to the index buffer.
    pub segment_count: usize,
    /// Shots skipped because they could not be reduced.
    pub skipped_invalid_shots: usize,
    /// Shots skipped because an endpoint was never reached from the root.
    pub skipped_unreachable_shots: usize,
    /// Stations that could not be reached from the root.
    pub unreachable_stations: Vec<String>,
    /// Edges participating in at least one loop.
    pub loop_edge_count: usize,
    /// Edges that are not part of any loop.
    pub leg_edge_count: usize,
    /// Largest disagreement (meters) between the traversal position of a
    /// station and a second shot leading back into it. Zero without loops.
    pub max_misclosure: f64,
}

/// Line plot output for one cave.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CavePlot {
    /// Cave name, copied from the input.
    pub name: String,
    /// Length, depth and bookkeeping counts.
    pub stats: CaveStats,
    /// Index of every resolved station into [`LinePlotResult::points`].
    pub station_indices: BTreeMap<StationName, u32>,
    /// Trip indices each station was surveyed on.
    pub station_trips: BTreeMap<StationName, Vec<usize>>,
}

/// Result of a reduction run: render-ready line geometry for the whole
/// region plus per-cave statistics.
///
/// Produced fresh by every run and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LinePlotResult {
    /// Every resolved station position, all caves concatenated.
    pub points: Vec<Point3>,
    /// Pairs of indices into `points`, one pair per drawn shot.
    pub indices: Vec<u32>,
    /// Per-cave output, in input order.
    pub caves: Vec<CavePlot>,
}

impl LinePlotResult {
    /// Number of line segments in the index buffer.
    #[must_use]
    pub const fn segment_count(&self) -> usize {
        self.indices.len() / 2
    }

    /// Flat `[x, y, z, x, y, z, ...]` vertex buffer for renderers.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn vertex_data(&self) -> Vec<f32> {
        self.points
            .iter()
            .flat_map(|p| [p.x as f32, p.y as f32, p.z as f32])
            .collect()
    }

    /// Resolved position of `station` in the cave at `cave_index`.
    #[must_use]
    pub fn position(&self, cave_index: usize, station: &StationName) -> Option<Point3> {
        let index = *self.caves.get(cave_index)?.station_indices.get(station)?;
        self.points.get(index as usize).copied()
    }

    /// Write length, depth and station positions back into the caves of
    /// `region`.
    ///
    /// Caves are matched by position; caves beyond the result's cave count
    /// are left untouched.
    pub fn apply_to(&self, region: &mut Region) {
        for (cave, plot) in region.caves.iter_mut().zip(&self.caves) {
            cave.length = plot.stats.length;
            cave.depth = plot.stats.depth;
            cave.station_positions = plot
                .station_indices
                .iter()
                .filter_map(|(name, &index)| {
                    self.points
                        .get(index as usize)
                        .map(|p| (name.clone(), *p))
                })
                .collect();
        }
    }
}
