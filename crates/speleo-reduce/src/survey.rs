//! Raw survey input: regions, caves, trips, chunks and shots.
//!
//! These are plain data records. Nothing here is reduced or validated on
//! construction; structurally invalid chunks and incomplete shots are
//! carried as recorded and filtered by the pipeline.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{Point3, StationName};
use crate::units::{AngleUnit, LengthUnit, UnitValue};

/// One measurement between two consecutive stations of a chunk.
///
/// Every field is optional: field books routinely have gaps, and whether
/// the gaps are fatal is decided by [`ShotReducer`](crate::shot::ShotReducer).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Shot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<UnitValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub front_azimuth: Option<UnitValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub back_azimuth: Option<UnitValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub front_inclination: Option<UnitValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub back_inclination: Option<UnitValue>,
    /// Height of the instrument above the from-station.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instrument_height: Option<UnitValue>,
    /// Height of the target above the to-station.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_height: Option<UnitValue>,
}

impl Shot {
    /// Build a shot from raw field-book numbers, tagging each with the unit
    /// the trip records it in.
    #[must_use]
    pub fn recorded(
        corrections: &TripCorrections,
        distance: Option<f64>,
        front_azimuth: Option<f64>,
        back_azimuth: Option<f64>,
        front_inclination: Option<f64>,
        back_inclination: Option<f64>,
    ) -> Self {
        let length = |v: f64| UnitValue::new(v, corrections.distance_unit);
        let azimuth = |v: f64| UnitValue::new(v, corrections.azimuth_unit);
        let inclination = |v: f64| UnitValue::new(v, corrections.inclination_unit);
        Self {
            distance: distance.map(length),
            front_azimuth: front_azimuth.map(azimuth),
            back_azimuth: back_azimuth.map(azimuth),
            front_inclination: front_inclination.map(inclination),
            back_inclination: back_inclination.map(inclination),
            instrument_height: None,
            target_height: None,
        }
    }

    /// A foresight-only shot in meters and degrees.
    #[must_use]
    pub const fn foresight(distance: f64, azimuth: f64, inclination: f64) -> Self {
        Self {
            distance: Some(UnitValue::meters(distance)),
            front_azimuth: Some(UnitValue::degrees(azimuth)),
            back_azimuth: None,
            front_inclination: Some(UnitValue::degrees(inclination)),
            back_inclination: None,
            instrument_height: None,
            target_height: None,
        }
    }

    /// Attach instrument and target heights.
    #[must_use]
    pub const fn with_heights(
        mut self,
        instrument_height: Option<UnitValue>,
        target_height: Option<UnitValue>,
    ) -> Self {
        self.instrument_height = instrument_height;
        self.target_height = target_height;
        self
    }

    /// Whether the shot has enough data to be reduced at all: a distance
    /// and at least one inclination.
    ///
    /// A non-vertical shot without any azimuth still fails reduction.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.distance.is_some()
            && (self.front_inclination.is_some() || self.back_inclination.is_some())
    }
}

/// An ordered run of stations interleaved with shots, surveyed on one trip.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SurveyChunk {
    pub stations: Vec<StationName>,
    pub shots: Vec<Shot>,
}

impl SurveyChunk {
    #[must_use]
    pub const fn new(stations: Vec<StationName>, shots: Vec<Shot>) -> Self {
        Self { stations, shots }
    }

    /// Build a chunk from a starting station followed by `(shot, station)`
    /// legs.
    #[must_use]
    pub fn from_legs<S: Into<StationName>>(
        first: S,
        legs: impl IntoIterator<Item = (Shot, S)>,
    ) -> Self {
        let mut stations = vec![first.into()];
        let mut shots = Vec::new();
        for (shot, station) in legs {
            shots.push(shot);
            stations.push(station.into());
        }
        Self { stations, shots }
    }

    /// At least two stations and exactly one shot between each pair.
    #[must_use]
    pub const fn is_structurally_valid(&self) -> bool {
        self.stations.len() >= 2 && self.shots.len() + 1 == self.stations.len()
    }

    /// The empty two-station row a data-entry form leaves behind.
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.stations.len() == 2
            && self.stations.iter().all(StationName::is_empty)
            && self.shots.iter().all(|shot| !shot.is_valid())
    }
}

/// Per-trip instrument, unit and convention settings.
///
/// Correction values (`declination`, `*_correction`) are expressed in the
/// trip's own units: lengths in `distance_unit`, bearings in `azimuth_unit`,
/// inclinations in `inclination_unit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TripCorrections {
    pub distance_unit: LengthUnit,
    pub azimuth_unit: AngleUnit,
    pub inclination_unit: AngleUnit,

    /// Backsight azimuths were read as the foresight bearing rather than
    /// its reciprocal.
    pub backsight_azimuth_corrected: bool,
    /// Backsight inclinations carry the foresight sign.
    pub backsight_inclination_corrected: bool,

    /// Magnetic declination added to every azimuth.
    pub declination: f64,
    /// Tape correction added to every distance.
    pub distance_correction: f64,
    pub front_azimuth_correction: f64,
    pub back_azimuth_correction: f64,
    pub front_inclination_correction: f64,
    pub back_inclination_correction: f64,
    /// Constant instrument-height offset added to the rise of every shot.
    pub instrument_height_correction: f64,

    /// Warn when foresight and backsight azimuth disagree by more than this.
    pub azimuth_tolerance: Option<f64>,
    /// Warn when foresight and backsight inclination disagree by more than
    /// this.
    pub inclination_tolerance: Option<f64>,
}

impl TripCorrections {
    /// Default foresight/backsight disagreement tolerance, in degrees.
    pub const DEFAULT_TOLERANCE: f64 = 2.0;
}

impl Default for TripCorrections {
    fn default() -> Self {
        Self {
            distance_unit: LengthUnit::Meters,
            azimuth_unit: AngleUnit::Degrees,
            inclination_unit: AngleUnit::Degrees,
            backsight_azimuth_corrected: false,
            backsight_inclination_corrected: false,
            declination: 0.0,
            distance_correction: 0.0,
            front_azimuth_correction: 0.0,
            back_azimuth_correction: 0.0,
            front_inclination_correction: 0.0,
            back_inclination_correction: 0.0,
            instrument_height_correction: 0.0,
            azimuth_tolerance: Some(Self::DEFAULT_TOLERANCE),
            inclination_tolerance: Some(Self::DEFAULT_TOLERANCE),
        }
    }
}

/// One survey trip: its settings and the chunks recorded on it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Trip {
    pub name: String,
    #[serde(default)]
    pub corrections: TripCorrections,
    #[serde(default)]
    pub chunks: Vec<SurveyChunk>,
}

impl Trip {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Builder-style chunk append.
    #[must_use]
    pub fn with_chunk(mut self, chunk: SurveyChunk) -> Self {
        self.chunks.push(chunk);
        self
    }
}

/// A cave record.
///
/// `length`, `depth` and `station_positions` are outputs: they are
/// overwritten by [`LinePlotResult::apply_to`](crate::LinePlotResult::apply_to).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Cave {
    pub name: String,
    #[serde(default)]
    pub trips: Vec<Trip>,
    #[serde(default)]
    pub length: f64,
    #[serde(default)]
    pub depth: f64,
    #[serde(default)]
    pub station_positions: BTreeMap<StationName, Point3>,
}

impl Cave {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_trip(mut self, trip: Trip) -> Self {
        self.trips.push(trip);
        self
    }
}

/// Ordered caves, the unit of input for a reduction run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Region {
    pub caves: Vec<Cave>,
}
