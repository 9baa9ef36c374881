//! Shot reduction: one recorded shot plus its trip's corrections become a
//! corrected `(distance, azimuth, inclination)` triple and a 3D displacement.
//!
//! Reduction order:
//!
//! 1. Convert every recorded value into meters/degrees and add the trip's
//!    instrument correction increments (tape correction, declination,
//!    compass and clino corrections).
//! 2. Average foresight and backsight inclination. A backsight that is not
//!    "corrected" was read from the far end and has its sign flipped first.
//! 3. Unless the shot is vertical, fold the instrument-height offset
//!    (`inch + instrument_height - target_height`) into the rise and adjust
//!    both inclinations by the resulting change in angle.
//! 4. Average foresight and backsight azimuth on the circle.

use log::warn;

use crate::types::{InvalidShotReason, Point3, ReduceConfig, ReduceError};
use crate::survey::{Shot, TripCorrections};
use crate::units::{AngleUnit, LengthUnit, UnitValue};

/// A fully corrected shot in canonical units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReducedShot {
    /// Slope distance in meters.
    pub distance: f64,
    /// Bearing in degrees clockwise from north, in `[0, 360)`.
    pub azimuth: f64,
    /// Degrees above horizontal, in `[-90, 90]`.
    pub inclination: f64,
}

impl ReducedShot {
    /// The displacement from the shot's from-station to its to-station
    /// (east, north, up).
    #[must_use]
    pub fn displacement(&self) -> Point3 {
        let (az_sin, az_cos) = self.azimuth.to_radians().sin_cos();
        let (inc_sin, inc_cos) = self.inclination.to_radians().sin_cos();
        let horizontal = self.distance * inc_cos;
        Point3::new(horizontal * az_sin, horizontal * az_cos, self.distance * inc_sin)
    }
}

/// Reduces shots for one trip.
#[derive(Debug, Clone, Copy)]
pub struct ShotReducer<'a> {
    corrections: &'a TripCorrections,
    vertical_tolerance: f64,
}

impl<'a> ShotReducer<'a> {
    #[must_use]
    pub const fn new(corrections: &'a TripCorrections, config: &ReduceConfig) -> Self {
        Self {
            corrections,
            vertical_tolerance: config.vertical_tolerance,
        }
    }

    /// Reduce one shot.
    ///
    /// # Errors
    ///
    /// - [`ReduceError::InvalidShot`] if the distance is missing, both
    ///   inclinations are missing, or both azimuths are missing on a
    ///   non-vertical shot.
    /// - [`ReduceError::UnitMismatch`] if a recorded value carries a unit
    ///   of the wrong kind (e.g. a distance in degrees).
    pub fn reduce(&self, shot: &Shot) -> Result<ReducedShot, ReduceError> {
        let c = self.corrections;

        let distance = shot
            .distance
            .ok_or(ReduceError::InvalidShot(InvalidShotReason::MissingDistance))?
            .get(LengthUnit::Meters)?
            + self.length(c.distance_correction)?;

        let front_inclination =
            self.angle(shot.front_inclination, c.inclination_unit, c.front_inclination_correction)?;
        let back_inclination =
            self.angle(shot.back_inclination, c.inclination_unit, c.back_inclination_correction)?;
        if front_inclination.is_none() && back_inclination.is_none() {
            return Err(ReduceError::InvalidShot(InvalidShotReason::MissingInclination));
        }
        self.check_inclination_tolerance(front_inclination, back_inclination);

        let offset = self.length(c.instrument_height_correction)?
            + height(shot.instrument_height)?
            - height(shot.target_height)?;
        let (distance, front_inclination, back_inclination) = apply_instrument_height(
            distance,
            front_inclination,
            back_inclination,
            offset,
            c.backsight_inclination_corrected,
            self.vertical_tolerance,
        );
        let inclination = average_inclination(
            front_inclination,
            back_inclination,
            c.backsight_inclination_corrected,
        )
        .ok_or(ReduceError::InvalidShot(InvalidShotReason::MissingInclination))?;

        let front_azimuth = self.angle(
            shot.front_azimuth,
            c.azimuth_unit,
            c.declination + c.front_azimuth_correction,
        )?;
        let back_azimuth = self.angle(
            shot.back_azimuth,
            c.azimuth_unit,
            c.declination + c.back_azimuth_correction,
        )?;
        self.check_azimuth_tolerance(front_azimuth, back_azimuth);

        let azimuth = match average_azimuth(
            front_azimuth,
            back_azimuth,
            c.backsight_azimuth_corrected,
        ) {
            Some(azimuth) => azimuth,
            None if is_vertical(inclination, self.vertical_tolerance) => 0.0,
            None => return Err(ReduceError::InvalidShot(InvalidShotReason::MissingAzimuth)),
        };

        Ok(ReducedShot {
            distance,
            azimuth,
            inclination,
        })
    }

    /// A trip-unit length correction in meters.
    fn length(&self, value: f64) -> Result<f64, ReduceError> {
        UnitValue::new(value, self.corrections.distance_unit).get(LengthUnit::Meters)
    }

    /// A recorded angle plus a trip-unit correction, in degrees.
    fn angle(
        &self,
        value: Option<UnitValue>,
        correction_unit: AngleUnit,
        correction: f64,
    ) -> Result<Option<f64>, ReduceError> {
        let Some(value) = value else {
            return Ok(None);
        };
        let correction = UnitValue::new(correction, correction_unit).get(AngleUnit::Degrees)?;
        Ok(Some(value.get(AngleUnit::Degrees)? + correction))
    }

    fn check_inclination_tolerance(&self, front: Option<f64>, back: Option<f64>) {
        let (Some(front), Some(back), Some(tolerance)) =
            (front, back, self.corrections.inclination_tolerance)
        else {
            return;
        };
        let back = if self.corrections.backsight_inclination_corrected {
            back
        } else {
            -back
        };
        let diff = (front - back).abs();
        if diff > tolerance {
            warn!(
                "foresight/backsight inclination differ by {diff:.2} deg (tolerance {tolerance} deg)"
            );
        }
    }

    fn check_azimuth_tolerance(&self, front: Option<f64>, back: Option<f64>) {
        let (Some(front), Some(back), Some(tolerance)) =
            (front, back, self.corrections.azimuth_tolerance)
        else {
            return;
        };
        let back = reciprocal_backsight(back, self.corrections.backsight_azimuth_corrected);
        let diff = (front - back).rem_euclid(360.0);
        let diff = diff.min(360.0 - diff);
        if diff > tolerance {
            warn!(
                "foresight/backsight azimuth differ by {diff:.2} deg (tolerance {tolerance} deg)"
            );
        }
    }
}

fn height(value: Option<UnitValue>) -> Result<f64, ReduceError> {
    value.map_or(Ok(0.0), |v| v.get(LengthUnit::Meters))
}

fn reciprocal_backsight(back: f64, corrected: bool) -> f64 {
    if corrected { back } else { back + 180.0 }
}

/// Normalize an angle in degrees into `[0, 360)`.
#[must_use]
pub fn normalize_azimuth(degrees: f64) -> f64 {
    let normalized = degrees.rem_euclid(360.0);
    // rem_euclid rounds tiny negatives up to exactly 360.
    if normalized >= 360.0 { 0.0 } else { normalized }
}

/// Whether `inclination` (degrees) is within `tolerance` of straight up or
/// straight down.
#[must_use]
pub fn is_vertical(inclination: f64, tolerance: f64) -> bool {
    (inclination.abs() - 90.0).abs() < tolerance
}

/// Average foresight and backsight inclination, in degrees.
///
/// An uncorrected backsight is negated before use. Returns `None` when
/// neither side is present.
#[must_use]
pub fn average_inclination(
    front: Option<f64>,
    back: Option<f64>,
    backsight_corrected: bool,
) -> Option<f64> {
    let back = back.map(|b| if backsight_corrected { b } else { -b });
    match (front, back) {
        (Some(front), Some(back)) => Some(f64::midpoint(front, back)),
        (Some(single), None) | (None, Some(single)) => Some(single),
        (None, None) => None,
    }
}

/// Average foresight and backsight azimuth on the circle, in `[0, 360)`.
///
/// An uncorrected backsight is turned 180 degrees first. Returns `None`
/// when neither side is present.
#[must_use]
pub fn average_azimuth(
    front: Option<f64>,
    back: Option<f64>,
    backsight_corrected: bool,
) -> Option<f64> {
    let back = back.map(|b| reciprocal_backsight(b, backsight_corrected));
    match (front, back) {
        (Some(front), Some(back)) => {
            let (fs, fc) = front.to_radians().sin_cos();
            let (bs, bc) = back.to_radians().sin_cos();
            Some(normalize_azimuth((fs + bs).atan2(fc + bc).to_degrees()))
        }
        (Some(single), None) | (None, Some(single)) => Some(normalize_azimuth(single)),
        (None, None) => None,
    }
}

/// Fold an instrument-height offset (meters) into a shot.
///
/// Returns the corrected distance and both inclinations adjusted by the
/// change in angle the offset causes. Nothing changes when the offset is
/// zero, when no inclination is present, or when the shot is vertical.
#[must_use]
pub fn apply_instrument_height(
    distance: f64,
    front: Option<f64>,
    back: Option<f64>,
    offset: f64,
    backsight_corrected: bool,
    vertical_tolerance: f64,
) -> (f64, Option<f64>, Option<f64>) {
    if offset.abs() < f64::MIN_POSITIVE {
        return (distance, front, back);
    }
    let Some(inclination) = average_inclination(front, back, backsight_corrected) else {
        return (distance, front, back);
    };
    if is_vertical(inclination, vertical_tolerance) {
        return (distance, front, back);
    }

    let (inc_sin, inc_cos) = inclination.to_radians().sin_cos();
    let run = distance * inc_cos;
    let rise = distance.mul_add(inc_sin, offset);
    let delta = rise.atan2(run).to_degrees() - inclination;

    let front = front.map(|f| f + delta);
    let back = back.map(|b| if backsight_corrected { b + delta } else { b - delta });
    (run.hypot(rise), front, back)
}

/// Convert a rectangular displacement into a polar shot.
///
/// The inverse of [`ReducedShot::displacement`].
#[must_use]
pub fn rect_to_polar(north: f64, east: f64, up: f64) -> ReducedShot {
    let horizontal = north.hypot(east);
    ReducedShot {
        distance: horizontal.hypot(up),
        azimuth: normalize_azimuth(east.atan2(north).to_degrees()),
        inclination: up.atan2(horizontal).to_degrees(),
    }
}
