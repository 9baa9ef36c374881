//! Unitized values: magnitudes that carry their unit with them.
//!
//! Every recorded survey number (a tape reading, a compass bearing, a
//! clinometer angle) is meaningless without its unit, and cave surveys
//! mix units freely between trips. [`UnitValue`] keeps the unit tag next
//! to the magnitude so arithmetic between two values is unit-checked:
//! converting a length into an angle unit fails with
//! [`ReduceError::UnitMismatch`] instead of silently producing garbage.
//!
//! Canonical units are meters for length and degrees for angle.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::ReduceError;

/// The physical kind of a unit. Conversions are only defined within a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantity {
    /// Distances, heights, offsets.
    Length,
    /// Bearings and inclinations.
    Angle,
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Length => f.write_str("length"),
            Self::Angle => f.write_str("angle"),
        }
    }
}

/// Units of length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LengthUnit {
    /// Canonical length unit.
    #[default]
    Meters,
    Centimeters,
    Kilometers,
    /// International foot (exactly 0.3048 m).
    Feet,
    Yards,
    Inches,
}

impl LengthUnit {
    /// Every supported length unit.
    pub const ALL: [Self; 6] = [
        Self::Meters,
        Self::Centimeters,
        Self::Kilometers,
        Self::Feet,
        Self::Yards,
        Self::Inches,
    ];

    /// How many meters one of this unit spans.
    #[must_use]
    pub const fn meters_per_unit(self) -> f64 {
        match self {
            Self::Meters => 1.0,
            Self::Centimeters => 0.01,
            Self::Kilometers => 1000.0,
            Self::Feet => 0.3048,
            Self::Yards => 0.9144,
            Self::Inches => 0.0254,
        }
    }

    /// Short symbol used in reports.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Meters => "m",
            Self::Centimeters => "cm",
            Self::Kilometers => "km",
            Self::Feet => "ft",
            Self::Yards => "yd",
            Self::Inches => "in",
        }
    }
}

/// Units of angle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AngleUnit {
    /// Canonical angle unit.
    #[default]
    Degrees,
    /// 400 grads per full circle.
    Grads,
    /// 6400 mils per full circle.
    Mils,
    Radians,
}

impl AngleUnit {
    /// Every supported angle unit.
    pub const ALL: [Self; 4] = [Self::Degrees, Self::Grads, Self::Mils, Self::Radians];

    /// How many degrees one of this unit spans.
    #[must_use]
    pub const fn degrees_per_unit(self) -> f64 {
        match self {
            Self::Degrees => 1.0,
            Self::Grads => 0.9,
            Self::Mils => 360.0 / 6400.0,
            Self::Radians => 180.0 / std::f64::consts::PI,
        }
    }

    /// Short symbol used in reports.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Degrees => "deg",
            Self::Grads => "grad",
            Self::Mils => "mil",
            Self::Radians => "rad",
        }
    }
}

/// Any supported unit, tagged with its quantity kind.
///
/// Serialized untagged so a value reads as `{"value": 10.0, "unit": "feet"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Unit {
    Length(LengthUnit),
    Angle(AngleUnit),
}

impl Unit {
    /// The quantity kind this unit measures.
    #[must_use]
    pub const fn quantity(self) -> Quantity {
        match self {
            Self::Length(_) => Quantity::Length,
            Self::Angle(_) => Quantity::Angle,
        }
    }

    /// Size of one of this unit in its kind's canonical unit.
    const fn canonical_factor(self) -> f64 {
        match self {
            Self::Length(u) => u.meters_per_unit(),
            Self::Angle(u) => u.degrees_per_unit(),
        }
    }

    /// Short symbol used in reports.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Length(u) => u.symbol(),
            Self::Angle(u) => u.symbol(),
        }
    }
}

impl From<LengthUnit> for Unit {
    fn from(unit: LengthUnit) -> Self {
        Self::Length(unit)
    }
}

impl From<AngleUnit> for Unit {
    fn from(unit: AngleUnit) -> Self {
        Self::Angle(unit)
    }
}

/// Convert `magnitude` from unit `from` into unit `to`.
///
/// # Errors
///
/// Returns [`ReduceError::UnitMismatch`] if the two units measure
/// different quantities.
///
/// # Examples
///
/// ```
/// use speleo_reduce::units::{convert, LengthUnit};
///
/// let meters = convert(10.0, LengthUnit::Feet.into(), LengthUnit::Meters.into()).unwrap();
/// assert!((meters - 3.048).abs() < 1e-12);
/// ```
pub fn convert(magnitude: f64, from: Unit, to: Unit) -> Result<f64, ReduceError> {
    if from.quantity() != to.quantity() {
        return Err(ReduceError::UnitMismatch {
            from: from.quantity(),
            to: to.quantity(),
        });
    }
    if from == to {
        return Ok(magnitude);
    }
    Ok(magnitude * from.canonical_factor() / to.canonical_factor())
}

/// A magnitude together with the unit it was recorded in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnitValue {
    /// Raw magnitude in `unit`.
    pub value: f64,
    /// The unit `value` is expressed in.
    pub unit: Unit,
}

impl UnitValue {
    /// Create a new unitized value.
    #[must_use]
    pub fn new(value: f64, unit: impl Into<Unit>) -> Self {
        Self {
            value,
            unit: unit.into(),
        }
    }

    /// A length in meters.
    #[must_use]
    pub const fn meters(value: f64) -> Self {
        Self {
            value,
            unit: Unit::Length(LengthUnit::Meters),
        }
    }

    /// An angle in degrees.
    #[must_use]
    pub const fn degrees(value: f64) -> Self {
        Self {
            value,
            unit: Unit::Angle(AngleUnit::Degrees),
        }
    }

    /// The quantity kind of this value.
    #[must_use]
    pub const fn quantity(self) -> Quantity {
        self.unit.quantity()
    }

    /// The magnitude expressed in `unit`.
    ///
    /// # Errors
    ///
    /// Returns [`ReduceError::UnitMismatch`] if `unit` measures a
    /// different quantity.
    pub fn get(self, unit: impl Into<Unit>) -> Result<f64, ReduceError> {
        convert(self.value, self.unit, unit.into())
    }

    /// This value re-expressed in `unit`.
    ///
    /// # Errors
    ///
    /// Returns [`ReduceError::UnitMismatch`] if `unit` measures a
    /// different quantity.
    pub fn in_unit(self, unit: impl Into<Unit>) -> Result<Self, ReduceError> {
        let unit = unit.into();
        Ok(Self {
            value: convert(self.value, self.unit, unit)?,
            unit,
        })
    }

    /// Unit-checked sum. The result keeps `self`'s unit.
    ///
    /// # Errors
    ///
    /// Returns [`ReduceError::UnitMismatch`] if `other` measures a
    /// different quantity.
    pub fn checked_add(self, other: Self) -> Result<Self, ReduceError> {
        Ok(Self {
            value: self.value + other.get(self.unit)?,
            unit: self.unit,
        })
    }

    /// Whether the magnitude is exactly zero (in any unit).
    #[must_use]
    pub fn is_zero(self) -> bool {
        self.value == 0.0
    }
}

impl fmt::Display for UnitValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit.symbol())
    }
}
