//! Stable input fingerprints, so an unchanged region does not trigger a
//! rerun.
//!
//! The fingerprint covers everything that influences a reduction: cave,
//! trip and station names, every recorded value with its unit, trip
//! corrections, and the run configuration. Output fields written back
//! into caves (`length`, `depth`, `station_positions`) are excluded, so
//! applying a result does not change the fingerprint of its input.
//!
//! SipHash-1-3 with fixed zero keys keeps the value stable across
//! processes; this is change detection, not a security boundary.

use std::fmt;
use std::hash::Hasher;

use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher13;

use crate::survey::{Region, Shot, TripCorrections};
use crate::types::ReduceConfig;
use crate::units::UnitValue;

/// A 64-bit digest of a region and its reduction configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub u64);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Fingerprint `region` as reduced under `config`.
#[must_use]
pub fn fingerprint(region: &Region, config: &ReduceConfig) -> Fingerprint {
    let mut feed = Feed(SipHasher13::new_with_keys(0, 0));

    feed.str(config.loop_classifier.name());
    feed.f64(config.vertical_tolerance);

    feed.len(region.caves.len());
    for cave in &region.caves {
        feed.str(&cave.name);
        feed.len(cave.trips.len());
        for trip in &cave.trips {
            feed.str(&trip.name);
            feed.corrections(&trip.corrections);
            feed.len(trip.chunks.len());
            for chunk in &trip.chunks {
                feed.len(chunk.stations.len());
                for station in &chunk.stations {
                    feed.str(station.as_str());
                }
                feed.len(chunk.shots.len());
                for shot in &chunk.shots {
                    feed.shot(shot);
                }
            }
        }
    }

    Fingerprint(feed.0.finish())
}

/// Length-prefixed field writer, so adjacent fields cannot run together.
struct Feed(SipHasher13);

impl Feed {
    fn len(&mut self, n: usize) {
        self.0.write_u64(n as u64);
    }

    fn str(&mut self, s: &str) {
        self.len(s.len());
        self.0.write(s.as_bytes());
    }

    fn f64(&mut self, v: f64) {
        self.0.write_u64(v.to_bits());
    }

    fn bool(&mut self, b: bool) {
        self.0.write_u8(u8::from(b));
    }

    fn value(&mut self, v: Option<UnitValue>) {
        match v {
            Some(v) => {
                self.0.write_u8(1);
                self.f64(v.value);
                self.str(v.unit.symbol());
            }
            None => self.0.write_u8(0),
        }
    }

    fn optional(&mut self, v: Option<f64>) {
        match v {
            Some(v) => {
                self.0.write_u8(1);
                self.f64(v);
            }
            None => self.0.write_u8(0),
        }
    }

    fn shot(&mut self, shot: &Shot) {
        for value in [
            shot.distance,
            shot.front_azimuth,
            shot.back_azimuth,
            shot.front_inclination,
            shot.back_inclination,
            shot.instrument_height,
            shot.target_height,
        ] {
            self.value(value);
        }
    }

    fn corrections(&mut self, c: &TripCorrections) {
        self.str(c.distance_unit.symbol());
        self.str(c.azimuth_unit.symbol());
        self.str(c.inclination_unit.symbol());
        self.bool(c.backsight_azimuth_corrected);
        self.bool(c.backsight_inclination_corrected);
        for v in [
            c.declination,
            c.distance_correction,
            c.front_azimuth_correction,
            c.back_azimuth_correction,
            c.front_inclination_correction,
            c.back_inclination_correction,
            c.instrument_height_correction,
        ] {
            self.f64(v);
        }
        self.optional(c.azimuth_tolerance);
        self.optional(c.inclination_tolerance);
    }
}
