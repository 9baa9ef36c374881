//! Change tracking between two published line plots.
//!
//! Consumers redraw or recompute only what moved: a cave whose length or
//! depth changed, a cave with at least one moved station, and the trips
//! that surveyed a moved station.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::types::{CavePlot, LinePlotResult, Point3, StationName};

/// Differences below this many meters are treated as unchanged.
pub const POSITION_TOLERANCE: f64 = 1e-9;

/// What changed in one cave.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CaveChanges {
    pub name: String,
    pub depth_length_changed: bool,
    pub station_positions_changed: bool,
    /// Stations that moved, appeared or disappeared.
    pub moved_stations: Vec<StationName>,
    /// Trips (indices within the cave) that surveyed a moved station.
    pub changed_trips: Vec<usize>,
}

impl CaveChanges {
    /// Whether anything changed at all.
    #[must_use]
    pub const fn is_changed(&self) -> bool {
        self.depth_length_changed || self.station_positions_changed
    }
}

/// Per-cave changes, parallel to the new result's caves.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChangeSet {
    pub caves: Vec<CaveChanges>,
    /// Caves present in the previous result but not the new one.
    pub removed_caves: usize,
}

impl ChangeSet {
    /// Whether nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.removed_caves == 0 && !self.caves.iter().any(CaveChanges::is_changed)
    }

    /// Every `(cave index, trip index)` pair owning a moved station.
    #[must_use]
    pub fn changed_trips(&self) -> Vec<(usize, usize)> {
        self.caves
            .iter()
            .enumerate()
            .flat_map(|(cave, changes)| changes.changed_trips.iter().map(move |&trip| (cave, trip)))
            .collect()
    }
}

/// Diff `next` against the previously published result.
///
/// Caves are matched by position. Without a previous result every cave
/// counts as changed.
#[must_use]
pub fn diff(previous: Option<&LinePlotResult>, next: &LinePlotResult) -> ChangeSet {
    let caves = next
        .caves
        .iter()
        .enumerate()
        .map(|(i, cave)| {
            let before = previous.and_then(|p| p.caves.get(i).map(|c| (p, c)));
            diff_cave(before, (next, cave))
        })
        .collect();
    let removed_caves = previous.map_or(0, |p| p.caves.len().saturating_sub(next.caves.len()));
    ChangeSet {
        caves,
        removed_caves,
    }
}

fn positions<'a>(result: &'a LinePlotResult, cave: &'a CavePlot) -> BTreeMap<&'a StationName, Point3> {
    cave.station_indices
        .iter()
        .filter_map(|(name, &index)| result.points.get(index as usize).map(|p| (name, *p)))
        .collect()
}

fn diff_cave(
    before: Option<(&LinePlotResult, &CavePlot)>,
    (next_result, next): (&LinePlotResult, &CavePlot),
) -> CaveChanges {
    let after = positions(next_result, next);
    let previous = before.map(|(result, cave)| (cave, positions(result, cave)));

    let depth_length_changed = previous.as_ref().is_none_or(|(cave, _)| {
        (cave.stats.length - next.stats.length).abs() > POSITION_TOLERANCE
            || (cave.stats.depth - next.stats.depth).abs() > POSITION_TOLERANCE
    });

    let mut moved: BTreeSet<&StationName> = BTreeSet::new();
    match &previous {
        Some((_, before)) => {
            for (name, position) in &after {
                if before
                    .get(name)
                    .is_none_or(|old| old.distance(*position) > POSITION_TOLERANCE)
                {
                    moved.insert(*name);
                }
            }
            moved.extend(before.keys().filter(|name| !after.contains_key(*name)));
        }
        None => moved.extend(after.keys()),
    }

    let mut changed_trips = BTreeSet::new();
    for name in &moved {
        let trips = next
            .station_trips
            .get(*name)
            .or_else(|| previous.as_ref().and_then(|(cave, _)| cave.station_trips.get(*name)));
        changed_trips.extend(trips.into_iter().flatten().copied());
    }

    CaveChanges {
        name: next.name.clone(),
        depth_length_changed,
        station_positions_changed: !moved.is_empty(),
        moved_stations: moved.into_iter().cloned().collect(),
        changed_trips: changed_trips.into_iter().collect(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::CaveStats;

    fn plot(stations: &[(&str, Point3, &[usize])], length: f64) -> LinePlotResult {
        let mut cave = CavePlot {
            name: "Cave".to_string(),
            stats: CaveStats {
                length,
                ..CaveStats::default()
            },
            ..CavePlot::default()
        };
        let mut points = Vec::new();
        for (i, (name, point, trips)) in stations.iter().enumerate() {
            cave.station_indices
                .insert(StationName::from(*name), u32::try_from(i).unwrap());
            cave.station_trips
                .insert(StationName::from(*name), trips.to_vec());
            points.push(*point);
        }
        LinePlotResult {
            points,
            indices: Vec::new(),
            caves: vec![cave],
        }
    }

    #[test]
    fn first_result_changes_everything() {
        let next = plot(&[("A", Point3::ORIGIN, &[0]), ("B", Point3::new(1.0, 0.0, 0.0), &[1])], 1.0);
        let changes = diff(None, &next);
        assert!(changes.caves[0].depth_length_changed);
        assert!(changes.caves[0].station_positions_changed);
        assert_eq!(changes.changed_trips(), vec![(0, 0), (0, 1)]);
    }

    #[test]
    fn identical_results_have_no_changes() {
        let a = plot(&[("A", Point3::ORIGIN, &[0])], 0.0);
        let changes = diff(Some(&a), &a);
        assert!(changes.is_empty());
        assert!(changes.changed_trips().is_empty());
    }

    #[test]
    fn moved_station_flags_its_trips() {
        let before = plot(
            &[("A", Point3::ORIGIN, &[0]), ("B", Point3::new(1.0, 0.0, 0.0), &[0, 2])],
            1.0,
        );
        let after = plot(
            &[("A", Point3::ORIGIN, &[0]), ("B", Point3::new(1.0, 0.5, 0.0), &[0, 2])],
            1.0,
        );
        let changes = diff(Some(&before), &after);
        let cave = &changes.caves[0];
        assert!(!cave.depth_length_changed);
        assert!(cave.station_positions_changed);
        assert_eq!(cave.moved_stations, vec![StationName::from("B")]);
        assert_eq!(cave.changed_trips, vec![0, 2]);
    }

    #[test]
    fn removed_station_uses_previous_trips() {
        let before = plot(&[("A", Point3::ORIGIN, &[0]), ("Z", Point3::ORIGIN, &[3])], 0.0);
        let after = plot(&[("A", Point3::ORIGIN, &[0])], 0.0);
        let changes = diff(Some(&before), &after);
        assert_eq!(changes.caves[0].moved_stations, vec![StationName::from("Z")]);
        assert_eq!(changes.caves[0].changed_trips, vec![3]);
    }

    #[test]
    fn length_change_only() {
        let before = plot(&[("A", Point3::ORIGIN, &[0])], 1.0);
        let after = plot(&[("A", Point3::ORIGIN, &[0])], 2.0);
        let cave = &diff(Some(&before), &after).caves[0];
        assert!(cave.depth_length_changed);
        assert!(!cave.station_positions_changed);
    }

    #[test]
    fn removed_caves_are_counted() {
        let before = plot(&[("A", Point3::ORIGIN, &[0])], 0.0);
        let after = LinePlotResult::default();
        let changes = diff(Some(&before), &after);
        assert_eq!(changes.removed_caves, 1);
        assert!(!changes.is_empty());
    }
}
