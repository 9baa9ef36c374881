//! Edge decomposition: split the chunks of one cave into junction-free
//! edges.
//!
//! An edge is a run of stations whose interior stations belong to no other
//! edge: every junction (a station shared between runs) is an edge
//! endpoint. Chunks are folded in one at a time while a station -> edge
//! lookup tracks memberships:
//!
//! - A known station at a chunk boundary does not split the new chunk, but
//!   every existing edge holding it in its interior is split there.
//! - A known station at an interior position splits the chunk in progress
//!   (the station ends the first half and starts the second) and every
//!   existing edge holding it in its interior.
//!
//! Edges are stored in an arena and addressed by [`EdgeId`]. Splitting an
//! edge truncates it in place and appends the remainder under a new id, so
//! ids handed out earlier stay valid.

use std::collections::{BTreeMap, HashMap};

use log::debug;

use crate::cancel::Cancellation;
use crate::types::{Point3, ReduceError, StationName};

/// Index of an edge in an [`EdgeSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(pub usize);

/// A chunk whose shots have been reduced, ready for decomposition.
///
/// `legs[i]` is the displacement from `stations[i]` to `stations[i + 1]`,
/// or `None` when that shot could not be reduced.
#[derive(Debug, Clone, PartialEq)]
pub struct ReducedChunk {
    /// Index of the trip (within its cave) the chunk was surveyed on.
    pub trip: usize,
    pub stations: Vec<StationName>,
    pub legs: Vec<Option<Point3>>,
}

/// A junction-free run of stations.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    trip: usize,
    stations: Vec<StationName>,
    legs: Vec<Option<Point3>>,
}

impl Edge {
    /// Create an edge. `legs` must hold one entry per consecutive station
    /// pair.
    #[must_use]
    pub fn new(trip: usize, stations: Vec<StationName>, legs: Vec<Option<Point3>>) -> Self {
        debug_assert_eq!(legs.len() + 1, stations.len());
        Self {
            trip,
            stations,
            legs,
        }
    }

    /// Index of the trip this edge's shots were surveyed on.
    #[must_use]
    pub const fn trip(&self) -> usize {
        self.trip
    }

    #[must_use]
    pub fn stations(&self) -> &[StationName] {
        &self.stations
    }

    /// Displacement of each shot; `legs()[i]` runs from `stations()[i]`
    /// to `stations()[i + 1]`.
    #[must_use]
    pub fn legs(&self) -> &[Option<Point3>] {
        &self.legs
    }

    #[must_use]
    pub fn first(&self) -> Option<&StationName> {
        self.stations.first()
    }

    #[must_use]
    pub fn last(&self) -> Option<&StationName> {
        self.stations.last()
    }

    /// Stations strictly between the endpoints.
    #[must_use]
    pub fn interior(&self) -> &[StationName] {
        match self.stations.len() {
            0..=2 => &[],
            n => &self.stations[1..n - 1],
        }
    }

    /// Position of the first interior occurrence of `name`.
    #[must_use]
    pub fn interior_position(&self, name: &StationName) -> Option<usize> {
        self.interior()
            .iter()
            .position(|station| station == name)
            .map(|i| i + 1)
    }

    /// Whether `name` is the first or last station.
    #[must_use]
    pub fn is_endpoint(&self, name: &StationName) -> bool {
        self.first() == Some(name) || self.last() == Some(name)
    }

    /// Split at `name`: `self` is truncated to end at `name` and the
    /// returned edge starts at `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ReduceError::UnsplittableStation`] if `name` is not an
    /// interior station of this edge.
    pub fn split(&mut self, name: &StationName) -> Result<Self, ReduceError> {
        let position =
            self.interior_position(name)
                .ok_or_else(|| ReduceError::UnsplittableStation {
                    station: name.to_string(),
                })?;
        Ok(self.split_at(position))
    }

    /// Split at an interior position. The station at `position` ends `self`
    /// and starts the returned edge.
    fn split_at(&mut self, position: usize) -> Self {
        let tail_stations = self.stations.split_off(position);
        self.stations.push(tail_stations[0].clone());
        let tail_legs = self.legs.split_off(position);
        Self {
            trip: self.trip,
            stations: tail_stations,
            legs: tail_legs,
        }
    }
}

/// The edges of one cave.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeSet {
    edges: Vec<Edge>,
}

impl EdgeSet {
    #[must_use]
    pub const fn len(&self) -> usize {
        self.edges.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (EdgeId, &Edge)> {
        self.edges.iter().enumerate().map(|(i, edge)| (EdgeId(i), edge))
    }

    #[must_use]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Total number of shots across every edge.
    #[must_use]
    pub fn leg_count(&self) -> usize {
        self.edges.iter().map(|edge| edge.legs.len()).sum()
    }

    /// Station name -> every (trip, edge) pair it appears on.
    #[must_use]
    pub fn memberships(&self) -> BTreeMap<StationName, Vec<(usize, EdgeId)>> {
        let mut memberships: BTreeMap<StationName, Vec<(usize, EdgeId)>> = BTreeMap::new();
        for (id, edge) in self.iter() {
            for station in &edge.stations {
                let entry = memberships.entry(station.clone()).or_default();
                if !entry.contains(&(edge.trip, id)) {
                    entry.push((edge.trip, id));
                }
            }
        }
        memberships
    }

    /// Stations that break the junction-free property: interior to more
    /// than one edge, or interior to one edge and an endpoint of another.
    ///
    /// Always empty for sets built by [`EdgeDecomposer`].
    #[must_use]
    pub fn interior_violations(&self) -> Vec<StationName> {
        let mut interior_count: HashMap<&StationName, usize> = HashMap::new();
        for edge in &self.edges {
            for station in edge.interior() {
                *interior_count.entry(station).or_default() += 1;
            }
        }
        let mut violations: Vec<StationName> = interior_count
            .into_iter()
            .filter(|&(station, count)| {
                count > 1 || self.edges.iter().any(|edge| edge.is_endpoint(station))
            })
            .map(|(station, _)| station.clone())
            .collect();
        violations.sort();
        violations
    }
}

/// Incrementally builds an [`EdgeSet`] one chunk at a time.
#[derive(Debug, Default)]
pub struct EdgeDecomposer {
    edges: Vec<Edge>,
    lookup: HashMap<StationName, Vec<EdgeId>>,
    split_count: usize,
}

impl EdgeDecomposer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one reduced chunk into the edge set.
    ///
    /// Chunks with fewer than two stations are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ReduceError::UnsplittableStation`] only if the lookup
    /// disagrees with the stored edges, which indicates a bug.
    pub fn add_chunk(&mut self, chunk: ReducedChunk) -> Result<(), ReduceError> {
        if chunk.stations.len() < 2 || chunk.legs.len() + 1 != chunk.stations.len() {
            return Ok(());
        }
        let mut current = Edge::new(chunk.trip, chunk.stations, chunk.legs);

        let mut i = 1;
        while i + 1 < current.stations.len() {
            let name = &current.stations[i];
            let known = self.lookup.contains_key(name) || current.stations[..i].contains(name);
            if known {
                let name = name.clone();
                let tail = current.split_at(i);
                let head = std::mem::replace(&mut current, tail);
                self.split_count += 1;
                self.register(head)?;
                self.split_existing_on(&name)?;
                i = 1;
            } else {
                i += 1;
            }
        }
        self.register(current)
    }

    /// Split the edge `id` at `name`, returning the id of the new tail edge.
    ///
    /// # Errors
    ///
    /// Returns [`ReduceError::UnsplittableStation`] if `name` is not an
    /// interior station of that edge (or the id is unknown).
    pub fn split(&mut self, id: EdgeId, name: &StationName) -> Result<EdgeId, ReduceError> {
        let edge = self
            .edges
            .get_mut(id.0)
            .ok_or_else(|| ReduceError::UnsplittableStation {
                station: name.to_string(),
            })?;
        let tail = edge.split(name)?;
        let head_stations = edge.stations.clone();

        // Stations that moved wholly into the tail no longer belong to `id`.
        for station in &tail.stations[1..] {
            if !head_stations.contains(station)
                && let Some(ids) = self.lookup.get_mut(station)
            {
                ids.retain(|&other| other != id);
            }
        }

        let tail_id = EdgeId(self.edges.len());
        for station in &tail.stations {
            add_membership(&mut self.lookup, station, tail_id);
        }
        self.edges.push(tail);
        self.split_count += 1;
        Ok(tail_id)
    }

    /// Edges currently holding `name`.
    #[must_use]
    pub fn edges_at(&self, name: &StationName) -> &[EdgeId] {
        self.lookup.get(name).map_or(&[], Vec::as_slice)
    }

    /// How many splits have been performed so far.
    #[must_use]
    pub const fn split_count(&self) -> usize {
        self.split_count
    }

    #[must_use]
    pub fn finish(self) -> EdgeSet {
        EdgeSet { edges: self.edges }
    }

    fn register(&mut self, edge: Edge) -> Result<(), ReduceError> {
        let id = EdgeId(self.edges.len());
        for station in &edge.stations {
            add_membership(&mut self.lookup, station, id);
        }
        let first = edge.stations.first().cloned();
        let last = edge.stations.last().cloned();
        self.edges.push(edge);

        for endpoint in first.iter().chain(last.iter()) {
            self.split_existing_on(endpoint)?;
        }
        Ok(())
    }

    /// Split every edge holding `name` in its interior.
    fn split_existing_on(&mut self, name: &StationName) -> Result<(), ReduceError> {
        loop {
            let target = self.edges_at(name).iter().copied().find(|id| {
                self.edges[id.0].interior_position(name).is_some()
            });
            let Some(id) = target else {
                return Ok(());
            };
            self.split(id, name)?;
        }
    }
}

fn add_membership(lookup: &mut HashMap<StationName, Vec<EdgeId>>, station: &StationName, id: EdgeId) {
    let ids = lookup.entry(station.clone()).or_default();
    if !ids.contains(&id) {
        ids.push(id);
    }
}

/// Decompose every chunk of one cave, polling `cancel` between chunks.
///
/// # Errors
///
/// Returns [`ReduceError::Cancelled`] if cancellation is observed, or
/// [`ReduceError::UnsplittableStation`] on an internal inconsistency.
pub fn decompose(
    chunks: impl IntoIterator<Item = ReducedChunk>,
    cancel: &dyn Cancellation,
) -> Result<EdgeSet, ReduceError> {
    let mut decomposer = EdgeDecomposer::new();
    let mut chunk_count = 0_usize;
    for chunk in chunks {
        cancel.check()?;
        decomposer.add_chunk(chunk)?;
        chunk_count += 1;
    }
    debug!(
        "decomposed {chunk_count} chunks into {} edges ({} splits)",
        decomposer.edges.len(),
        decomposer.split_count,
    );
    Ok(decomposer.finish())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use super::*;
    use crate::cancel::NeverCancel;

    fn names(edge: &Edge) -> Vec<&str> {
        edge.stations().iter().map(StationName::as_str).collect()
    }

    fn chunk(trip: usize, stations: &[&str]) -> ReducedChunk {
        #[allow(clippy::cast_precision_loss)]
        let legs = (1..stations.len())
            .map(|i| Some(Point3::new(i as f64, 0.0, 0.0)))
            .collect();
        ReducedChunk {
            trip,
            stations: stations.iter().map(|&s| StationName::from(s)).collect(),
            legs,
        }
    }

    fn decompose_all(chunks: &[&[&str]]) -> EdgeSet {
        decompose(
            chunks.iter().enumerate().map(|(trip, stations)| chunk(trip, stations)),
            &NeverCancel,
        )
        .unwrap()
    }

    fn edge_names(set: &EdgeSet) -> Vec<Vec<&str>> {
        let mut all: Vec<Vec<&str>> = set.edges().iter().map(names).collect();
        all.sort();
        all
    }

    #[test]
    fn single_chunk_is_one_edge() {
        let set = decompose_all(&[&["A", "B", "C", "D"]]);
        assert_eq!(edge_names(&set), vec![vec!["A", "B", "C", "D"]]);
        assert_eq!(set.leg_count(), 3);
    }

    #[test]
    fn split_truncates_and_returns_tail() {
        let mut edge = Edge::new(
            2,
            ["A", "B", "C", "D"].into_iter().map(StationName::from).collect(),
            vec![
                Some(Point3::new(1.0, 0.0, 0.0)),
                None,
                Some(Point3::new(3.0, 0.0, 0.0)),
            ],
        );
        let tail = edge.split(&"c".into()).unwrap();
        assert_eq!(names(&edge), vec!["A", "B", "C"]);
        assert_eq!(names(&tail), vec!["C", "D"]);
        assert_eq!(edge.legs(), &[Some(Point3::new(1.0, 0.0, 0.0)), None]);
        assert_eq!(tail.legs(), &[Some(Point3::new(3.0, 0.0, 0.0))]);
        assert_eq!(tail.trip(), 2);
    }

    #[test]
    fn split_on_endpoint_or_absent_station_fails() {
        let mut edge = Edge::new(
            0,
            ["A", "B", "C"].into_iter().map(StationName::from).collect(),
            vec![None, None],
        );
        for name in ["A", "C", "Z"] {
            assert_eq!(
                edge.split(&name.into()),
                Err(ReduceError::UnsplittableStation {
                    station: name.to_string()
                })
            );
        }
        assert_eq!(names(&edge), vec!["A", "B", "C"]);
    }

    #[test]
    fn boundary_junction_splits_existing_edge() {
        let set = decompose_all(&[&["A", "M", "B"], &["M", "C"]]);
        assert_eq!(
            edge_names(&set),
            vec![vec!["A", "M"], vec!["M", "B"], vec!["M", "C"]]
        );
        for edge in set.edges() {
            assert!(edge.is_endpoint(&"M".into()));
        }
        assert!(set.interior_violations().is_empty());
    }

    #[test]
    fn interior_junction_splits_new_chunk() {
        let set = decompose_all(&[&["A", "B"], &["X", "A", "Y"]]);
        assert_eq!(
            edge_names(&set),
            vec![vec!["A", "B"], vec!["A", "Y"], vec!["X", "A"]]
        );
    }

    #[test]
    fn interior_junction_in_both_chunk_and_edge() {
        let set = decompose_all(&[&["A", "M", "B"], &["X", "M", "Y"]]);
        assert_eq!(
            edge_names(&set),
            vec![
                vec!["A", "M"],
                vec!["M", "B"],
                vec!["M", "Y"],
                vec!["X", "M"]
            ]
        );
        assert_eq!(set.leg_count(), 4);
    }

    #[test]
    fn repeated_station_within_chunk() {
        let set = decompose_all(&[&["A", "B", "C", "B", "D"]]);
        assert_eq!(
            edge_names(&set),
            vec![vec!["A", "B"], vec!["B", "C", "B"], vec!["B", "D"]]
        );
        assert!(set.interior_violations().is_empty());
    }

    #[test]
    fn closed_loop_chunk_stays_whole() {
        let set = decompose_all(&[&["A", "B", "C", "A"]]);
        assert_eq!(edge_names(&set), vec![vec!["A", "B", "C", "A"]]);
    }

    #[test]
    fn junctions_match_case_insensitively() {
        let set = decompose_all(&[&["a1", "a2", "a3"], &["A2", "b1"]]);
        assert_eq!(set.len(), 3);
        assert!(set.interior_violations().is_empty());
    }

    #[test]
    fn legs_are_conserved_across_splits() {
        let set = decompose_all(&[
            &["A", "B", "C", "D", "E"],
            &["C", "F", "G"],
            &["G", "H", "B"],
            &["X", "E", "Y", "F"],
        ]);
        assert_eq!(set.leg_count(), 4 + 2 + 2 + 3);
        assert!(set.interior_violations().is_empty());
    }

    #[test]
    fn pseudo_random_chunks_keep_interior_unique() {
        // Small LCG so the test is deterministic without extra deps.
        let mut state: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = |bound: u64| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            (state >> 33) % bound
        };

        let mut chunks = Vec::new();
        let mut total_legs = 0;
        for trip in 0..40 {
            let len = 2 + usize::try_from(next(6)).unwrap();
            let stations: Vec<String> = (0..len).map(|_| format!("S{}", next(30))).collect();
            total_legs += len - 1;
            let refs: Vec<&str> = stations.iter().map(String::as_str).collect();
            chunks.push(chunk(trip, &refs));
        }

        let set = decompose(chunks, &NeverCancel).unwrap();
        assert!(set.interior_violations().is_empty());
        assert_eq!(set.leg_count(), total_legs);
    }

    #[test]
    fn memberships_list_trip_and_edge() {
        let set = decompose_all(&[&["A", "M", "B"], &["M", "C"]]);
        let memberships = set.memberships();
        let m = &memberships[&StationName::from("M")];
        assert_eq!(m.len(), 3);
        assert!(m.iter().any(|&(trip, _)| trip == 1));
        assert_eq!(memberships[&StationName::from("A")].len(), 1);
    }

    #[test]
    fn decomposer_lookup_tracks_splits() {
        let mut decomposer = EdgeDecomposer::new();
        decomposer.add_chunk(chunk(0, &["A", "B", "C"])).unwrap();
        assert_eq!(decomposer.edges_at(&"C".into()), &[EdgeId(0)]);

        let tail = decomposer.split(EdgeId(0), &"B".into()).unwrap();
        assert_eq!(tail, EdgeId(1));
        assert_eq!(decomposer.edges_at(&"C".into()), &[EdgeId(1)]);
        assert_eq!(decomposer.edges_at(&"B".into()), &[EdgeId(0), EdgeId(1)]);
        assert_eq!(decomposer.split_count(), 1);

        assert!(decomposer.split(EdgeId(7), &"B".into()).is_err());
    }

    #[test]
    fn cancellation_stops_decomposition() {
        let cancel = AtomicBool::new(true);
        let result = decompose([chunk(0, &["A", "B"])], &cancel);
        assert_eq!(result, Err(ReduceError::Cancelled));
    }

    #[test]
    fn short_chunks_are_ignored() {
        let set = decompose_all(&[&["A"], &["B", "C"]]);
        assert_eq!(edge_names(&set), vec![vec!["B", "C"]]);
    }
}
