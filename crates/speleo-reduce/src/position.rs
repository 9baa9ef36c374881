//! Position resolution: accumulate absolute station positions along a
//! spanning traversal of one cave and build its line geometry.
//!
//! The root (the first station of the first edge) sits at the origin.
//! Every reduced shot is a graph edge carrying its displacement; a
//! breadth-first traversal assigns each newly reached station its
//! neighbour's position plus (or minus, when walked backwards) that
//! displacement. A shot that leads back into an already positioned station
//! does not move it; the disagreement is recorded as misclosure.
//!
//! Point-buffer indices are assigned in discovery order, offset by the
//! number of points already emitted for earlier caves. One index pair is
//! appended per shot whose endpoints were both resolved.

use std::collections::{BTreeMap, HashMap, VecDeque};

use log::{debug, warn};
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;

use crate::cancel::Cancellation;
use crate::edge::EdgeSet;
use crate::types::{CaveStats, Point3, ReduceError, StationName};

/// How many stations are positioned between cancellation polls.
const CANCEL_POLL_INTERVAL: usize = 256;

/// Geometry and statistics for one resolved cave.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResolvedCave {
    /// Positions in discovery order. `points[i]` has buffer index
    /// `first_index + i`.
    pub points: Vec<Point3>,
    /// Segment endpoint pairs, in global buffer indices.
    pub indices: Vec<u32>,
    /// Global buffer index of every resolved station.
    pub station_indices: BTreeMap<StationName, u32>,
    /// Everything except the loop/leg edge counts, which the caller knows.
    pub stats: CaveStats,
}

/// Resolves station positions for one cave's edges.
#[derive(Debug, Clone, Copy)]
pub struct PositionResolver<'a> {
    edges: &'a EdgeSet,
    first_index: usize,
}

impl<'a> PositionResolver<'a> {
    /// `first_index` is the number of points already in the region-wide
    /// buffer.
    #[must_use]
    pub const fn new(edges: &'a EdgeSet, first_index: usize) -> Self {
        Self { edges, first_index }
    }

    /// Traverse the edges and build the cave's geometry.
    ///
    /// # Errors
    ///
    /// - [`ReduceError::Cancelled`] if cancellation is observed.
    /// - [`ReduceError::InvalidConfig`] if the point buffer would outgrow
    ///   `u32` indices.
    pub fn resolve(&self, cancel: &dyn Cancellation) -> Result<ResolvedCave, ReduceError> {
        let network = Network::build(self.edges);
        let mut resolved = ResolvedCave::default();
        let Some(root) = network.root else {
            return Ok(resolved);
        };

        // --- Traversal ---

        let mut positions: Vec<Option<Point3>> = vec![None; network.graph.node_count()];
        let mut buffer_index: Vec<Option<u32>> = vec![None; network.graph.node_count()];
        let mut queue = VecDeque::from([root]);
        positions[root.index()] = Some(Point3::ORIGIN);
        buffer_index[root.index()] = Some(self.next_index(&resolved.points)?);
        resolved.points.push(Point3::ORIGIN);

        while let Some(node) = queue.pop_front() {
            if resolved.points.len() % CANCEL_POLL_INTERVAL == 0 {
                cancel.check()?;
            }
            let Some(here) = positions[node.index()] else {
                continue;
            };
            for edge in network.graph.edges(node) {
                let Some((from, to)) = network.graph.edge_endpoints(edge.id()) else {
                    continue;
                };
                if from == to {
                    continue;
                }
                let (other, there) = if from == node {
                    (to, here + *edge.weight())
                } else {
                    (from, here - *edge.weight())
                };
                if let Some(existing) = positions[other.index()] {
                    let misclosure = existing.distance(there);
                    resolved.stats.max_misclosure = resolved.stats.max_misclosure.max(misclosure);
                } else {
                    positions[other.index()] = Some(there);
                    buffer_index[other.index()] = Some(self.next_index(&resolved.points)?);
                    resolved.points.push(there);
                    queue.push_back(other);
                }
            }
        }
        cancel.check()?;

        // --- Index buffer, length ---

        for (_, edge) in self.edges.iter() {
            for (pair, leg) in edge.stations().windows(2).zip(edge.legs()) {
                if leg.is_none() {
                    resolved.stats.skipped_invalid_shots += 1;
                    continue;
                }
                let from = network.node(&pair[0]);
                let to = network.node(&pair[1]);
                let endpoints = from
                    .zip(to)
                    .and_then(|(a, b)| Some((buffer_index[a.index()]?, buffer_index[b.index()]?)));
                let Some((a, b)) = endpoints else {
                    let missing = if from.and_then(|n| positions[n.index()]).is_none() {
                        &pair[0]
                    } else {
                        &pair[1]
                    };
                    debug!(
                        "skipping shot {} -> {}: {}",
                        pair[0],
                        pair[1],
                        ReduceError::MissingStationPosition {
                            station: missing.to_string()
                        }
                    );
                    resolved.stats.skipped_unreachable_shots += 1;
                    continue;
                };
                resolved.indices.extend([a, b]);
                resolved.stats.segment_count += 1;
                resolved.stats.length += self.point(&resolved.points, a).distance(self.point(&resolved.points, b));
            }
        }

        // --- Stations, depth ---

        let mut unreachable = Vec::new();
        for node in network.graph.node_indices() {
            let name = &network.graph[node];
            match buffer_index[node.index()] {
                Some(index) => {
                    resolved.station_indices.insert(name.clone(), index);
                }
                None => unreachable.push(name.to_string()),
            }
        }
        if !unreachable.is_empty() {
            warn!(
                "{} station(s) not reachable from {}: {}",
                unreachable.len(),
                network.graph[root],
                unreachable.join(", ")
            );
        }
        resolved.stats.unreachable_stations = unreachable;
        resolved.stats.station_count = resolved.points.len();

        let (low, high) = resolved
            .points
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(low, high), p| {
                (low.min(p.z), high.max(p.z))
            });
        resolved.stats.depth = if resolved.points.is_empty() { 0.0 } else { high - low };

        Ok(resolved)
    }

    fn next_index(&self, points: &[Point3]) -> Result<u32, ReduceError> {
        u32::try_from(self.first_index + points.len()).map_err(|_| {
            ReduceError::InvalidConfig("point buffer exceeds the u32 index range".to_string())
        })
    }

    fn point(&self, points: &[Point3], index: u32) -> Point3 {
        (index as usize)
            .checked_sub(self.first_index)
            .and_then(|local| points.get(local))
            .copied()
            .unwrap_or_default()
    }
}

/// Every station of a cave as a graph node, every reduced shot as a graph
/// edge weighted with its displacement (from the stored source to the
/// stored target).
struct Network {
    graph: UnGraph<StationName, Point3>,
    nodes: HashMap<StationName, NodeIndex>,
    root: Option<NodeIndex>,
}

impl Network {
    fn build(edges: &EdgeSet) -> Self {
        let mut graph = UnGraph::<StationName, Point3>::new_undirected();
        let mut nodes: HashMap<StationName, NodeIndex> = HashMap::new();
        let mut root = None;

        for (_, edge) in edges.iter() {
            let indices: Vec<NodeIndex> = edge
                .stations()
                .iter()
                .map(|name| {
                    *nodes
                        .entry(name.clone())
                        .or_insert_with(|| graph.add_node(name.clone()))
                })
                .collect();
            if root.is_none() {
                root = indices.first().copied();
            }
            for (pair, leg) in indices.windows(2).zip(edge.legs()) {
                if let Some(displacement) = leg {
                    graph.add_edge(pair[0], pair[1], *displacement);
                }
            }
        }
        Self { graph, nodes, root }
    }

    fn node(&self, name: &StationName) -> Option<NodeIndex> {
        self.nodes.get(name).copied()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use super::*;
    use crate::cancel::NeverCancel;
    use crate::edge::{ReducedChunk, decompose};

    const EPS: f64 = 1e-9;

    fn east(d: f64) -> Option<Point3> {
        Some(Point3::new(d, 0.0, 0.0))
    }

    fn chunk(stations: &[&str], legs: Vec<Option<Point3>>) -> ReducedChunk {
        ReducedChunk {
            trip: 0,
            stations: stations.iter().map(|&s| StationName::from(s)).collect(),
            legs,
        }
    }

    fn resolve(chunks: Vec<ReducedChunk>, first_index: usize) -> ResolvedCave {
        let edges = decompose(chunks, &NeverCancel).unwrap();
        PositionResolver::new(&edges, first_index)
            .resolve(&NeverCancel)
            .unwrap()
    }

    fn position(cave: &ResolvedCave, first_index: usize, name: &str) -> Point3 {
        let index = cave.station_indices[&StationName::from(name)] as usize;
        cave.points[index - first_index]
    }

    #[test]
    fn straight_line_due_east() {
        let cave = resolve(
            vec![chunk(&["A", "B", "C", "D"], vec![east(10.0), east(10.0), east(10.0)])],
            0,
        );
        for (name, x) in [("A", 0.0), ("B", 10.0), ("C", 20.0), ("D", 30.0)] {
            assert!(position(&cave, 0, name).distance(Point3::new(x, 0.0, 0.0)) < EPS);
        }
        assert_eq!(cave.indices, vec![0, 1, 1, 2, 2, 3]);
        assert!((cave.stats.length - 30.0).abs() < EPS);
        assert!(cave.stats.depth.abs() < EPS);
        assert_eq!(cave.stats.station_count, 4);
        assert_eq!(cave.stats.segment_count, 3);
    }

    #[test]
    fn indices_are_offset_by_earlier_points() {
        let cave = resolve(vec![chunk(&["A", "B"], vec![east(1.0)])], 5);
        assert_eq!(cave.indices, vec![5, 6]);
        assert_eq!(cave.station_indices[&StationName::from("b")], 6);
    }

    #[test]
    fn backwards_shots_subtract_displacement() {
        let cave = resolve(
            vec![
                chunk(&["A", "B"], vec![east(10.0)]),
                chunk(&["C", "B"], vec![Some(Point3::new(0.0, -5.0, 0.0))]),
            ],
            0,
        );
        assert!(position(&cave, 0, "C").distance(Point3::new(10.0, 5.0, 0.0)) < EPS);
        assert!((cave.stats.length - 15.0).abs() < EPS);
    }

    #[test]
    fn invalid_shot_cuts_off_the_rest_of_the_line() {
        let cave = resolve(
            vec![chunk(&["A", "B", "C", "D"], vec![east(1.0), None, east(1.0)])],
            0,
        );
        assert_eq!(cave.stats.skipped_invalid_shots, 1);
        assert_eq!(cave.stats.skipped_unreachable_shots, 1);
        assert_eq!(cave.stats.unreachable_stations, vec!["C".to_string(), "D".to_string()]);
        assert_eq!(cave.indices, vec![0, 1]);
        assert_eq!(cave.stats.station_count, 2);
    }

    #[test]
    fn invalid_shot_bridged_by_another_route() {
        let cave = resolve(
            vec![
                chunk(&["A", "B", "C"], vec![east(1.0), None]),
                chunk(&["A", "C"], vec![east(2.0)]),
            ],
            0,
        );
        assert_eq!(cave.stats.skipped_invalid_shots, 1);
        assert_eq!(cave.stats.skipped_unreachable_shots, 0);
        assert!(cave.stats.unreachable_stations.is_empty());
        assert_eq!(cave.stats.segment_count, 2);
        assert!(position(&cave, 0, "C").distance(Point3::new(2.0, 0.0, 0.0)) < EPS);
    }

    #[test]
    fn loop_records_misclosure_without_moving_stations() {
        let cave = resolve(
            vec![
                chunk(&["A", "B"], vec![east(10.0)]),
                chunk(&["B", "C"], vec![Some(Point3::new(0.0, 10.0, 0.0))]),
                chunk(&["C", "A"], vec![Some(Point3::new(-10.0, -9.5, 0.0))]),
            ],
            0,
        );
        assert_eq!(cave.stats.station_count, 3);
        assert_eq!(cave.stats.segment_count, 3);
        assert!((cave.stats.max_misclosure - 0.5).abs() < EPS);
        assert!(position(&cave, 0, "A").distance(Point3::ORIGIN) < EPS);
    }

    #[test]
    fn depth_spans_vertical_extent() {
        let cave = resolve(
            vec![chunk(
                &["A", "B", "C"],
                vec![Some(Point3::new(0.0, 0.0, -12.0)), Some(Point3::new(0.0, 0.0, 4.0))],
            )],
            0,
        );
        assert!((cave.stats.depth - 12.0).abs() < EPS);
        assert!((cave.stats.length - 16.0).abs() < EPS);
    }

    #[test]
    fn disconnected_component_is_unreachable() {
        let cave = resolve(
            vec![
                chunk(&["A", "B"], vec![east(1.0)]),
                chunk(&["X", "Y"], vec![east(1.0)]),
            ],
            0,
        );
        assert_eq!(cave.stats.unreachable_stations, vec!["X".to_string(), "Y".to_string()]);
        assert_eq!(cave.stats.skipped_unreachable_shots, 1);
        assert_eq!(cave.stats.segment_count, 1);
    }

    #[test]
    fn empty_cave_has_no_geometry() {
        let cave = PositionResolver::new(&EdgeSet::default(), 0)
            .resolve(&NeverCancel)
            .unwrap();
        assert!(cave.points.is_empty());
        assert!(cave.stats.depth.abs() < EPS);
    }

    #[test]
    fn cancellation_stops_traversal() {
        let edges = decompose(vec![chunk(&["A", "B"], vec![east(1.0)])], &NeverCancel).unwrap();
        let cancel = AtomicBool::new(true);
        assert_eq!(
            PositionResolver::new(&edges, 0).resolve(&cancel),
            Err(ReduceError::Cancelled)
        );
    }
}
