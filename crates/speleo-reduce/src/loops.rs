//! Loop classification: label each edge as a loop member or a leg.
//!
//! Edges are modelled as graph edges between their endpoint stations. An
//! edge is a loop member iff removing it keeps its endpoints connected,
//! i.e. it is not a bridge of that multigraph. Parallel edges between the
//! same pair of stations form a loop, and a self-loop edge (a chunk that
//! closes on its own start) is always a loop member.
//!
//! This is classification only. Misclosure is not redistributed.
//!
//! The [`LoopClassifier`] trait allows pluggable strategies and
//! [`LoopClassifierKind`] selects one at runtime. Both strategies must
//! produce identical labels.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::unionfind::UnionFind;
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use crate::edge::{EdgeId, EdgeSet};
use crate::types::StationName;

/// Whether an edge lies on a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeRole {
    /// Part of at least one cycle.
    Loop,
    /// A bridge: removing it disconnects the survey.
    Leg,
}

/// Selects which loop classification strategy to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LoopClassifierKind {
    /// Iterative depth-first search tracking discovery order and low-link
    /// values (Tarjan's bridge finding). Linear in the number of edges.
    #[default]
    LowLink,

    /// For each edge, rebuild connectivity from every other edge with a
    /// union-find and test whether its endpoints are still joined.
    ///
    /// Quadratic; kept as an independent cross-check of `LowLink`.
    UnionFind,
}

impl LoopClassifierKind {
    /// Every available strategy.
    pub const ALL: [Self; 2] = [Self::LowLink, Self::UnionFind];

    /// Short CLI name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::LowLink => "low-link",
            Self::UnionFind => "union-find",
        }
    }
}

impl fmt::Display for LoopClassifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LoopClassifierKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown loop classifier {s:?} (expected low-link or union-find)"))
    }
}

/// Per-edge labels, indexed by [`EdgeId`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EdgeClassification {
    roles: Vec<EdgeRole>,
}

impl EdgeClassification {
    #[must_use]
    pub fn role(&self, id: EdgeId) -> Option<EdgeRole> {
        self.roles.get(id.0).copied()
    }

    #[must_use]
    pub fn roles(&self) -> &[EdgeRole] {
        &self.roles
    }

    #[must_use]
    pub fn loop_count(&self) -> usize {
        self.roles.iter().filter(|&&role| role == EdgeRole::Loop).count()
    }

    #[must_use]
    pub fn leg_count(&self) -> usize {
        self.roles.len() - self.loop_count()
    }
}

/// Trait for loop classification strategies.
pub trait LoopClassifier {
    /// Label every edge in `edges`.
    fn classify(&self, edges: &EdgeSet) -> EdgeClassification;
}

impl LoopClassifier for LoopClassifierKind {
    fn classify(&self, edges: &EdgeSet) -> EdgeClassification {
        let graph = EndpointGraph::build(edges);
        let roles = match *self {
            Self::LowLink => classify_low_link(&graph),
            Self::UnionFind => classify_union_find(&graph),
        };
        EdgeClassification { roles }
    }
}

// ---------------------------------------------------------------------------
// Endpoint graph
// ---------------------------------------------------------------------------

/// Edges as an undirected multigraph over their endpoint stations.
///
/// Graph edge indices coincide with [`EdgeId`]s: edge `i` of the set is
/// added `i`-th.
struct EndpointGraph {
    graph: UnGraph<StationName, ()>,
}

impl EndpointGraph {
    fn build(edges: &EdgeSet) -> Self {
        let mut graph = UnGraph::<StationName, ()>::with_capacity(edges.len() + 1, edges.len());
        let mut nodes: HashMap<StationName, NodeIndex> = HashMap::new();
        let mut node_for = |name: &StationName, graph: &mut UnGraph<StationName, ()>| {
            *nodes
                .entry(name.clone())
                .or_insert_with(|| graph.add_node(name.clone()))
        };

        for (_, edge) in edges.iter() {
            let (Some(first), Some(last)) = (edge.first(), edge.last()) else {
                continue;
            };
            let a = node_for(first, &mut graph);
            let b = node_for(last, &mut graph);
            graph.add_edge(a, b, ());
        }
        Self { graph }
    }
}

// ---------------------------------------------------------------------------
// Low-link (Tarjan) bridge finding
// ---------------------------------------------------------------------------

struct Frame {
    node: NodeIndex,
    /// Graph edge used to enter `node`; skipped once so parallel edges
    /// back to the parent still count as back edges.
    via: Option<usize>,
    neighbors: Vec<(NodeIndex, usize)>,
    next: usize,
}

fn classify_low_link(graph: &EndpointGraph) -> Vec<EdgeRole> {
    let g = &graph.graph;
    let mut roles = vec![EdgeRole::Loop; g.edge_count()];
    let mut discovery: Vec<Option<usize>> = vec![None; g.node_count()];
    let mut low = vec![0_usize; g.node_count()];
    let mut time = 0_usize;

    let frame_for = |node: NodeIndex, via: Option<usize>| Frame {
        node,
        via,
        neighbors: g.edges(node).map(|e| (e.target(), e.id().index())).collect(),
        next: 0,
    };

    for root in g.node_indices() {
        if discovery[root.index()].is_some() {
            continue;
        }
        discovery[root.index()] = Some(time);
        low[root.index()] = time;
        time += 1;
        let mut stack = vec![frame_for(root, None)];

        while let Some(frame) = stack.last_mut() {
            if let Some(&(neighbor, edge)) = frame.neighbors.get(frame.next) {
                frame.next += 1;
                if frame.via == Some(edge) {
                    continue;
                }
                let node = frame.node.index();
                if let Some(seen) = discovery[neighbor.index()] {
                    low[node] = low[node].min(seen);
                } else {
                    discovery[neighbor.index()] = Some(time);
                    low[neighbor.index()] = time;
                    time += 1;
                    stack.push(frame_for(neighbor, Some(edge)));
                }
                continue;
            }

            let Some(done) = stack.pop() else { break };
            if let (Some(parent), Some(via)) = (stack.last(), done.via) {
                let (p, n) = (parent.node.index(), done.node.index());
                low[p] = low[p].min(low[n]);
                if discovery[p].is_some_and(|d| low[n] > d) {
                    roles[via] = EdgeRole::Leg;
                }
            }
        }
    }
    roles
}

// ---------------------------------------------------------------------------
// Union-find reconnection test
// ---------------------------------------------------------------------------

fn classify_union_find(graph: &EndpointGraph) -> Vec<EdgeRole> {
    let g = &graph.graph;
    let endpoints: Vec<(usize, usize)> = g
        .raw_edges()
        .iter()
        .map(|e| (e.source().index(), e.target().index()))
        .collect();

    (0..endpoints.len())
        .map(|skip| {
            let (a, b) = endpoints[skip];
            if a == b {
                return EdgeRole::Loop;
            }
            let mut uf = UnionFind::<usize>::new(g.node_count());
            for (i, &(a, b)) in endpoints.iter().enumerate() {
                if i != skip {
                    uf.union(a, b);
                }
            }
            if uf.equiv(a, b) { EdgeRole::Loop } else { EdgeRole::Leg }
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cancel::NeverCancel;
    use crate::edge::{ReducedChunk, decompose};

    fn edges(chunks: &[&[&str]]) -> EdgeSet {
        let chunks = chunks.iter().enumerate().map(|(trip, stations)| ReducedChunk {
            trip,
            stations: stations.iter().map(|&s| StationName::from(s)).collect(),
            legs: vec![None; stations.len() - 1],
        });
        decompose(chunks, &NeverCancel).unwrap()
    }

    fn role_of(set: &EdgeSet, labels: &EdgeClassification, from: &str, to: &str) -> EdgeRole {
        let (id, _) = set
            .iter()
            .find(|(_, e)| {
                e.first() == Some(&from.into()) && e.last() == Some(&to.into())
            })
            .unwrap();
        labels.role(id).unwrap()
    }

    fn classify_both(set: &EdgeSet) -> EdgeClassification {
        let low_link = LoopClassifierKind::LowLink.classify(set);
        let union_find = LoopClassifierKind::UnionFind.classify(set);
        assert_eq!(low_link, union_find);
        low_link
    }

    #[test]
    fn triangle_with_hanging_leg() {
        let set = edges(&[&["A", "B"], &["B", "C"], &["C", "A"], &["C", "D"]]);
        let labels = classify_both(&set);
        assert_eq!(role_of(&set, &labels, "A", "B"), EdgeRole::Loop);
        assert_eq!(role_of(&set, &labels, "B", "C"), EdgeRole::Loop);
        assert_eq!(role_of(&set, &labels, "C", "A"), EdgeRole::Loop);
        assert_eq!(role_of(&set, &labels, "C", "D"), EdgeRole::Leg);
        assert_eq!(labels.loop_count(), 3);
        assert_eq!(labels.leg_count(), 1);
    }

    #[test]
    fn straight_line_is_all_legs() {
        let set = edges(&[&["A", "B", "C"], &["C", "D"], &["C", "E"]]);
        let labels = classify_both(&set);
        assert_eq!(labels.loop_count(), 0);
        assert_eq!(labels.leg_count(), set.len());
    }

    #[test]
    fn parallel_edges_form_a_loop() {
        let set = edges(&[&["A", "X", "B"], &["A", "Y", "B"]]);
        let labels = classify_both(&set);
        assert_eq!(labels.roles(), &[EdgeRole::Loop, EdgeRole::Loop]);
    }

    #[test]
    fn self_loop_edge_is_loop() {
        let set = edges(&[&["A", "B", "C", "A"], &["A", "D"]]);
        let labels = classify_both(&set);
        assert_eq!(role_of(&set, &labels, "A", "A"), EdgeRole::Loop);
        assert_eq!(role_of(&set, &labels, "A", "D"), EdgeRole::Leg);
    }

    #[test]
    fn two_loops_joined_by_a_bridge() {
        let set = edges(&[
            &["A", "B"],
            &["B", "C"],
            &["C", "A"],
            &["C", "D"],
            &["D", "E"],
            &["E", "F"],
            &["F", "D"],
        ]);
        let labels = classify_both(&set);
        assert_eq!(role_of(&set, &labels, "C", "D"), EdgeRole::Leg);
        assert_eq!(labels.leg_count(), 1);
    }

    #[test]
    fn disconnected_components_are_classified_independently() {
        let set = edges(&[&["A", "B"], &["B", "A"], &["X", "Y"]]);
        let labels = classify_both(&set);
        assert_eq!(role_of(&set, &labels, "X", "Y"), EdgeRole::Leg);
        assert_eq!(labels.loop_count(), 2);
    }

    #[test]
    fn classification_is_deterministic() {
        let set = edges(&[&["A", "B", "C"], &["C", "D", "A"], &["D", "E"], &["B", "F"]]);
        for kind in LoopClassifierKind::ALL {
            assert_eq!(kind.classify(&set), kind.classify(&set));
        }
        classify_both(&set);
    }

    #[test]
    fn empty_set() {
        let labels = classify_both(&EdgeSet::default());
        assert!(labels.roles().is_empty());
    }

    #[test]
    fn kind_parses_from_cli_names() {
        assert_eq!("low-link".parse::<LoopClassifierKind>(), Ok(LoopClassifierKind::LowLink));
        assert_eq!("Union-Find".parse::<LoopClassifierKind>(), Ok(LoopClassifierKind::UnionFind));
        assert!("dfs".parse::<LoopClassifierKind>().is_err());
        assert_eq!(LoopClassifierKind::UnionFind.to_string(), "union-find");
    }
}
