// Data-Plane Broker: composing layer-2 virtual circuits across fabrics
// Copyright (C) 2022  The Data-Plane Broker developers
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! # Spanning computations
//!
//! This module contains the graph primitives used to plot trees over a composed topology:
//! undirected [`Edge`]s over an abstract vertex type, forwarding-information-base computation by
//! distance-vector relaxation ([`route`]), spur removal ([`prune`]), terminal-aware edge
//! reweighting ([`flatten`]) and spanning-tree growth with a pluggable admissibility predicate
//! ([`span`]).
//!
//! All functions are generic over the vertex type `V`. The vertex set is implicit: a vertex
//! exists exactly when some edge mentions it or when it is listed as a destination.

use log::*;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

/// An undirected edge between two vertices.
///
/// The pair is canonicalised on construction so that `Edge::new(a, b) == Edge::new(b, a)` and
/// both hash identically, making the type usable as a key in hash maps and sets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Edge<V> {
    first: V,
    second: V,
}

impl<V: Ord> Edge<V> {
    /// Create a new edge. The order of the two vertices does not matter.
    pub fn new(a: V, b: V) -> Self {
        if a <= b {
            Self { first: a, second: b }
        } else {
            Self { first: b, second: a }
        }
    }
}

impl<V> Edge<V> {
    /// The canonically smaller endpoint.
    pub fn first(&self) -> &V {
        &self.first
    }

    /// The canonically larger endpoint.
    pub fn second(&self) -> &V {
        &self.second
    }

    /// Does this edge touch the given vertex?
    pub fn contains(&self, v: &V) -> bool
    where
        V: PartialEq,
    {
        self.first == *v || self.second == *v
    }

    /// The endpoint opposite to `v`, or `None` if `v` is not an endpoint.
    pub fn other(&self, v: &V) -> Option<&V>
    where
        V: PartialEq,
    {
        if self.first == *v {
            Some(&self.second)
        } else if self.second == *v {
            Some(&self.first)
        } else {
            None
        }
    }
}

impl<V: fmt::Display> fmt::Display for Edge<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}--{}", self.first, self.second)
    }
}

/// One forwarding entry: the neighbour to forward to, and the total distance of the path.
///
/// The entry a destination holds for itself has no next hop and distance zero.
#[derive(Debug, Clone, PartialEq)]
pub struct Way<V> {
    /// The neighbour on the shortest path, or `None` on the destination itself.
    pub next_hop: Option<V>,
    /// Total weight of the shortest path.
    pub distance: f64,
}

/// Per-vertex forwarding table: destination to [`Way`].
pub type Fib<V> = HashMap<V, Way<V>>;

fn neighbourhood<V>(edges: &HashMap<Edge<V>, f64>) -> HashMap<V, Vec<(V, f64)>>
where
    V: Clone + Eq + std::hash::Hash,
{
    let mut neighbours: HashMap<V, Vec<(V, f64)>> = HashMap::new();
    for (edge, weight) in edges {
        neighbours
            .entry(edge.first().clone())
            .or_insert_with(Vec::new)
            .push((edge.second().clone(), *weight));
        neighbours
            .entry(edge.second().clone())
            .or_insert_with(Vec::new)
            .push((edge.first().clone(), *weight));
    }
    neighbours
}

/// Compute the forwarding information base of every vertex for the given destinations.
///
/// The result maps every vertex that can reach at least one destination to its FIB. Computation
/// is iterative distance-vector relaxation: destinations seed their own tables with distance
/// zero, and a work set of possibly-stale vertices is drained by recomputing each table from the
/// tables of the neighbours, re-enqueueing the neighbours whenever the table changed. Ties are
/// won by the first neighbour seen. The relaxation converges because weights are non-negative.
pub fn route<V>(dests: &HashSet<V>, edges: &HashMap<Edge<V>, f64>) -> HashMap<V, Fib<V>>
where
    V: Clone + Eq + std::hash::Hash + Ord,
{
    let neighbours = neighbourhood(edges);

    // Tables start empty even for the destinations: the first recomputation of a destination
    // inserts its own zero-distance entry, registers as a change, and thereby floods the
    // neighbourhood.
    let mut fibs: HashMap<V, Fib<V>> = HashMap::new();
    let mut work: VecDeque<V> = VecDeque::new();
    let mut queued: HashSet<V> = HashSet::new();
    for dest in dests {
        work.push_back(dest.clone());
        queued.insert(dest.clone());
    }

    while let Some(vertex) = work.pop_front() {
        queued.remove(&vertex);

        // recompute the table of `vertex` from scratch
        let mut fresh = Fib::new();
        if dests.contains(&vertex) {
            fresh.insert(vertex.clone(), Way { next_hop: None, distance: 0.0 });
        }
        if let Some(adjacent) = neighbours.get(&vertex) {
            for (neighbour, weight) in adjacent {
                if let Some(table) = fibs.get(neighbour) {
                    for (dest, way) in table {
                        let candidate = weight + way.distance;
                        let better = match fresh.get(dest) {
                            None => true,
                            Some(current) => candidate < current.distance,
                        };
                        if better {
                            fresh.insert(
                                dest.clone(),
                                Way { next_hop: Some(neighbour.clone()), distance: candidate },
                            );
                        }
                    }
                }
            }
        }

        let changed = fibs.get(&vertex) != Some(&fresh);
        if changed {
            trace!("fib changed, re-enqueueing neighbours");
            fibs.insert(vertex.clone(), fresh);
            if let Some(adjacent) = neighbours.get(&vertex) {
                for (neighbour, _) in adjacent {
                    if queued.insert(neighbour.clone()) {
                        work.push_back(neighbour.clone());
                    }
                }
            }
        }
    }

    fibs
}

/// Remove spurs from an edge set, in place.
///
/// A spur is a vertex of degree at most one which is not a destination; removing it may expose
/// further spurs, so removal iterates until a fixed point is reached. Connectivity between the
/// destinations is unaffected, since no shortest path between two destinations ever crosses a
/// degree-one non-destination.
pub fn prune<V, W>(dests: &HashSet<V>, edges: &mut HashMap<Edge<V>, W>)
where
    V: Clone + Eq + std::hash::Hash,
{
    loop {
        let mut degree: HashMap<&V, usize> = HashMap::new();
        for edge in edges.keys() {
            *degree.entry(edge.first()).or_insert(0) += 1;
            *degree.entry(edge.second()).or_insert(0) += 1;
        }
        let doomed: HashSet<V> = degree
            .iter()
            .filter(|(v, d)| **d <= 1 && !dests.contains(**v))
            .map(|(v, _)| (*v).clone())
            .collect();
        if doomed.is_empty() {
            return;
        }
        edges.retain(|edge, _| !doomed.contains(edge.first()) && !doomed.contains(edge.second()));
    }
}

/// Reweight edges so that spanning-tree selection favours shared, central edges.
///
/// Every FIB entry at vertex `u` with next hop `v` and distance `d` contributes `d` to the
/// tally of the edge `u--v` and bumps its usage count. The emitted weight of an edge is
/// `sum × (|dests| + 1 − count)`: an edge on many destination-to-destination shortest paths
/// ends up cheap, an edge used only by distant pairs stays expensive.
pub fn flatten<V>(dests: &HashSet<V>, fibs: &HashMap<V, Fib<V>>) -> HashMap<Edge<V>, f64>
where
    V: Clone + Eq + std::hash::Hash + Ord,
{
    let mut tally: HashMap<Edge<V>, (f64, usize)> = HashMap::new();
    for (vertex, fib) in fibs {
        for way in fib.values() {
            if let Some(next_hop) = &way.next_hop {
                let entry = tally
                    .entry(Edge::new(vertex.clone(), next_hop.clone()))
                    .or_insert((0.0, 0));
                entry.0 += way.distance;
                entry.1 += 1;
            }
        }
    }
    let span_count = dests.len() + 1;
    tally
        .into_iter()
        .map(|(edge, (sum, count))| {
            let weight = sum * (span_count.saturating_sub(count)) as f64;
            (edge, weight)
        })
        .collect()
}

/// Grow a spanning tree over the destinations, Prim-style.
///
/// Starting from one destination, the cheapest admissible edge crossing the frontier is added
/// until every destination is reached. `on_add` is invoked for every vertex entering the
/// reached set, including the seed; `admissible` may veto any candidate edge. Spurs that are
/// not needed to connect the destinations are pruned from the result.
///
/// Returns the tree as an adjacency map, or `None` when no admissible edge connects an
/// unreached destination.
pub fn span<V, A, P>(
    dests: &HashSet<V>,
    weights: &HashMap<Edge<V>, f64>,
    mut on_add: A,
    mut admissible: P,
) -> Option<HashMap<V, HashSet<V>>>
where
    V: Clone + Eq + std::hash::Hash + Ord,
    A: FnMut(&V),
    P: FnMut(&Edge<V>) -> bool,
{
    let mut tree: HashMap<Edge<V>, f64> = HashMap::new();
    let mut reached: HashSet<V> = HashSet::new();

    if let Some(seed) = dests.iter().min() {
        reached.insert(seed.clone());
        on_add(seed);
    } else {
        return Some(HashMap::new());
    }

    while !dests.iter().all(|d| reached.contains(d)) {
        let mut best: Option<(&Edge<V>, f64)> = None;
        for (edge, weight) in weights {
            let crossing = reached.contains(edge.first()) != reached.contains(edge.second());
            if !crossing {
                continue;
            }
            if let Some((_, best_weight)) = best {
                if *weight >= best_weight {
                    continue;
                }
            }
            if !admissible(edge) {
                continue;
            }
            best = Some((edge, *weight));
        }
        match best {
            Some((edge, weight)) => {
                let fresh = if reached.contains(edge.first()) {
                    edge.second()
                } else {
                    edge.first()
                };
                reached.insert(fresh.clone());
                on_add(fresh);
                tree.insert(edge.clone(), weight);
            }
            None => {
                debug!("spanning tree cannot be extended to all destinations");
                return None;
            }
        }
    }

    prune(dests, &mut tree);

    let mut adjacency: HashMap<V, HashSet<V>> = HashMap::new();
    for edge in tree.keys() {
        adjacency
            .entry(edge.first().clone())
            .or_insert_with(HashSet::new)
            .insert(edge.second().clone());
        adjacency
            .entry(edge.second().clone())
            .or_insert_with(HashSet::new)
            .insert(edge.first().clone());
    }
    for dest in dests {
        adjacency.entry(dest.clone()).or_insert_with(HashSet::new);
    }
    Some(adjacency)
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use maplit::{hashmap, hashset};
    use petgraph::graph::{NodeIndex, UnGraph};
    use petgraph::visit::EdgeRef;
    use rand::prelude::*;

    fn edges(list: &[(u32, u32, f64)]) -> HashMap<Edge<u32>, f64> {
        list.iter().map(|(a, b, w)| (Edge::new(*a, *b), *w)).collect()
    }

    #[test]
    fn test_edge_is_unordered() {
        assert_eq!(Edge::new(1u32, 2u32), Edge::new(2u32, 1u32));
        let mut set = HashSet::new();
        set.insert(Edge::new(1u32, 2u32));
        assert!(set.contains(&Edge::new(2u32, 1u32)));
        assert_eq!(Edge::new(1u32, 2u32).other(&2), Some(&1));
        assert_eq!(Edge::new(1u32, 2u32).other(&3), None);
        assert!(Edge::new(1u32, 2u32).contains(&1));
    }

    /// ```text
    /// 0 --1-- 1 --1-- 2
    ///  \             /
    ///   `----5------'
    /// ```
    #[test]
    fn test_route_simple() {
        let dests = hashset![0u32, 2u32];
        let edges = edges(&[(0, 1, 1.0), (1, 2, 1.0), (0, 2, 5.0)]);
        let fibs = route(&dests, &edges);

        assert_eq!(fibs[&0][&0], Way { next_hop: None, distance: 0.0 });
        assert_eq!(fibs[&0][&2], Way { next_hop: Some(1), distance: 2.0 });
        assert_eq!(fibs[&1][&0], Way { next_hop: Some(0), distance: 1.0 });
        assert_eq!(fibs[&1][&2], Way { next_hop: Some(2), distance: 1.0 });
        assert_eq!(fibs[&2][&0], Way { next_hop: Some(1), distance: 2.0 });
    }

    #[test]
    fn test_route_unreachable_vertex() {
        let dests = hashset![0u32];
        let edges = edges(&[(0, 1, 1.0), (2, 3, 1.0)]);
        let fibs = route(&dests, &edges);
        assert_eq!(fibs[&1][&0], Way { next_hop: Some(0), distance: 1.0 });
        // the disconnected component never learns a route
        assert!(fibs.get(&2).map(|f| f.is_empty()).unwrap_or(true));
        assert!(fibs.get(&3).map(|f| f.is_empty()).unwrap_or(true));
    }

    /// Cross-check the relaxation against an independent Dijkstra on random graphs.
    #[test]
    fn test_route_matches_dijkstra() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..20 {
            let n: u32 = rng.gen_range(4, 12);
            let mut graph: UnGraph<(), f64> = UnGraph::new_undirected();
            let nodes: Vec<NodeIndex> = (0..n).map(|_| graph.add_node(())).collect();
            let mut map = HashMap::new();
            for a in 0..n {
                for b in (a + 1)..n {
                    if rng.gen_bool(0.5) {
                        let w = rng.gen_range(1, 10) as f64;
                        graph.add_edge(nodes[a as usize], nodes[b as usize], w);
                        map.insert(Edge::new(a, b), w);
                    }
                }
            }
            let dests: HashSet<u32> = (0..n).filter(|_| rng.gen_bool(0.4)).collect();
            let fibs = route(&dests, &map);
            for dest in &dests {
                let oracle = petgraph::algo::dijkstra(
                    &graph,
                    nodes[*dest as usize],
                    None,
                    |e| *e.weight(),
                );
                for v in 0..n {
                    let expected = oracle.get(&nodes[v as usize]);
                    let got = fibs.get(&v).and_then(|f| f.get(dest));
                    match (expected, got) {
                        (Some(d), Some(way)) => assert_approx_eq!(*d, way.distance),
                        (None, None) => {}
                        (None, Some(_)) => panic!("fib found a route where none exists"),
                        (Some(_), None) => panic!("fib missed an existing route"),
                    }
                }
            }
        }
    }

    #[test]
    fn test_prune_removes_spur_chains() {
        let dests = hashset![0u32, 1u32];
        // 0 -- 1 is the useful part; 1 -- 2 -- 3 is a spur chain
        let mut map = edges(&[(0, 1, 1.0), (1, 2, 1.0), (2, 3, 1.0)]);
        prune(&dests, &mut map);
        assert_eq!(map.len(), 1);
        assert!(map.contains_key(&Edge::new(0, 1)));
    }

    #[test]
    fn test_prune_keeps_destination_leaves() {
        let dests = hashset![0u32, 3u32];
        let mut map = edges(&[(0, 1, 1.0), (1, 2, 1.0), (2, 3, 1.0)]);
        prune(&dests, &mut map);
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn test_prune_preserves_connectivity() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let n: u32 = rng.gen_range(4, 12);
            let mut map = HashMap::new();
            for a in 0..n {
                for b in (a + 1)..n {
                    if rng.gen_bool(0.4) {
                        map.insert(Edge::new(a, b), 1.0);
                    }
                }
            }
            let dests: HashSet<u32> = (0..n).filter(|_| rng.gen_bool(0.4)).collect();
            let before = route(&dests, &map);
            let mut pruned = map.clone();
            prune(&dests, &mut pruned);
            let after = route(&dests, &pruned);
            for a in &dests {
                for b in &dests {
                    let reachable = before.get(a).map(|f| f.contains_key(b)).unwrap_or(false);
                    let still = after.get(a).map(|f| f.contains_key(b)).unwrap_or(false);
                    assert_eq!(reachable, still);
                }
            }
        }
    }

    #[test]
    fn test_flatten_prefers_shared_edges() {
        // three destinations hanging off a shared middle edge
        //
        // 0 --- 4 --- 5 --- 1
        //             |
        //             2
        let dests = hashset![0u32, 1u32, 2u32];
        let map = edges(&[(0, 4, 1.0), (4, 5, 1.0), (5, 1, 1.0), (5, 2, 1.0)]);
        let fibs = route(&dests, &map);
        let weights = flatten(&dests, &fibs);
        // the shared middle edge is used by more destination pairs than the stub to 2
        assert!(weights[&Edge::new(4, 5)] > 0.0);
        assert!(weights.contains_key(&Edge::new(5, 2)));
    }

    #[test]
    fn test_span_connects_all_destinations() {
        let dests = hashset![0u32, 2u32, 3u32];
        let map = edges(&[(0, 1, 1.0), (1, 2, 1.0), (1, 3, 1.0), (0, 3, 10.0)]);
        let tree = span(&dests, &map, |_| {}, |_| true).unwrap();
        // 0-1, 1-2, 1-3 form the cheap tree; 0-3 is redundant
        assert_eq!(tree[&1], hashset![0, 2, 3]);
        assert_eq!(tree[&0], hashset![1]);
        let edge_count: usize = tree.values().map(|n| n.len()).sum::<usize>() / 2;
        assert_eq!(edge_count, tree.len() - 1);
    }

    #[test]
    fn test_span_invokes_hook_for_every_vertex() {
        let dests = hashset![0u32, 2u32];
        let map = edges(&[(0, 1, 1.0), (1, 2, 1.0)]);
        let mut seen = Vec::new();
        span(&dests, &map, |v| seen.push(*v), |_| true).unwrap();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    fn test_span_respects_veto() {
        let dests = hashset![0u32, 1u32];
        // the direct edge is cheapest but vetoed; the detour must be taken
        let map = edges(&[(0, 1, 1.0), (0, 2, 2.0), (2, 1, 2.0)]);
        let vetoed = Edge::new(0u32, 1u32);
        let tree = span(&dests, &map, |_| {}, |e| *e != vetoed).unwrap();
        assert_eq!(tree[&2], hashset![0, 1]);
    }

    #[test]
    fn test_span_fails_when_disconnected() {
        let dests = hashset![0u32, 3u32];
        let map = edges(&[(0, 1, 1.0), (2, 3, 1.0)]);
        assert_eq!(span(&dests, &map, |_| {}, |_| true), None);
    }

    #[test]
    fn test_span_prunes_spurs() {
        let dests = hashset![0u32, 3u32];
        let map = hashmap![
            Edge::new(0u32, 1u32) => 1.0,
            Edge::new(1u32, 2u32) => 1.0,
            Edge::new(1u32, 3u32) => 2.0,
        ];
        // growth picks up the cheap edge towards 2 before reaching 3; 2 must be pruned again
        let tree = span(&dests, &map, |_| {}, |_| true).unwrap();
        assert!(!tree.contains_key(&2));
        assert_eq!(tree[&1], hashset![0, 3]);
    }

    #[test]
    fn test_span_single_destination() {
        let dests = hashset![7u32];
        let map = edges(&[(7, 8, 1.0)]);
        let tree = span(&dests, &map, |_| {}, |_| true).unwrap();
        assert_eq!(tree[&7], hashset![]);
    }
}
