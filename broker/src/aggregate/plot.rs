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

//! Tree plotting: turning a segment into trunk tunnels and per-member slices.
//!
//! The plot works over the composed topology: trunks that can still carry the demand form the
//! inter-network edges, and every involved member contributes the mesh returned by its
//! `get_model`. Spur pruning, FIB routing, reweighting and spanning-tree growth come from
//! [`crate::span`]; the admissibility predicate rejects any edge that would cross between two
//! member networks both already in the tree. Plotting either succeeds completely or leaves no
//! allocation behind.

use crate::bandwidth::{BandwidthFunction, PairsFunction, ReducedFunction};
use crate::net::{
    Circuit, Network, NetworkError, Segment, TerminalId, TrafficFlow, Trunk, Tunnel,
};
use crate::span::{self, Edge};
use log::*;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A snapshot of the aggregator's composition, taken under the aggregator lock and used by
/// plotting and recovery without holding it.
pub(crate) struct PlotContext {
    /// Name of the aggregator.
    pub aggregator: String,
    /// Exposed terminal name to wrapped inner terminal.
    pub terminals: HashMap<String, TerminalId>,
    /// Member networks by name.
    pub members: HashMap<String, Arc<dyn Network>>,
    /// Trunks keyed by their terminal pair.
    pub trunks: HashMap<Edge<TerminalId>, Arc<Trunk>>,
}

/// One allocated trunk tunnel of a plotted service.
pub(crate) struct TunnelAllocation {
    pub trunk: Arc<Trunk>,
    pub tunnel: Tunnel,
    pub bandwidth: f64,
}

/// The outcome of plotting: tunnels to hold and per-member slices to request.
pub(crate) struct Plot {
    pub tunnels: Vec<TunnelAllocation>,
    pub groups: HashMap<String, Vec<(Circuit, TrafficFlow)>>,
}

/// Endpoint indices in the tree component of `start` once `blocked` is removed.
fn component_endpoints(
    tree: &HashMap<TerminalId, HashSet<TerminalId>>,
    start: &TerminalId,
    blocked: &Edge<TerminalId>,
    terminal_endpoints: &HashMap<TerminalId, Vec<usize>>,
) -> HashSet<usize> {
    let mut seen: HashSet<TerminalId> = HashSet::new();
    let mut stack = vec![start.clone()];
    seen.insert(start.clone());
    while let Some(vertex) = stack.pop() {
        if let Some(neighbours) = tree.get(&vertex) {
            for neighbour in neighbours {
                if Edge::new(vertex.clone(), neighbour.clone()) == *blocked {
                    continue;
                }
                if seen.insert(neighbour.clone()) {
                    stack.push(neighbour.clone());
                }
            }
        }
    }
    seen.iter()
        .filter_map(|t| terminal_endpoints.get(t))
        .flatten()
        .copied()
        .collect()
}

/// Longest destination-to-destination path delay in the tree, using the original edge delays.
fn worst_tree_delay(
    tree: &HashMap<TerminalId, HashSet<TerminalId>>,
    delays: &HashMap<Edge<TerminalId>, f64>,
    dests: &HashSet<TerminalId>,
) -> f64 {
    let mut worst = 0.0f64;
    for dest in dests {
        let mut distance: HashMap<TerminalId, f64> = HashMap::new();
        distance.insert(dest.clone(), 0.0);
        let mut stack = vec![dest.clone()];
        while let Some(vertex) = stack.pop() {
            let here = distance[&vertex];
            if let Some(neighbours) = tree.get(&vertex) {
                for neighbour in neighbours {
                    if distance.contains_key(neighbour) {
                        continue;
                    }
                    let hop = delays
                        .get(&Edge::new(vertex.clone(), neighbour.clone()))
                        .copied()
                        .unwrap_or(0.0);
                    distance.insert(neighbour.clone(), here + hop);
                    stack.push(neighbour.clone());
                }
            }
        }
        for other in dests {
            if let Some(d) = distance.get(other) {
                worst = worst.max(*d);
            }
        }
    }
    worst
}

fn infeasible<S: Into<String>>(reason: S) -> NetworkError {
    NetworkError::InsufficientResources(reason.into())
}

/// Plot a tree for the segment and allocate its tunnels.
///
/// On failure nothing is retained: every tunnel allocated along the way is returned to its
/// trunk before the error propagates.
pub(crate) fn plot_tree(ctx: &PlotContext, segment: &Segment) -> Result<Plot, NetworkError> {
    // map the client's circuits onto the wrapped inner terminals
    let mut endpoints: Vec<(Circuit, TrafficFlow)> = Vec::new();
    for (circuit, flow) in segment.endpoints() {
        if circuit.terminal.network != ctx.aggregator {
            return Err(NetworkError::InvalidTerminal(circuit.clone()));
        }
        let inner = ctx
            .terminals
            .get(&circuit.terminal.name)
            .ok_or_else(|| NetworkError::InvalidTerminal(circuit.clone()))?;
        endpoints.push((Circuit::new(inner.clone(), circuit.label), *flow));
    }
    let dests: HashSet<TerminalId> =
        endpoints.iter().map(|(c, _)| c.terminal.clone()).collect();
    let required = segment.worst_cut_demand();

    // candidate edges: eligible trunks plus the models of every involved member
    let mut candidates: HashMap<Edge<TerminalId>, f64> = HashMap::new();
    let mut involved: HashSet<String> = dests.iter().map(|t| t.network.clone()).collect();
    for (edge, trunk) in &ctx.trunks {
        if trunk.remaining_bandwidth() >= required && trunk.available_tunnels() >= 1 {
            candidates.insert(edge.clone(), trunk.delay());
            involved.insert(edge.first().network.clone());
            involved.insert(edge.second().network.clone());
        } else {
            trace!("trunk {}--{} cannot carry {}", trunk.start(), trunk.end(), required);
        }
    }
    for network in &involved {
        let member = ctx
            .members
            .get(network)
            .ok_or_else(|| NetworkError::UnknownNetwork(network.clone()))?;
        for (edge, delay) in member.get_model(required)? {
            candidates.entry(edge).or_insert(delay);
        }
    }

    // prune, route, reweight, and grow the tree
    span::prune(&dests, &mut candidates);
    let fibs = span::route(&dests, &candidates);
    let weights = span::flatten(&dests, &fibs);
    let reached_networks: RefCell<HashSet<String>> = RefCell::new(HashSet::new());
    let tree = span::span(
        &dests,
        &weights,
        |vertex: &TerminalId| {
            reached_networks.borrow_mut().insert(vertex.network.clone());
        },
        |edge: &Edge<TerminalId>| {
            if edge.first().network == edge.second().network {
                return true;
            }
            let reached = reached_networks.borrow();
            !(reached.contains(&edge.first().network)
                && reached.contains(&edge.second().network))
        },
    )
    .ok_or_else(|| infeasible("no spanning tree connects the requested circuits"))?;

    if let Some(ceiling) = segment.max_delay() {
        let worst = worst_tree_delay(&tree, &candidates, &dests);
        if worst > ceiling {
            return Err(infeasible(format!(
                "tree delay {} exceeds the ceiling {}",
                worst, ceiling
            )));
        }
    }

    // index which endpoints sit on which terminal
    let mut terminal_endpoints: HashMap<TerminalId, Vec<usize>> = HashMap::new();
    for (index, (circuit, _)) in endpoints.iter().enumerate() {
        terminal_endpoints
            .entry(circuit.terminal.clone())
            .or_insert_with(Vec::new)
            .push(index);
    }

    let function: Arc<dyn BandwidthFunction> = Arc::new(
        PairsFunction::new(
            endpoints.iter().map(|(_, f)| f.ingress).collect(),
            endpoints.iter().map(|(_, f)| f.egress).collect(),
        )
        .map_err(|e| infeasible(e.to_string()))?,
    );
    let cap = segment.bandwidth_cap();
    let clamp = move |rate: f64| match cap {
        Some(cap) => rate.min(cap),
        None => rate,
    };

    // walk the tree: allocate one tunnel per inter-network edge
    let mut allocations: Vec<TunnelAllocation> = Vec::new();
    let outcome = (|| -> Result<HashMap<String, Vec<(Circuit, TrafficFlow)>>, NetworkError> {
        let mut tree_edges: HashSet<Edge<TerminalId>> = HashSet::new();
        for (vertex, neighbours) in &tree {
            for neighbour in neighbours {
                tree_edges.insert(Edge::new(vertex.clone(), neighbour.clone()));
            }
        }

        // per-member circuit groups: every circuit carries the set of endpoints served
        // through it
        let mut member_groups: HashMap<String, Vec<(Circuit, HashSet<usize>)>> = HashMap::new();
        for (index, (circuit, _)) in endpoints.iter().enumerate() {
            let mut own = HashSet::new();
            own.insert(index);
            member_groups
                .entry(circuit.terminal.network.clone())
                .or_insert_with(Vec::new)
                .push((circuit.clone(), own));
        }

        for edge in &tree_edges {
            if edge.first().network == edge.second().network {
                continue;
            }
            let trunk = ctx
                .trunks
                .get(edge)
                .ok_or_else(|| infeasible("an inter-network edge has no backing trunk"))?;
            let start_side =
                component_endpoints(&tree, trunk.start(), edge, &terminal_endpoints);
            let end_side = component_endpoints(&tree, trunk.end(), edge, &terminal_endpoints);
            if start_side.is_empty() || end_side.is_empty() {
                return Err(infeasible("a tree edge separates no endpoints"));
            }
            let forward = clamp(
                function
                    .apply(&start_side)
                    .map_err(|e| infeasible(e.to_string()))?
                    .min(),
            );
            let reverse = clamp(
                function
                    .apply(&end_side)
                    .map_err(|e| infeasible(e.to_string()))?
                    .min(),
            );
            let bandwidth = forward.max(reverse);
            let tunnel = trunk
                .allocate_tunnel(bandwidth)
                .map_err(|e| infeasible(e.to_string()))?;
            debug!(
                "tunnel {} for cut {}/{} endpoints, {} wide",
                tunnel.start,
                start_side.len(),
                end_side.len(),
                bandwidth
            );
            member_groups
                .entry(trunk.start().network.clone())
                .or_insert_with(Vec::new)
                .push((tunnel.start.clone(), end_side));
            member_groups
                .entry(trunk.end().network.clone())
                .or_insert_with(Vec::new)
                .push((tunnel.end.clone(), start_side));
            allocations.push(TunnelAllocation { trunk: trunk.clone(), tunnel, bandwidth });
        }

        // derive each member's flows by reducing the function over its circuit groups
        let mut groups: HashMap<String, Vec<(Circuit, TrafficFlow)>> = HashMap::new();
        for (network, circuits) in member_groups {
            let mut slice = Vec::new();
            if circuits.len() == 1 {
                // a single circuit can only mean a single-endpoint request
                let (circuit, _) = &circuits[0];
                slice.push((circuit.clone(), endpoints[0].1));
            } else {
                let partition: Vec<Vec<usize>> = circuits
                    .iter()
                    .map(|(_, group)| {
                        let mut indices: Vec<usize> = group.iter().copied().collect();
                        indices.sort_unstable();
                        indices
                    })
                    .collect();
                let reduced = ReducedFunction::new(function.clone(), partition)
                    .map_err(|e| infeasible(e.to_string()))?;
                for (position, (circuit, _)) in circuits.iter().enumerate() {
                    let mut own = HashSet::new();
                    own.insert(position);
                    let rest: HashSet<usize> =
                        (0..circuits.len()).filter(|p| *p != position).collect();
                    let ingress = clamp(
                        reduced
                            .apply(&own)
                            .map_err(|e| infeasible(e.to_string()))?
                            .min(),
                    );
                    let egress = clamp(
                        reduced
                            .apply(&rest)
                            .map_err(|e| infeasible(e.to_string()))?
                            .min(),
                    );
                    slice.push((circuit.clone(), TrafficFlow::new(ingress, egress)));
                }
            }
            groups.insert(network, slice);
        }
        Ok(groups)
    })();

    match outcome {
        Ok(groups) => {
            info!(
                "plotted {} tunnels across {} member networks",
                allocations.len(),
                groups.len()
            );
            Ok(Plot { tunnels: allocations, groups })
        }
        Err(cause) => {
            for allocation in &allocations {
                let _ = allocation.trunk.release_tunnel(allocation.tunnel.start.label);
                allocation.trunk.release_bandwidth(allocation.bandwidth);
            }
            Err(cause)
        }
    }
}
