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

//! An in-memory switching fabric.
//!
//! The transient network keeps its terminals, internal links and services purely in memory. It
//! serves as the innermost fabric in tests and demonstrations, and as the reference
//! implementation of the [`Network`] and [`Service`] contracts: definitions are checked against
//! the internal topology, and lifecycle progress is driven asynchronously over the network's
//! executor exactly as it would be by a hardware driver's callbacks.

use crate::net::exec::Executor;
use crate::net::types::{
    Circuit, Listener, ListenerId, NetworkError, ServiceEvent, ServiceId, ServiceStatus,
    TerminalId,
};
use crate::net::{Network, Segment, Service};
use crate::span::Edge;
use log::*;
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableGraph;
use petgraph::visit::EdgeRef;
use petgraph::Undirected;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// An internal link between two terminals.
#[derive(Debug, Clone, Copy)]
struct Link {
    delay: f64,
    capacity: f64,
}

type Topology = StableGraph<String, Link, Undirected, u32>;

struct NetState {
    topology: Topology,
    terminals: HashMap<String, NodeIndex<u32>>,
    services: HashMap<ServiceId, Arc<TransientService>>,
}

struct Inner {
    name: String,
    executor: Executor,
    state: Mutex<NetState>,
}

/// An in-memory network of terminals joined by capacitated, delaying links.
///
/// Cloning yields another handle onto the same network.
#[derive(Clone)]
pub struct TransientNetwork {
    inner: Arc<Inner>,
}

impl TransientNetwork {
    /// Create an empty network.
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                executor: Executor::new(),
                state: Mutex::new(NetState {
                    topology: Topology::default(),
                    terminals: HashMap::new(),
                    services: HashMap::new(),
                }),
            }),
        }
    }

    /// Add a terminal under the given local name.
    pub fn add_terminal(&self, name: &str) -> Result<TerminalId, NetworkError> {
        let mut state = self.inner.state.lock().unwrap();
        if state.terminals.contains_key(name) {
            return Err(NetworkError::TerminalNameInUse(name.to_string()));
        }
        let node = state.topology.add_node(name.to_string());
        state.terminals.insert(name.to_string(), node);
        Ok(TerminalId::new(self.inner.name.clone(), name))
    }

    /// Remove a terminal and its links. Fails while any service definition references it.
    pub fn remove_terminal(&self, name: &str) -> Result<(), NetworkError> {
        let mut state = self.inner.state.lock().unwrap();
        let id = TerminalId::new(self.inner.name.clone(), name);
        let node = match state.terminals.get(name) {
            Some(node) => *node,
            None => return Err(NetworkError::UnknownTerminal(id)),
        };
        for service in state.services.values() {
            let in_use = service
                .state
                .lock()
                .unwrap()
                .definition
                .as_ref()
                .map(|segment| segment.circuits().any(|c| c.terminal == id))
                .unwrap_or(false);
            if in_use {
                return Err(NetworkError::TerminalInUse(id));
            }
        }
        state.topology.remove_node(node);
        state.terminals.remove(name);
        Ok(())
    }

    /// Join two terminals with an internal link of the given delay and capacity.
    pub fn add_link(
        &self,
        a: &str,
        b: &str,
        delay: f64,
        capacity: f64,
    ) -> Result<(), NetworkError> {
        let mut state = self.inner.state.lock().unwrap();
        let na = match state.terminals.get(a) {
            Some(n) => *n,
            None => {
                return Err(NetworkError::UnknownTerminal(TerminalId::new(
                    self.inner.name.clone(),
                    a,
                )))
            }
        };
        let nb = match state.terminals.get(b) {
            Some(n) => *n,
            None => {
                return Err(NetworkError::UnknownTerminal(TerminalId::new(
                    self.inner.name.clone(),
                    b,
                )))
            }
        };
        state.topology.add_edge(
            na,
            nb,
            Link { delay: delay.max(0.0), capacity: capacity.max(0.0) },
        );
        Ok(())
    }

    fn create_service(&self, id: ServiceId) -> Result<Arc<dyn Service>, NetworkError> {
        let mut state = self.inner.state.lock().unwrap();
        if state.services.contains_key(&id) {
            return Err(NetworkError::HandleInUse(id));
        }
        let service = Arc::new_cyclic(|me| TransientService {
            id,
            network_name: self.inner.name.clone(),
            network: Arc::downgrade(&self.inner),
            executor: self.inner.executor.clone(),
            state: Mutex::new(SvcState {
                status: ServiceStatus::Dormant,
                intent: false,
                definition: None,
                faults: Vec::new(),
                listeners: HashMap::new(),
                next_listener: 0,
            }),
            cond: Condvar::new(),
            me: me.clone(),
        });
        state.services.insert(id, service.clone());
        debug!("created service {} on {}", id, self.inner.name);
        Ok(service)
    }
}

/// Can every node of `nodes` reach every other over links of at least `capacity`?
fn mutually_reachable(topology: &Topology, nodes: &HashSet<NodeIndex<u32>>, capacity: f64) -> bool {
    let mut iter = nodes.iter();
    let seed = match iter.next() {
        Some(seed) => *seed,
        None => return true,
    };
    let costs = petgraph::algo::dijkstra(topology, seed, None, |e| {
        if e.weight().capacity >= capacity {
            e.weight().delay
        } else {
            f64::INFINITY
        }
    });
    nodes
        .iter()
        .all(|n| costs.get(n).map(|d| d.is_finite()).unwrap_or(false))
}

impl Network for TransientNetwork {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn get_terminal(&self, name: &str) -> Option<TerminalId> {
        let state = self.inner.state.lock().unwrap();
        if state.terminals.contains_key(name) {
            Some(TerminalId::new(self.inner.name.clone(), name))
        } else {
            None
        }
    }

    fn terminals(&self) -> Vec<TerminalId> {
        let state = self.inner.state.lock().unwrap();
        state
            .terminals
            .keys()
            .map(|name| TerminalId::new(self.inner.name.clone(), name.clone()))
            .collect()
    }

    fn new_service(&self) -> Result<Arc<dyn Service>, NetworkError> {
        self.create_service(Uuid::new_v4())
    }

    fn new_service_with_handle(&self, handle: ServiceId) -> Result<Arc<dyn Service>, NetworkError> {
        self.create_service(handle)
    }

    fn get_service(&self, id: ServiceId) -> Option<Arc<dyn Service>> {
        let state = self.inner.state.lock().unwrap();
        state.services.get(&id).map(|s| s.clone() as Arc<dyn Service>)
    }

    fn services(&self) -> Vec<ServiceId> {
        self.inner.state.lock().unwrap().services.keys().copied().collect()
    }

    fn get_model(
        &self,
        min_bandwidth: f64,
    ) -> Result<HashMap<Edge<TerminalId>, f64>, NetworkError> {
        let state = self.inner.state.lock().unwrap();
        let mut names: Vec<&String> = state.terminals.keys().collect();
        names.sort();
        let mut model = HashMap::new();
        for (position, a) in names.iter().enumerate() {
            let costs = petgraph::algo::dijkstra(
                &state.topology,
                state.terminals[*a],
                None,
                |e| {
                    // links below the capacity floor count as disconnected
                    if e.weight().capacity >= min_bandwidth {
                        e.weight().delay
                    } else {
                        f64::INFINITY
                    }
                },
            );
            for b in names.iter().skip(position + 1) {
                if let Some(delay) = costs.get(&state.terminals[*b]) {
                    if delay.is_finite() {
                        model.insert(
                            Edge::new(
                                TerminalId::new(self.inner.name.clone(), (*a).clone()),
                                TerminalId::new(self.inner.name.clone(), (*b).clone()),
                            ),
                            *delay,
                        );
                    }
                }
            }
        }
        Ok(model)
    }
}

struct SvcState {
    status: ServiceStatus,
    intent: bool,
    definition: Option<Segment>,
    faults: Vec<NetworkError>,
    listeners: HashMap<ListenerId, Listener>,
    next_listener: ListenerId,
}

/// A service on a [`TransientNetwork`]. Establishment and (de)activation complete
/// asynchronously on the network's executor.
struct TransientService {
    id: ServiceId,
    network_name: String,
    network: Weak<Inner>,
    executor: Executor,
    state: Mutex<SvcState>,
    cond: Condvar,
    me: Weak<TransientService>,
}

impl TransientService {
    /// Hand the event to every listener, on the executor, preserving generation order.
    fn emit(&self, state: &SvcState, event: ServiceEvent) {
        let mut listeners: Vec<(ListenerId, Listener)> =
            state.listeners.iter().map(|(id, l)| (*id, l.clone())).collect();
        listeners.sort_by_key(|(id, _)| *id);
        self.executor.submit(move || {
            for (_, listener) in listeners {
                listener(event.clone());
            }
        });
    }

    fn schedule<F>(&self, action: F)
    where
        F: FnOnce(&TransientService) + Send + 'static,
    {
        let me = self.me.clone();
        self.executor.submit(move || {
            if let Some(me) = me.upgrade() {
                action(&me);
            }
        });
    }

    fn settle_established(&self) {
        let mut state = self.state.lock().unwrap();
        if state.status != ServiceStatus::Establishing {
            return;
        }
        state.status = ServiceStatus::Inactive;
        self.emit(&state, ServiceEvent::Ready);
        if state.intent {
            state.status = ServiceStatus::Activating;
            self.schedule(|me| me.settle_activated());
        }
        self.cond.notify_all();
    }

    fn settle_activated(&self) {
        let mut state = self.state.lock().unwrap();
        if state.status != ServiceStatus::Activating {
            return;
        }
        state.status = ServiceStatus::Active;
        self.emit(&state, ServiceEvent::Activated);
        if !state.intent {
            state.status = ServiceStatus::Deactivating;
            self.schedule(|me| me.settle_deactivated());
        }
        self.cond.notify_all();
    }

    fn settle_deactivated(&self) {
        let mut state = self.state.lock().unwrap();
        if state.status != ServiceStatus::Deactivating {
            return;
        }
        state.status = ServiceStatus::Inactive;
        self.emit(&state, ServiceEvent::Deactivated);
        if state.intent {
            state.status = ServiceStatus::Activating;
            self.schedule(|me| me.settle_activated());
        }
        self.cond.notify_all();
    }
}

impl Service for TransientService {
    fn id(&self) -> ServiceId {
        self.id
    }

    fn define(&self, segment: Segment) -> Result<(), NetworkError> {
        segment.validate()?;
        let inner = match self.network.upgrade() {
            Some(inner) => inner,
            None => return Err(NetworkError::UnknownNetwork(self.network_name.clone())),
        };
        let feasible;
        {
            let net = inner.state.lock().unwrap();
            let mut nodes = HashSet::new();
            for circuit in segment.circuits() {
                if circuit.terminal.network != self.network_name {
                    return Err(NetworkError::InvalidTerminal(circuit.clone()));
                }
                match net.terminals.get(&circuit.terminal.name) {
                    Some(node) => {
                        nodes.insert(*node);
                    }
                    None => return Err(NetworkError::InvalidTerminal(circuit.clone())),
                }
            }
            feasible = mutually_reachable(&net.topology, &nodes, segment.worst_cut_demand());
        }

        let mut state = self.state.lock().unwrap();
        match state.status {
            ServiceStatus::Released => return Err(NetworkError::ReleasedService),
            ServiceStatus::Dormant | ServiceStatus::Inactive | ServiceStatus::Failed => {}
            _ => return Err(NetworkError::InUseService),
        }
        state.definition = Some(segment);
        state.faults.clear();
        if feasible {
            state.status = ServiceStatus::Establishing;
            self.schedule(|me| me.settle_established());
        } else {
            let fault = NetworkError::InsufficientResources(
                "endpoints are not mutually reachable at the requested bandwidth".to_string(),
            );
            warn!("service {} on {} is infeasible", self.id, self.network_name);
            state.faults.push(fault.clone());
            state.status = ServiceStatus::Failed;
            self.emit(&state, ServiceEvent::Failed(fault));
        }
        self.cond.notify_all();
        Ok(())
    }

    fn definition(&self) -> Option<Segment> {
        self.state.lock().unwrap().definition.clone()
    }

    fn activate(&self) -> Result<(), NetworkError> {
        let mut state = self.state.lock().unwrap();
        match state.status {
            ServiceStatus::Released => return Err(NetworkError::ReleasedService),
            ServiceStatus::Dormant => return Err(NetworkError::DormantService),
            ServiceStatus::Failed => return Err(NetworkError::InUseService),
            _ => {}
        }
        if state.intent {
            return Ok(());
        }
        state.intent = true;
        if state.status == ServiceStatus::Inactive {
            state.status = ServiceStatus::Activating;
            self.schedule(|me| me.settle_activated());
            self.cond.notify_all();
        }
        Ok(())
    }

    fn deactivate(&self) -> Result<(), NetworkError> {
        let mut state = self.state.lock().unwrap();
        match state.status {
            ServiceStatus::Released => return Err(NetworkError::ReleasedService),
            ServiceStatus::Dormant => return Err(NetworkError::DormantService),
            _ => {}
        }
        if !state.intent && state.status != ServiceStatus::Active {
            return Ok(());
        }
        state.intent = false;
        if state.status == ServiceStatus::Active {
            state.status = ServiceStatus::Deactivating;
            self.schedule(|me| me.settle_deactivated());
            self.cond.notify_all();
        }
        Ok(())
    }

    fn status(&self) -> ServiceStatus {
        self.state.lock().unwrap().status
    }

    fn release(&self) -> Result<(), NetworkError> {
        {
            let mut state = self.state.lock().unwrap();
            if state.status == ServiceStatus::Released {
                return Ok(());
            }
            state.status = ServiceStatus::Released;
            state.intent = false;
            state.definition = None;
            self.emit(&state, ServiceEvent::Released);
            self.cond.notify_all();
        }
        if let Some(inner) = self.network.upgrade() {
            inner.state.lock().unwrap().services.remove(&self.id);
        }
        Ok(())
    }

    fn faults(&self) -> Vec<NetworkError> {
        self.state.lock().unwrap().faults.clone()
    }

    fn add_listener(&self, listener: Listener) -> ListenerId {
        let mut state = self.state.lock().unwrap();
        let id = state.next_listener;
        state.next_listener += 1;
        state.listeners.insert(id, listener);
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        self.state.lock().unwrap().listeners.remove(&id);
    }

    fn await_status(&self, statuses: &HashSet<ServiceStatus>, timeout: Duration) -> ServiceStatus {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap();
        loop {
            if statuses.contains(&state.status) {
                return state.status;
            }
            let now = Instant::now();
            if now >= deadline {
                return state.status;
            }
            let (fresh, _) = self.cond.wait_timeout(state, deadline - now).unwrap();
            state = fresh;
        }
    }
}
