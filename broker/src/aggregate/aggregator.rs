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

//! The aggregator: a virtual network composed of member networks and trunks.

use crate::aggregate::plot::PlotContext;
use crate::aggregate::service::AggregateService;
use crate::aggregate::store::ServiceStore;
use crate::net::exec::Executor;
use crate::net::{
    Network, NetworkError, Service, ServiceId, TerminalId, Trunk, TrunkError,
};
use crate::span::{self, Edge};
use itertools::Itertools;
use log::*;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

struct AggState {
    members: HashMap<String, Arc<dyn Network>>,
    terminals: HashMap<String, TerminalId>,
    trunks: HashMap<Edge<TerminalId>, Arc<Trunk>>,
    services: HashMap<ServiceId, Arc<AggregateService>>,
}

pub(crate) struct AggInner {
    name: String,
    executor: Executor,
    store: Option<Arc<dyn ServiceStore>>,
    state: Mutex<AggState>,
}

impl AggInner {
    pub(crate) fn executor(&self) -> &Executor {
        &self.executor
    }

    pub(crate) fn store(&self) -> Option<Arc<dyn ServiceStore>> {
        self.store.clone()
    }

    /// Snapshot the composition, so plotting and recovery can run without the aggregator lock.
    pub(crate) fn plot_context(&self) -> PlotContext {
        let state = self.state.lock().unwrap();
        PlotContext {
            aggregator: self.name.clone(),
            terminals: state.terminals.clone(),
            members: state.members.clone(),
            trunks: state.trunks.clone(),
        }
    }

    pub(crate) fn remove_service(&self, id: ServiceId) {
        self.state.lock().unwrap().services.remove(&id);
    }
}

/// A network whose topology is the union of its trunks and the models of its member networks.
///
/// The aggregator exposes named terminals, each wrapping a terminal of one member network. A
/// service defined on the aggregator is realised by plotting a tree across the composed
/// topology, allocating one trunk tunnel per inter-network edge, and delegating one slice of
/// the request to every participating member.
///
/// Cloning yields another handle onto the same aggregator.
#[derive(Clone)]
pub struct Aggregator {
    inner: Arc<AggInner>,
}

impl Aggregator {
    /// Create an aggregator with no persistence.
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self::build(name.into(), None)
    }

    /// Create an aggregator that mirrors its services into the given store and can
    /// [`recover`](Self::recover) them after a restart.
    pub fn with_store<S: Into<String>>(name: S, store: Arc<dyn ServiceStore>) -> Self {
        Self::build(name.into(), Some(store))
    }

    fn build(name: String, store: Option<Arc<dyn ServiceStore>>) -> Self {
        Self {
            inner: Arc::new(AggInner {
                name,
                executor: Executor::new(),
                store,
                state: Mutex::new(AggState {
                    members: HashMap::new(),
                    terminals: HashMap::new(),
                    trunks: HashMap::new(),
                    services: HashMap::new(),
                }),
            }),
        }
    }

    /// Register a member network.
    pub fn add_network(&self, member: Arc<dyn Network>) -> Result<(), NetworkError> {
        let mut state = self.inner.state.lock().unwrap();
        let name = member.name().to_string();
        if state.members.contains_key(&name) {
            return Err(NetworkError::NetworkNameInUse(name));
        }
        state.members.insert(name, member);
        Ok(())
    }

    /// Expose a member network's terminal under the given outer name.
    pub fn add_terminal(&self, name: &str, inner: TerminalId) -> Result<TerminalId, NetworkError> {
        let mut state = self.inner.state.lock().unwrap();
        if state.terminals.contains_key(name) {
            return Err(NetworkError::TerminalNameInUse(name.to_string()));
        }
        let member = state
            .members
            .get(&inner.network)
            .ok_or_else(|| NetworkError::UnknownNetwork(inner.network.clone()))?;
        if member.get_terminal(&inner.name).is_none() {
            return Err(NetworkError::UnknownTerminal(inner));
        }
        state.terminals.insert(name.to_string(), inner);
        Ok(TerminalId::new(self.inner.name.clone(), name))
    }

    /// Withdraw an exposed terminal. Fails while any service definition references it.
    pub fn remove_terminal(&self, name: &str) -> Result<(), NetworkError> {
        let mut state = self.inner.state.lock().unwrap();
        let id = TerminalId::new(self.inner.name.clone(), name);
        if !state.terminals.contains_key(name) {
            return Err(NetworkError::UnknownTerminal(id));
        }
        for service in state.services.values() {
            let in_use = service
                .definition()
                .map(|segment| segment.circuits().any(|c| c.terminal == id))
                .unwrap_or(false);
            if in_use {
                return Err(NetworkError::TerminalInUse(id));
            }
        }
        state.terminals.remove(name);
        Ok(())
    }

    /// Lay a trunk between terminals of two distinct member networks. Label ranges are defined
    /// on the returned [`Trunk`].
    pub fn add_trunk(
        &self,
        start: &TerminalId,
        end: &TerminalId,
        delay: f64,
        bandwidth: f64,
    ) -> Result<Arc<Trunk>, NetworkError> {
        if start.network == end.network {
            return Err(TrunkError::DistinctNetworksRequired.into());
        }
        let mut state = self.inner.state.lock().unwrap();
        for terminal in &[start, end] {
            let member = state
                .members
                .get(&terminal.network)
                .ok_or_else(|| NetworkError::UnknownNetwork(terminal.network.clone()))?;
            if member.get_terminal(&terminal.name).is_none() {
                return Err(NetworkError::UnknownTerminal((*terminal).clone()));
            }
        }
        let edge = Edge::new(start.clone(), end.clone());
        if state.trunks.contains_key(&edge) {
            return Err(TrunkError::TrunkExists.into());
        }
        let trunk = Arc::new(Trunk::new(start.clone(), end.clone(), delay, bandwidth));
        state.trunks.insert(edge, trunk.clone());
        info!("trunk {}--{} laid on {}", start, end, self.inner.name);
        Ok(trunk)
    }

    /// Look up the trunk between two terminals.
    pub fn get_trunk(&self, a: &TerminalId, b: &TerminalId) -> Option<Arc<Trunk>> {
        let state = self.inner.state.lock().unwrap();
        state.trunks.get(&Edge::new(a.clone(), b.clone())).cloned()
    }

    fn create_service(&self, id: ServiceId) -> Result<Arc<dyn Service>, NetworkError> {
        let mut state = self.inner.state.lock().unwrap();
        if state.services.contains_key(&id) {
            return Err(NetworkError::HandleInUse(id));
        }
        let service = AggregateService::new(id, &self.inner);
        state.services.insert(id, service.clone());
        debug!("created aggregate service {} on {}", id, self.inner.name);
        Ok(service)
    }

    /// Rebuild the service map from the configured store.
    ///
    /// Every record is replayed: tunnels are re-adopted on their trunks, subordinate services
    /// are reconciled by handle (adopted when the member still reports them, recreated and
    /// redefined otherwise), and services whose intent was set are driven back towards
    /// `Active`. Afterwards every trunk is told to retain exactly the union of the recovered
    /// labels, discarding any orphans. A record that cannot be replayed yields a service in the
    /// `Failed` state; the remaining records are unaffected.
    pub fn recover(&self) -> Result<(), NetworkError> {
        let store = match self.inner.store() {
            Some(store) => store,
            None => return Ok(()),
        };
        let records = store.load()?;
        let ctx = self.inner.plot_context();
        let mut retained: HashMap<Edge<TerminalId>, HashSet<u32>> = HashMap::new();
        let mut services = Vec::new();
        for record in &records {
            info!("recovering service {} on {}", record.id, self.inner.name);
            services.push(AggregateService::restore(&self.inner, &ctx, record, &mut retained));
        }
        let none = HashSet::new();
        for (edge, trunk) in &ctx.trunks {
            trunk.retain_tunnels(retained.get(edge).unwrap_or(&none));
        }
        let mut state = self.inner.state.lock().unwrap();
        for service in services {
            state.services.insert(service.id(), service);
        }
        Ok(())
    }
}

impl Network for Aggregator {
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
        let ctx = self.inner.plot_context();
        let mut candidates: HashMap<Edge<TerminalId>, f64> = HashMap::new();
        let mut involved: HashSet<String> =
            ctx.terminals.values().map(|t| t.network.clone()).collect();
        for (edge, trunk) in &ctx.trunks {
            if trunk.remaining_bandwidth() >= min_bandwidth && trunk.available_tunnels() >= 1 {
                candidates.insert(edge.clone(), trunk.delay());
                involved.insert(edge.first().network.clone());
                involved.insert(edge.second().network.clone());
            }
        }
        for network in &involved {
            let member = ctx
                .members
                .get(network)
                .ok_or_else(|| NetworkError::UnknownNetwork(network.clone()))?;
            for (edge, delay) in member.get_model(min_bandwidth)? {
                candidates.entry(edge).or_insert(delay);
            }
        }
        let dests: HashSet<TerminalId> = ctx.terminals.values().cloned().collect();
        let fibs = span::route(&dests, &candidates);

        let mut names: Vec<&String> = ctx.terminals.keys().collect();
        names.sort();
        let mut model = HashMap::new();
        for (a, b) in names.iter().tuple_combinations() {
            let inner_a = &ctx.terminals[*a];
            let inner_b = &ctx.terminals[*b];
            if let Some(way) = fibs.get(inner_a).and_then(|fib| fib.get(inner_b)) {
                model.insert(
                    Edge::new(
                        TerminalId::new(self.inner.name.clone(), (**a).clone()),
                        TerminalId::new(self.inner.name.clone(), (**b).clone()),
                    ),
                    way.distance,
                );
            }
        }
        Ok(model)
    }
}
