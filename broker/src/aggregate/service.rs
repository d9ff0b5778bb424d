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

//! The aggregator's service state machine.
//!
//! An aggregate service wraps one subordinate service per member network participating in the
//! plotted tree, plus the trunk tunnels stitching the slices together. Subordinate lifecycle
//! events are relayed into three counters (`unresponded`, `errored`, `active_inferiors`) whose
//! zero crossings drive the aggregate's own transitions. One lock guards the whole service
//! state; no subordinate or store call is ever made while it is held.

use crate::aggregate::AggInner;
use crate::aggregate::plot::{plot_tree, PlotContext, TunnelAllocation};
use crate::aggregate::store::{ServiceRecord, SubordinateRecord, TunnelRecord};
use crate::net::{
    Circuit, Listener, ListenerId, Network, NetworkError, Segment, Service, ServiceEvent,
    ServiceId, ServiceStatus, TerminalId, Tunnel,
};
use crate::span::Edge;
use log::*;
use std::collections::{HashMap, HashSet};
use std::mem;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::{Duration, Instant};

/// One slice of an aggregate service, held by a member network.
struct Subordinate {
    network: String,
    service: Arc<dyn Service>,
    segment: Segment,
}

struct AggSvcState {
    status: ServiceStatus,
    intent: bool,
    definition: Option<Segment>,
    faults: Vec<NetworkError>,
    listeners: HashMap<ListenerId, Listener>,
    next_listener: ListenerId,
    subordinates: Vec<Subordinate>,
    tunnels: Vec<TunnelAllocation>,
    unresponded: usize,
    errored: usize,
    active_inferiors: usize,
}

/// External calls computed under the service lock and performed after it is dropped.
enum Followup {
    None,
    Activate(Vec<(String, ServiceId, Arc<dyn Service>)>),
    Deactivate(Vec<(String, ServiceId, Arc<dyn Service>)>),
    Cleanup {
        survivors: Vec<Arc<dyn Service>>,
        tunnels: Vec<TunnelAllocation>,
    },
}

/// A service on an [`Aggregator`](crate::aggregate::Aggregator).
pub(crate) struct AggregateService {
    id: ServiceId,
    owner: Weak<AggInner>,
    state: Mutex<AggSvcState>,
    cond: Condvar,
    me: Weak<AggregateService>,
}

impl AggregateService {
    pub(crate) fn new(id: ServiceId, owner: &Arc<AggInner>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            id,
            owner: Arc::downgrade(owner),
            state: Mutex::new(AggSvcState {
                status: ServiceStatus::Dormant,
                intent: false,
                definition: None,
                faults: Vec::new(),
                listeners: HashMap::new(),
                next_listener: 0,
                subordinates: Vec::new(),
                tunnels: Vec::new(),
                unresponded: 0,
                errored: 0,
                active_inferiors: 0,
            }),
            cond: Condvar::new(),
            me: me.clone(),
        })
    }

    fn owner(&self) -> Result<Arc<AggInner>, NetworkError> {
        self.owner
            .upgrade()
            .ok_or_else(|| NetworkError::UnknownNetwork("aggregator is gone".to_string()))
    }

    /// Hand the event to every listener on the aggregator's executor, preserving order.
    fn emit(&self, state: &AggSvcState, event: ServiceEvent) {
        let mut listeners: Vec<(ListenerId, Listener)> =
            state.listeners.iter().map(|(id, l)| (*id, l.clone())).collect();
        listeners.sort_by_key(|(id, _)| *id);
        if let Some(owner) = self.owner.upgrade() {
            owner.executor().submit(move || {
                for (_, listener) in listeners {
                    listener(event.clone());
                }
            });
        }
    }

    /// The listener attached to a subordinate, feeding its events back into the counters.
    fn relay(&self, network: String, subordinate: ServiceId) -> Listener {
        let me = self.me.clone();
        Arc::new(move |event| {
            if let Some(me) = me.upgrade() {
                me.subordinate_event(&network, subordinate, event);
            }
        })
    }

    fn peers(state: &AggSvcState) -> Vec<(String, ServiceId, Arc<dyn Service>)> {
        state
            .subordinates
            .iter()
            .map(|s| (s.network.clone(), s.service.id(), s.service.clone()))
            .collect()
    }

    /// Update the counters for one subordinate event and perform whatever external calls the
    /// resulting transition demands.
    fn subordinate_event(&self, network: &str, subordinate: ServiceId, event: ServiceEvent) {
        trace!(
            "aggregate {} observes {:?} from {} on {}",
            self.id,
            event,
            subordinate,
            network
        );
        let followup = {
            let mut state = self.state.lock().unwrap();
            if state.status == ServiceStatus::Released {
                return;
            }
            match event {
                ServiceEvent::Ready => {
                    if state.unresponded > 0 {
                        state.unresponded -= 1;
                    }
                    if state.unresponded == 0
                        && state.errored == 0
                        && state.status == ServiceStatus::Establishing
                    {
                        state.status = ServiceStatus::Inactive;
                        self.emit(&state, ServiceEvent::Ready);
                        self.cond.notify_all();
                        if state.intent {
                            state.status = ServiceStatus::Activating;
                            Followup::Activate(Self::peers(&state))
                        } else {
                            Followup::None
                        }
                    } else {
                        Followup::None
                    }
                }
                ServiceEvent::Failed(cause) => {
                    self.record_subordinate_failure(&mut state, network, subordinate, cause)
                }
                ServiceEvent::Released => {
                    // a slice this service did not release is a lost slice
                    self.record_subordinate_failure(
                        &mut state,
                        network,
                        subordinate,
                        NetworkError::ReleasedService,
                    )
                }
                ServiceEvent::Activated => {
                    state.active_inferiors += 1;
                    if state.status == ServiceStatus::Activating
                        && state.active_inferiors == state.subordinates.len()
                    {
                        state.status = ServiceStatus::Active;
                        self.emit(&state, ServiceEvent::Activated);
                        self.cond.notify_all();
                        if !state.intent {
                            state.status = ServiceStatus::Deactivating;
                            Followup::Deactivate(Self::peers(&state))
                        } else {
                            Followup::None
                        }
                    } else {
                        Followup::None
                    }
                }
                ServiceEvent::Deactivated => {
                    if state.active_inferiors > 0 {
                        state.active_inferiors -= 1;
                    }
                    if state.status == ServiceStatus::Deactivating && state.active_inferiors == 0
                    {
                        state.status = ServiceStatus::Inactive;
                        self.emit(&state, ServiceEvent::Deactivated);
                        self.cond.notify_all();
                        if state.intent {
                            state.status = ServiceStatus::Activating;
                            Followup::Activate(Self::peers(&state))
                        } else {
                            Followup::None
                        }
                    } else {
                        Followup::None
                    }
                }
            }
        };
        self.run_followup(followup);
    }

    /// First subordinate failure fails the aggregate and tears the rest down; later ones only
    /// bump the counter.
    fn record_subordinate_failure(
        &self,
        state: &mut AggSvcState,
        network: &str,
        subordinate: ServiceId,
        cause: NetworkError,
    ) -> Followup {
        state.errored += 1;
        if state.errored > 1 || state.status == ServiceStatus::Failed {
            return Followup::None;
        }
        let fault = NetworkError::SubordinateFailed {
            network: network.to_string(),
            id: subordinate,
            cause: cause.to_string(),
        };
        warn!("aggregate {} failed: {}", self.id, fault);
        state.faults.push(fault.clone());
        state.status = ServiceStatus::Failed;
        self.emit(state, ServiceEvent::Failed(fault));
        self.cond.notify_all();
        let survivors = state
            .subordinates
            .iter()
            .filter(|s| s.service.id() != subordinate)
            .map(|s| s.service.clone())
            .collect();
        Followup::Cleanup { survivors, tunnels: mem::take(&mut state.tunnels) }
    }

    fn run_followup(&self, followup: Followup) {
        match followup {
            Followup::None => {}
            Followup::Activate(peers) => {
                for (network, id, service) in peers {
                    if let Err(cause) = service.activate() {
                        self.subordinate_event(&network, id, ServiceEvent::Failed(cause));
                    }
                }
            }
            Followup::Deactivate(peers) => {
                for (network, id, service) in peers {
                    if let Err(cause) = service.deactivate() {
                        self.subordinate_event(&network, id, ServiceEvent::Failed(cause));
                    }
                }
            }
            Followup::Cleanup { survivors, tunnels } => {
                for service in survivors {
                    let _ = service.release();
                }
                release_tunnels(&tunnels);
            }
        }
    }

    /// Record a local failure of the whole service (plotting, fan-out, storage).
    fn fail(&self, cause: NetworkError) {
        let mut state = self.state.lock().unwrap();
        if state.status == ServiceStatus::Released || state.status == ServiceStatus::Failed {
            return;
        }
        warn!("aggregate {} failed: {}", self.id, cause);
        state.faults.push(cause.clone());
        state.status = ServiceStatus::Failed;
        self.emit(&state, ServiceEvent::Failed(cause));
        self.cond.notify_all();
    }

    /// Build the persistent record of the current definition.
    fn record(&self) -> ServiceRecord {
        let state = self.state.lock().unwrap();
        ServiceRecord {
            id: self.id,
            intent: state.intent,
            segment: state.definition.clone().unwrap_or_else(|| Segment::new(Vec::new())),
            tunnels: state
                .tunnels
                .iter()
                .map(|a| TunnelRecord {
                    start_terminal: a.trunk.start().clone(),
                    end_terminal: a.trunk.end().clone(),
                    label: a.tunnel.start.label,
                    bandwidth: a.bandwidth,
                })
                .collect(),
            subordinates: state
                .subordinates
                .iter()
                .map(|s| SubordinateRecord {
                    network: s.network.clone(),
                    handle: s.service.id(),
                    segment: s.segment.clone(),
                })
                .collect(),
        }
    }

    /// Rebuild a service from its persisted record: adopt its tunnels, reconcile its
    /// subordinates by handle, and note the adopted labels in `retained`.
    pub(crate) fn restore(
        owner: &Arc<AggInner>,
        ctx: &PlotContext,
        record: &ServiceRecord,
        retained: &mut HashMap<Edge<TerminalId>, HashSet<u32>>,
    ) -> Arc<Self> {
        let service = Self::new(record.id, owner);
        {
            let mut state = service.state.lock().unwrap();
            state.definition = Some(record.segment.clone());
            state.intent = record.intent;
            state.status = ServiceStatus::Inactive;
        }

        let mut failure: Option<NetworkError> = None;
        let mut allocations: Vec<TunnelAllocation> = Vec::new();
        for tunnel in &record.tunnels {
            let edge = Edge::new(tunnel.start_terminal.clone(), tunnel.end_terminal.clone());
            let trunk = match ctx.trunks.get(&edge) {
                Some(trunk) => trunk,
                None => {
                    failure = Some(NetworkError::InsufficientResources(format!(
                        "trunk {}--{} is no longer configured",
                        tunnel.start_terminal, tunnel.end_terminal
                    )));
                    break;
                }
            };
            let adoption = trunk.adopt_tunnel(tunnel.label, tunnel.bandwidth).and_then(|()| {
                let start = Circuit::new(trunk.start().clone(), tunnel.label);
                trunk.peer(&start).map(|end| (start, end))
            });
            match adoption {
                Ok((start, end)) => {
                    retained.entry(edge).or_insert_with(HashSet::new).insert(tunnel.label);
                    allocations.push(TunnelAllocation {
                        trunk: trunk.clone(),
                        tunnel: Tunnel { start, end },
                        bandwidth: tunnel.bandwidth,
                    });
                }
                Err(cause) => {
                    failure = Some(cause.into());
                    break;
                }
            }
        }

        let mut subordinates: Vec<Subordinate> = Vec::new();
        let mut pending: Vec<usize> = Vec::new();
        if failure.is_none() {
            for sub in &record.subordinates {
                let member = match ctx.members.get(&sub.network) {
                    Some(member) => member,
                    None => {
                        failure = Some(NetworkError::UnknownNetwork(sub.network.clone()));
                        break;
                    }
                };
                match member.get_service(sub.handle) {
                    Some(existing) => {
                        debug!("adopting subordinate {} on {}", sub.handle, sub.network);
                        subordinates.push(Subordinate {
                            network: sub.network.clone(),
                            service: existing,
                            segment: sub.segment.clone(),
                        });
                    }
                    None => match member.new_service_with_handle(sub.handle) {
                        Ok(fresh) => {
                            debug!("recreating subordinate {} on {}", sub.handle, sub.network);
                            pending.push(subordinates.len());
                            subordinates.push(Subordinate {
                                network: sub.network.clone(),
                                service: fresh,
                                segment: sub.segment.clone(),
                            });
                        }
                        Err(cause) => {
                            failure = Some(cause);
                            break;
                        }
                    },
                }
            }
        }

        if let Some(cause) = failure {
            {
                let mut state = service.state.lock().unwrap();
                // keep whatever was adopted so a later release can still return it
                state.tunnels = allocations;
                state.subordinates = subordinates;
                state.faults.push(cause.clone());
                state.status = ServiceStatus::Failed;
            }
            service.cond.notify_all();
            return service;
        }

        let active = subordinates
            .iter()
            .filter(|s| s.service.status() == ServiceStatus::Active)
            .count();
        let defines: Vec<(String, ServiceId, Arc<dyn Service>, Segment)> = pending
            .iter()
            .map(|i| {
                let s = &subordinates[*i];
                (s.network.clone(), s.service.id(), s.service.clone(), s.segment.clone())
            })
            .collect();
        let relays = subordinates
            .iter()
            .map(|s| (s.network.clone(), s.service.id(), s.service.clone()))
            .collect::<Vec<_>>();
        {
            let mut state = service.state.lock().unwrap();
            state.tunnels = allocations;
            state.subordinates = subordinates;
            state.active_inferiors = active;
            state.unresponded = defines.len();
            state.status = if defines.is_empty() {
                ServiceStatus::Inactive
            } else {
                ServiceStatus::Establishing
            };
        }
        for (network, id, sub) in &relays {
            sub.add_listener(service.relay(network.clone(), *id));
        }
        for (network, id, sub, segment) in defines {
            if let Err(cause) = sub.define(segment) {
                service.subordinate_event(&network, id, ServiceEvent::Failed(cause));
            }
        }
        service.kick();
        service
    }

    /// Start activation if the intent is set and the service is sitting established.
    fn kick(&self) {
        let followup = {
            let mut state = self.state.lock().unwrap();
            if !state.intent || state.status != ServiceStatus::Inactive {
                Followup::None
            } else if state.active_inferiors == state.subordinates.len() {
                state.status = ServiceStatus::Active;
                self.cond.notify_all();
                Followup::None
            } else {
                state.status = ServiceStatus::Activating;
                self.cond.notify_all();
                Followup::Activate(Self::peers(&state))
            }
        };
        self.run_followup(followup);
    }
}

fn release_tunnels(tunnels: &[TunnelAllocation]) {
    for allocation in tunnels {
        let _ = allocation.trunk.release_tunnel(allocation.tunnel.start.label);
        allocation.trunk.release_bandwidth(allocation.bandwidth);
    }
}

fn release_subordinates(subordinates: &[Subordinate]) {
    for subordinate in subordinates {
        let _ = subordinate.service.release();
    }
}

impl Service for AggregateService {
    fn id(&self) -> ServiceId {
        self.id
    }

    fn define(&self, segment: Segment) -> Result<(), NetworkError> {
        segment.validate()?;
        let owner = self.owner()?;
        let ctx = owner.plot_context();
        for circuit in segment.circuits() {
            if circuit.terminal.network != ctx.aggregator
                || !ctx.terminals.contains_key(&circuit.terminal.name)
            {
                return Err(NetworkError::InvalidTerminal(circuit.clone()));
            }
        }

        // gate on the lifecycle state and drop any previous realisation
        let (old_subordinates, old_tunnels) = {
            let mut state = self.state.lock().unwrap();
            match state.status {
                ServiceStatus::Released => return Err(NetworkError::ReleasedService),
                ServiceStatus::Dormant | ServiceStatus::Inactive | ServiceStatus::Failed => {}
                _ => return Err(NetworkError::InUseService),
            }
            state.status = ServiceStatus::Establishing;
            state.definition = Some(segment.clone());
            state.faults.clear();
            state.unresponded = 0;
            state.errored = 0;
            state.active_inferiors = 0;
            (mem::take(&mut state.subordinates), mem::take(&mut state.tunnels))
        };
        release_subordinates(&old_subordinates);
        release_tunnels(&old_tunnels);

        // plot; a failed plot is an asynchronous fault, not a define error
        let plot = match plot_tree(&ctx, &segment) {
            Ok(plot) => plot,
            Err(cause) => {
                self.fail(cause);
                return Ok(());
            }
        };

        // create one subordinate per member slice
        let mut subordinates: Vec<Subordinate> = Vec::new();
        let mut failure: Option<NetworkError> = None;
        for (network, circuits) in plot.groups {
            let member = match ctx.members.get(&network) {
                Some(member) => member.clone(),
                None => {
                    failure = Some(NetworkError::UnknownNetwork(network));
                    break;
                }
            };
            let mut slice = Segment::new(circuits);
            if let Some(cap) = segment.bandwidth_cap() {
                slice = slice.with_bandwidth_cap(cap);
            }
            if let Some(rate) = segment.max_error_rate() {
                slice = slice.with_max_error_rate(rate);
            }
            match member.new_service() {
                Ok(service) => {
                    subordinates.push(Subordinate { network, service, segment: slice })
                }
                Err(cause) => {
                    failure = Some(cause);
                    break;
                }
            }
        }
        if let Some(cause) = failure {
            release_subordinates(&subordinates);
            release_tunnels(&plot.tunnels);
            self.fail(cause);
            return Ok(());
        }

        // commit the realisation; a racing release means everything goes straight back
        let defines: Vec<(String, ServiceId, Arc<dyn Service>, Segment)> = subordinates
            .iter()
            .map(|s| (s.network.clone(), s.service.id(), s.service.clone(), s.segment.clone()))
            .collect();
        {
            let mut state = self.state.lock().unwrap();
            if state.status != ServiceStatus::Establishing {
                drop(state);
                release_subordinates(&subordinates);
                release_tunnels(&plot.tunnels);
                return Ok(());
            }
            state.unresponded = subordinates.len();
            state.subordinates = subordinates;
            state.tunnels = plot.tunnels;
        }

        if let Some(store) = owner.store() {
            let record = self.record();
            if let Err(cause) = store.insert(&record) {
                let (subordinates, tunnels) = {
                    let mut state = self.state.lock().unwrap();
                    (mem::take(&mut state.subordinates), mem::take(&mut state.tunnels))
                };
                release_subordinates(&subordinates);
                release_tunnels(&tunnels);
                self.fail(cause.clone().into());
                return Err(cause.into());
            }
        }

        // attach the relays, then let the slices establish
        for (network, id, sub, slice) in defines {
            sub.add_listener(self.relay(network.clone(), id));
            if let Err(cause) = sub.define(slice) {
                self.subordinate_event(&network, id, ServiceEvent::Failed(cause));
            }
        }
        Ok(())
    }

    fn definition(&self) -> Option<Segment> {
        self.state.lock().unwrap().definition.clone()
    }

    fn activate(&self) -> Result<(), NetworkError> {
        let followup = {
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
                self.cond.notify_all();
                Followup::Activate(Self::peers(&state))
            } else {
                Followup::None
            }
        };
        self.run_followup(followup);
        if let Ok(owner) = self.owner() {
            if let Some(store) = owner.store() {
                store.set_intent(self.id, true)?;
            }
        }
        Ok(())
    }

    fn deactivate(&self) -> Result<(), NetworkError> {
        let followup = {
            let mut state = self.state.lock().unwrap();
            match state.status {
                ServiceStatus::Released => return Err(NetworkError::ReleasedService),
                ServiceStatus::Dormant => return Err(NetworkError::DormantService),
                _ => {}
            }
            if !state.intent {
                return Ok(());
            }
            state.intent = false;
            if state.status == ServiceStatus::Active {
                state.status = ServiceStatus::Deactivating;
                self.cond.notify_all();
                Followup::Deactivate(Self::peers(&state))
            } else {
                Followup::None
            }
        };
        self.run_followup(followup);
        if let Ok(owner) = self.owner() {
            if let Some(store) = owner.store() {
                store.set_intent(self.id, false)?;
            }
        }
        Ok(())
    }

    fn status(&self) -> ServiceStatus {
        self.state.lock().unwrap().status
    }

    fn release(&self) -> Result<(), NetworkError> {
        let (subordinates, tunnels) = {
            let mut state = self.state.lock().unwrap();
            if state.status == ServiceStatus::Released {
                return Ok(());
            }
            state.status = ServiceStatus::Released;
            state.intent = false;
            state.definition = None;
            self.emit(&state, ServiceEvent::Released);
            self.cond.notify_all();
            (mem::take(&mut state.subordinates), mem::take(&mut state.tunnels))
        };
        info!(
            "releasing aggregate {}: {} slices, {} tunnels",
            self.id,
            subordinates.len(),
            tunnels.len()
        );
        release_subordinates(&subordinates);
        release_tunnels(&tunnels);
        if let Ok(owner) = self.owner() {
            owner.remove_service(self.id);
            if let Some(store) = owner.store() {
                store.remove(self.id)?;
            }
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
