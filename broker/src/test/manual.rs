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

//! A hand-driven fabric for exercising the aggregator's fan-out.
//!
//! Services on a [`ManualNetwork`] make no progress on their own: the test decides when a
//! slice reports ready, activates, or fails, and events are delivered synchronously on the
//! calling thread. This makes the aggregate state machine fully deterministic under test.

use crate::net::{
    Listener, ListenerId, Network, NetworkError, Segment, Service, ServiceEvent, ServiceId,
    ServiceStatus, TerminalId,
};
use crate::span::Edge;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::{Duration, Instant};
use uuid::Uuid;

pub struct ManualInner {
    name: String,
    terminals: Mutex<HashSet<String>>,
    services: Mutex<Vec<Arc<ManualService>>>,
}

/// A fabric whose services only move when the test pushes them.
#[derive(Clone)]
pub struct ManualNetwork {
    inner: Arc<ManualInner>,
}

impl ManualNetwork {
    pub fn new(name: &str, terminals: &[&str]) -> Self {
        Self {
            inner: Arc::new(ManualInner {
                name: name.to_string(),
                terminals: Mutex::new(terminals.iter().map(|t| t.to_string()).collect()),
                services: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The single subordinate the aggregator created on this member.
    pub fn only_service(&self) -> Arc<ManualService> {
        let services = self.inner.services.lock().unwrap();
        assert_eq!(services.len(), 1, "expected exactly one service on {}", self.inner.name);
        services[0].clone()
    }

    pub fn service_count(&self) -> usize {
        self.inner.services.lock().unwrap().len()
    }
}

impl Network for ManualNetwork {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn get_terminal(&self, name: &str) -> Option<TerminalId> {
        if self.inner.terminals.lock().unwrap().contains(name) {
            Some(TerminalId::new(self.inner.name.clone(), name))
        } else {
            None
        }
    }

    fn terminals(&self) -> Vec<TerminalId> {
        self.inner
            .terminals
            .lock()
            .unwrap()
            .iter()
            .map(|name| TerminalId::new(self.inner.name.clone(), name.clone()))
            .collect()
    }

    fn new_service(&self) -> Result<Arc<dyn Service>, NetworkError> {
        let service = Arc::new(ManualService {
            id: Uuid::new_v4(),
            network: Arc::downgrade(&self.inner),
            state: Mutex::new(ManualState {
                status: ServiceStatus::Dormant,
                definition: None,
                faults: Vec::new(),
                listeners: HashMap::new(),
                next_listener: 0,
                releases: 0,
            }),
            cond: Condvar::new(),
        });
        self.inner.services.lock().unwrap().push(service.clone());
        Ok(service)
    }

    fn new_service_with_handle(&self, handle: ServiceId) -> Result<Arc<dyn Service>, NetworkError> {
        let service = self.new_service()?;
        let _ = handle;
        Ok(service)
    }

    fn get_service(&self, id: ServiceId) -> Option<Arc<dyn Service>> {
        self.inner
            .services
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.clone() as Arc<dyn Service>)
    }

    fn services(&self) -> Vec<ServiceId> {
        self.inner.services.lock().unwrap().iter().map(|s| s.id).collect()
    }

    /// Every pair of terminals is reachable at unit delay, whatever the bandwidth.
    fn get_model(
        &self,
        _min_bandwidth: f64,
    ) -> Result<HashMap<Edge<TerminalId>, f64>, NetworkError> {
        let mut names: Vec<String> =
            self.inner.terminals.lock().unwrap().iter().cloned().collect();
        names.sort();
        let mut model = HashMap::new();
        for (position, a) in names.iter().enumerate() {
            for b in names.iter().skip(position + 1) {
                model.insert(
                    Edge::new(
                        TerminalId::new(self.inner.name.clone(), a.clone()),
                        TerminalId::new(self.inner.name.clone(), b.clone()),
                    ),
                    1.0,
                );
            }
        }
        Ok(model)
    }
}

struct ManualState {
    status: ServiceStatus,
    definition: Option<Segment>,
    faults: Vec<NetworkError>,
    listeners: HashMap<ListenerId, Listener>,
    next_listener: ListenerId,
    releases: usize,
}

pub struct ManualService {
    id: ServiceId,
    network: Weak<ManualInner>,
    state: Mutex<ManualState>,
    cond: Condvar,
}

impl ManualService {
    fn emit(&self, event: ServiceEvent) {
        let listeners: Vec<Listener> = {
            let state = self.state.lock().unwrap();
            let mut entries: Vec<(ListenerId, Listener)> =
                state.listeners.iter().map(|(id, l)| (*id, l.clone())).collect();
            entries.sort_by_key(|(id, _)| *id);
            entries.into_iter().map(|(_, l)| l).collect()
        };
        for listener in listeners {
            listener(event.clone());
        }
    }

    /// Report the slice established.
    pub fn drive_ready(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.status = ServiceStatus::Inactive;
            self.cond.notify_all();
        }
        self.emit(ServiceEvent::Ready);
    }

    /// Report the slice active.
    pub fn drive_activated(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.status = ServiceStatus::Active;
            self.cond.notify_all();
        }
        self.emit(ServiceEvent::Activated);
    }

    /// Report the slice inactive again.
    pub fn drive_deactivated(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.status = ServiceStatus::Inactive;
            self.cond.notify_all();
        }
        self.emit(ServiceEvent::Deactivated);
    }

    /// Report the slice broken.
    pub fn drive_failed(&self) {
        let fault = NetworkError::InsufficientResources("injected failure".to_string());
        {
            let mut state = self.state.lock().unwrap();
            state.status = ServiceStatus::Failed;
            state.faults.push(fault.clone());
            self.cond.notify_all();
        }
        self.emit(ServiceEvent::Failed(fault));
    }

    /// How many times `release` has been called.
    pub fn releases(&self) -> usize {
        self.state.lock().unwrap().releases
    }
}

impl Service for ManualService {
    fn id(&self) -> ServiceId {
        self.id
    }

    fn define(&self, segment: Segment) -> Result<(), NetworkError> {
        segment.validate()?;
        let mut state = self.state.lock().unwrap();
        if state.status == ServiceStatus::Released {
            return Err(NetworkError::ReleasedService);
        }
        state.definition = Some(segment);
        state.faults.clear();
        state.status = ServiceStatus::Establishing;
        self.cond.notify_all();
        Ok(())
    }

    fn definition(&self) -> Option<Segment> {
        self.state.lock().unwrap().definition.clone()
    }

    fn activate(&self) -> Result<(), NetworkError> {
        let state = self.state.lock().unwrap();
        match state.status {
            ServiceStatus::Released => Err(NetworkError::ReleasedService),
            ServiceStatus::Dormant => Err(NetworkError::DormantService),
            _ => Ok(()),
        }
    }

    fn deactivate(&self) -> Result<(), NetworkError> {
        let state = self.state.lock().unwrap();
        match state.status {
            ServiceStatus::Released => Err(NetworkError::ReleasedService),
            ServiceStatus::Dormant => Err(NetworkError::DormantService),
            _ => Ok(()),
        }
    }

    fn status(&self) -> ServiceStatus {
        self.state.lock().unwrap().status
    }

    fn release(&self) -> Result<(), NetworkError> {
        let already = {
            let mut state = self.state.lock().unwrap();
            state.releases += 1;
            let already = state.status == ServiceStatus::Released;
            state.status = ServiceStatus::Released;
            state.definition = None;
            self.cond.notify_all();
            already
        };
        if !already {
            self.emit(ServiceEvent::Released);
            if let Some(network) = self.network.upgrade() {
                network.services.lock().unwrap().retain(|s| s.id != self.id);
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
