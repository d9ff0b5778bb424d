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

//! # The network model
//!
//! Every switching fabric, whether a physical switch wrapper, the in-memory
//! [`TransientNetwork`], or an [`Aggregator`](crate::aggregate::Aggregator) composed of other
//! networks, exposes the same two contracts: [`Network`] for management and topology queries,
//! and [`Service`] for the lifecycle of one connection request.
//!
//! The building blocks live here as well: [terminals](TerminalId) and [circuits](Circuit),
//! [segments](Segment) describing a request, and [trunks](Trunk) linking the terminals of two
//! member networks.

pub(crate) mod exec;
mod segment;
mod transient;
mod trunk;
mod types;

pub use segment::Segment;
pub use transient::TransientNetwork;
pub use trunk::{Trunk, Tunnel};
pub use types::{
    Circuit, Listener, ListenerId, NetworkError, ServiceEvent, ServiceId, ServiceStatus,
    StorageError, TerminalId, TrafficFlow, TrunkError,
};

use crate::span::Edge;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// The contract every fabric implements.
///
/// A network owns a set of named terminals and a set of services. Its internal topology is
/// opaque; a superior aggregator sees it only through [`get_model`](Self::get_model).
pub trait Network: Send + Sync {
    /// The name of this network.
    fn name(&self) -> &str;

    /// Look up a terminal by its local name.
    fn get_terminal(&self, name: &str) -> Option<TerminalId>;

    /// All terminals of this network.
    fn terminals(&self) -> Vec<TerminalId>;

    /// Create a dormant service under a fresh id.
    fn new_service(&self) -> Result<Arc<dyn Service>, NetworkError>;

    /// Create a dormant service under the given handle. Fails with
    /// [`NetworkError::HandleInUse`] when the handle is taken.
    fn new_service_with_handle(&self, handle: ServiceId) -> Result<Arc<dyn Service>, NetworkError>;

    /// Look up a service by id.
    fn get_service(&self, id: ServiceId) -> Option<Arc<dyn Service>>;

    /// The ids of all services currently indexed.
    fn services(&self) -> Vec<ServiceId>;

    /// A weighted mesh over this network's terminals: an edge for every unordered pair that is
    /// mutually reachable over internal links of capacity at least `min_bandwidth`, weighted by
    /// the best attainable delay.
    fn get_model(
        &self,
        min_bandwidth: f64,
    ) -> Result<HashMap<Edge<TerminalId>, f64>, NetworkError>;
}

/// One observable lifecycle over one realised (or attempted) segment.
///
/// Apart from [`await_status`](Self::await_status), no method blocks: progress towards
/// [`ServiceStatus::Active`] happens asynchronously and is published through listeners.
pub trait Service: Send + Sync {
    /// The id of this service within its network.
    fn id(&self) -> ServiceId;

    /// Submit a definition. Replaces any prior definition and clears the fault list.
    fn define(&self, segment: Segment) -> Result<(), NetworkError>;

    /// The current definition, if any.
    fn definition(&self) -> Option<Segment>;

    /// Request activation. Setting an intent that is already set is a no-op.
    fn activate(&self) -> Result<(), NetworkError>;

    /// Request deactivation. Clearing an intent that is already clear is a no-op.
    fn deactivate(&self) -> Result<(), NetworkError>;

    /// The current lifecycle state.
    fn status(&self) -> ServiceStatus;

    /// Release the service: return all resources and remove it from the network's index.
    /// Idempotent; at most one `Released` event is ever emitted.
    fn release(&self) -> Result<(), NetworkError>;

    /// The asynchronous failures recorded since the last definition.
    fn faults(&self) -> Vec<NetworkError>;

    /// Register a listener for lifecycle events.
    fn add_listener(&self, listener: Listener) -> ListenerId;

    /// Remove a listener registration.
    fn remove_listener(&self, id: ListenerId);

    /// Block until the status is one of `statuses` or the timeout expires, and return the
    /// status observed last. A `Failed` state satisfies the wait only when the set names it.
    fn await_status(&self, statuses: &HashSet<ServiceStatus>, timeout: Duration) -> ServiceStatus;
}
