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

//! Module containing the type definitions of the network model.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Identifier of a service within its network. Doubles as the externally visible handle.
pub type ServiceId = Uuid;

/// Identifier of a listener registration on one service.
pub type ListenerId = usize;

/// A callback receiving the lifecycle events of one service.
///
/// Listeners are invoked on the executor of the network owning the service, one event at a
/// time and in generation order. No internal lock is held during the invocation.
pub type Listener = Arc<dyn Fn(ServiceEvent) + Send + Sync + 'static>;

/// Reference to a terminal: the name of the owning network plus the terminal's local name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TerminalId {
    /// Name of the network owning the terminal.
    pub network: String,
    /// Name of the terminal within its network.
    pub name: String,
}

impl TerminalId {
    /// Create a terminal reference.
    pub fn new<N: Into<String>, T: Into<String>>(network: N, name: T) -> Self {
        Self { network: network.into(), name: name.into() }
    }
}

impl fmt::Display for TerminalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.network, self.name)
    }
}

/// One virtual channel on a terminal, identified by an integer label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Circuit {
    /// The terminal carrying the channel.
    pub terminal: TerminalId,
    /// The label selecting the channel on the terminal.
    pub label: u32,
}

impl Circuit {
    /// Create a circuit reference.
    pub fn new(terminal: TerminalId, label: u32) -> Self {
        Self { terminal, label }
    }
}

impl fmt::Display for Circuit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.terminal, self.label)
    }
}

/// The traffic an endpoint exchanges with a service: the rate it injects and the rate it
/// absorbs. Negative rates are clamped to zero on construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrafficFlow {
    /// Rate entering the service at this endpoint.
    pub ingress: f64,
    /// Rate leaving the service at this endpoint.
    pub egress: f64,
}

impl TrafficFlow {
    /// Create a flow description.
    pub fn new(ingress: f64, egress: f64) -> Self {
        Self { ingress: ingress.max(0.0), egress: egress.max(0.0) }
    }
}

/// The lifecycle state of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceStatus {
    /// Created, no definition yet.
    Dormant,
    /// Defined, waiting for the slices to come up.
    Establishing,
    /// Established but carrying no traffic.
    Inactive,
    /// Activation in progress.
    Activating,
    /// All slices active.
    Active,
    /// Deactivation in progress.
    Deactivating,
    /// A fatal partial failure was observed; see the fault list.
    Failed,
    /// Resources returned; the service is gone from its network's index.
    Released,
}

impl ServiceStatus {
    /// Whether no further lifecycle progress is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Released)
    }
}

/// An event published to service listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceEvent {
    /// All slices are established; the service is ready to activate.
    Ready,
    /// The service failed; the payload is the recorded cause.
    Failed(NetworkError),
    /// The service became fully active.
    Activated,
    /// The service became fully inactive again.
    Deactivated,
    /// The service was released.
    Released,
}

/// Trunk errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrunkError {
    /// A label of the requested range is already mapped.
    #[error("a label of the requested range is already defined on this trunk")]
    LabelsInUse,
    /// A label range of length zero was requested.
    #[error("cannot define an empty label range")]
    EmptyLabelRange,
    /// All defined labels are in use.
    #[error("no tunnels are available on this trunk")]
    NoTunnelsAvailable,
    /// The bandwidth pool cannot cover the requested amount.
    #[error("the trunk has insufficient bandwidth remaining")]
    InsufficientBandwidth,
    /// The label is not defined on this trunk.
    #[error("label {0} is not defined on this trunk")]
    UnknownLabel(u32),
    /// The circuit does not belong to either side of this trunk.
    #[error("circuit {0} is not carried by this trunk")]
    ForeignCircuit(Circuit),
    /// Both trunk endpoints lie in the same member network.
    #[error("trunk endpoints must lie in distinct member networks")]
    DistinctNetworksRequired,
    /// A trunk between the two terminals already exists.
    #[error("a trunk between these terminals already exists")]
    TrunkExists,
}

/// Failure of the external service store.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("storage failure: {0}")]
pub struct StorageError(pub String);

/// Network errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NetworkError {
    /// The referenced terminal is not part of the addressed network.
    #[error("terminal {0} was not found in the network")]
    UnknownTerminal(TerminalId),
    /// A terminal with this name already exists.
    #[error("a terminal named {0} already exists")]
    TerminalNameInUse(String),
    /// The terminal is still referenced by a service or trunk.
    #[error("terminal {0} is still in use")]
    TerminalInUse(TerminalId),
    /// The referenced member network is not known to the aggregator.
    #[error("network {0} is not a member of this aggregator")]
    UnknownNetwork(String),
    /// A member network with this name already exists.
    #[error("a member network named {0} already exists")]
    NetworkNameInUse(String),
    /// A circuit of the segment does not terminate on this network.
    #[error("circuit {0} does not terminate on this network")]
    InvalidTerminal(Circuit),
    /// The same circuit appears twice in a segment.
    #[error("circuit {0} appears more than once in the segment")]
    DuplicateCircuit(Circuit),
    /// A segment without endpoints was submitted.
    #[error("the segment has no endpoints")]
    EmptySegment,
    /// No spanning tree satisfies the demand, or trunk resources are exhausted.
    #[error("insufficient resources: {0}")]
    InsufficientResources(String),
    /// A member network reported failure for its slice.
    #[error("subordinate service {id} on {network} failed: {cause}")]
    SubordinateFailed {
        /// The member network owning the failed slice.
        network: String,
        /// The id of the failed subordinate service.
        id: ServiceId,
        /// Rendering of the subordinate's recorded cause.
        cause: String,
    },
    /// The requested service handle is already taken.
    #[error("service handle {0} is already in use")]
    HandleInUse(ServiceId),
    /// No service with this id exists.
    #[error("service {0} was not found")]
    UnknownService(ServiceId),
    /// The operation is not available on a released service.
    #[error("the service has been released")]
    ReleasedService,
    /// The operation requires the service to be defined first.
    #[error("the service has no definition yet")]
    DormantService,
    /// The operation conflicts with the current lifecycle state.
    #[error("the service is in use")]
    InUseService,
    /// Trunk error.
    #[error("trunk error: {0}")]
    Trunk(#[from] TrunkError),
    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}
