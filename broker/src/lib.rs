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

#![deny(missing_docs)]

//! # Data-Plane Broker
//!
//! This is a library for composing layer-2 virtual circuits across a hierarchy of switching
//! fabrics. A client asks a broker to connect a set of circuits (terminal plus label) with
//! associated bandwidth demands; the broker selects a spanning subgraph across the available
//! topology, allocates tunnels on inter-network trunks, and instructs its member networks to
//! realise the per-network slices. Services are long-lived, observable through listener
//! events, and can be independently activated, deactivated, released, and recovered after a
//! restart.
//!
//! ## Structure
//!
//! - **[`span`]**: the graph primitives used to plot trees: unordered edges, forwarding tables
//!   by distance-vector relaxation, spur pruning, terminal-aware reweighting, and spanning-tree
//!   growth with a pluggable admissibility predicate.
//!
//! - **[`bandwidth`]**: bandwidth functions mapping an endpoint subset to the
//!   [`BandwidthRange`](bandwidth::BandwidthRange) a tree edge must carry, with reduction over
//!   endpoint groups for hierarchical delegation, tabulation for small degrees, and a tagged
//!   serialisable form.
//!
//! - **[`net`]**: the network model: terminals, circuits, segments, trunks with label-mapped
//!   tunnels and bandwidth pools, the [`Network`](net::Network) and [`Service`](net::Service)
//!   contracts every fabric implements, and the in-memory
//!   [`TransientNetwork`](net::TransientNetwork).
//!
//! - **[`aggregate`]**: the aggregator service engine: a virtual network whose topology is the
//!   union of its trunks and its member models, which plots trees, allocates tunnels, fans
//!   requests out as subordinate services, and tracks an observable lifecycle with
//!   partial-failure handling and post-restart recovery.
//!
//! ## Example
//!
//! Two islands joined by one trunk, and a service connecting a circuit on each:
//!
//! ```
//! use dataplane_broker::aggregate::Aggregator;
//! use dataplane_broker::net::{
//!     Circuit, Network, Segment, Service, ServiceStatus, TrafficFlow, TransientNetwork,
//! };
//! use std::collections::HashSet;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! fn main() -> Result<(), dataplane_broker::Error> {
//!     let a = TransientNetwork::new("a");
//!     a.add_terminal("client")?;
//!     a.add_terminal("uplink")?;
//!     a.add_link("client", "uplink", 1.0, 1000.0)?;
//!     let b = TransientNetwork::new("b");
//!     b.add_terminal("client")?;
//!     b.add_terminal("uplink")?;
//!     b.add_link("client", "uplink", 1.0, 1000.0)?;
//!
//!     let broker = Aggregator::new("broker");
//!     broker.add_network(Arc::new(a.clone()))?;
//!     broker.add_network(Arc::new(b.clone()))?;
//!     let left = broker.add_terminal("left", a.get_terminal("client").unwrap())?;
//!     let right = broker.add_terminal("right", b.get_terminal("client").unwrap())?;
//!     let trunk = broker.add_trunk(
//!         &a.get_terminal("uplink").unwrap(),
//!         &b.get_terminal("uplink").unwrap(),
//!         1.0,
//!         100.0,
//!     )?;
//!     trunk.define_label_range(1, 10, 1)?;
//!
//!     let service = broker.new_service()?;
//!     service.define(Segment::new(vec![
//!         (Circuit::new(left, 7), TrafficFlow::new(10.0, 10.0)),
//!         (Circuit::new(right, 7), TrafficFlow::new(10.0, 10.0)),
//!     ]))?;
//!     service.activate()?;
//!
//!     let mut active = HashSet::new();
//!     active.insert(ServiceStatus::Active);
//!     assert_eq!(
//!         service.await_status(&active, Duration::from_secs(5)),
//!         ServiceStatus::Active
//!     );
//!     assert_eq!(trunk.available_tunnels(), 9);
//!
//!     service.release()?;
//!     Ok(())
//! }
//! ```

pub mod aggregate;
pub mod bandwidth;
pub mod net;
pub mod span;

mod error;
mod test;

pub use error::Error;
