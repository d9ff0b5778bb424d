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

//! # The aggregator service engine
//!
//! An [`Aggregator`] is a [`Network`](crate::net::Network) in its own right, built out of other
//! networks: its topology is the union of its [trunks](crate::net::Trunk) and the models of its
//! members. Defining a service on it plots a spanning tree over that composed graph, allocates
//! one trunk tunnel per inter-network edge, and fans the request out as one subordinate service
//! per participating member. The lifecycle of the whole is driven by the lifecycle events of
//! the parts.
//!
//! Aggregators may nest: a member network can itself be an aggregator, in which case the
//! delegated slice is plotted again one level down.

mod aggregator;
mod plot;
mod service;
mod store;

pub use aggregator::Aggregator;
pub use store::{MemoryStore, ServiceRecord, ServiceStore, SubordinateRecord, TunnelRecord};

pub(crate) use aggregator::AggInner;
