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

//! Inter-network trunks and their tunnels.

use crate::net::types::{Circuit, TerminalId, TrunkError};
use log::*;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Mutex;

/// An allocated label pair on a trunk: one reserved data-plane channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tunnel {
    /// The circuit on the trunk's start terminal.
    pub start: Circuit,
    /// The circuit on the trunk's end terminal.
    pub end: Circuit,
}

#[derive(Debug)]
struct TrunkState {
    /// start label to end label
    forward: HashMap<u32, u32>,
    /// end label to start label
    reverse: HashMap<u32, u32>,
    /// free start labels, popped smallest-first
    available: BTreeSet<u32>,
    /// start labels currently handed out
    allocated: HashSet<u32>,
    remaining: f64,
}

/// A bidirectional link between terminals of two distinct member networks.
///
/// A trunk carries a fixed one-way delay, a bandwidth pool shared by both directions, and a
/// bidirectional label mapping from which tunnels are allocated. The label pool and the
/// bandwidth counter are guarded by one internal lock; all operations take `&self`.
#[derive(Debug)]
pub struct Trunk {
    start: TerminalId,
    end: TerminalId,
    delay: f64,
    initial: f64,
    state: Mutex<TrunkState>,
}

impl Trunk {
    /// Create a trunk between the two terminals with the given delay and bandwidth pool.
    /// Negative quantities are clamped to zero.
    pub fn new(start: TerminalId, end: TerminalId, delay: f64, bandwidth: f64) -> Self {
        let bandwidth = bandwidth.max(0.0);
        Self {
            start,
            end,
            delay: delay.max(0.0),
            initial: bandwidth,
            state: Mutex::new(TrunkState {
                forward: HashMap::new(),
                reverse: HashMap::new(),
                available: BTreeSet::new(),
                allocated: HashSet::new(),
                remaining: bandwidth,
            }),
        }
    }

    /// The terminal on the start side.
    pub fn start(&self) -> &TerminalId {
        &self.start
    }

    /// The terminal on the end side.
    pub fn end(&self) -> &TerminalId {
        &self.end
    }

    /// The one-way delay of the trunk.
    pub fn delay(&self) -> f64 {
        self.delay
    }

    /// The size of the bandwidth pool when the trunk was created.
    pub fn initial_bandwidth(&self) -> f64 {
        self.initial
    }

    /// The bandwidth currently unallocated.
    pub fn remaining_bandwidth(&self) -> f64 {
        self.state.lock().unwrap().remaining
    }

    /// The number of labels ready to be allocated.
    pub fn available_tunnels(&self) -> usize {
        self.state.lock().unwrap().available.len()
    }

    /// The start labels currently allocated.
    pub fn allocated_labels(&self) -> HashSet<u32> {
        self.state.lock().unwrap().allocated.clone()
    }

    /// Atomically map `count` labels starting at `start_base` on the start side to the labels
    /// starting at `end_base` on the end side, and add them to the available pool. Fails
    /// without effect if any label of either range is already defined.
    pub fn define_label_range(
        &self,
        start_base: u32,
        count: u32,
        end_base: u32,
    ) -> Result<(), TrunkError> {
        if count == 0 {
            return Err(TrunkError::EmptyLabelRange);
        }
        let mut state = self.state.lock().unwrap();
        for offset in 0..count {
            if state.forward.contains_key(&(start_base + offset))
                || state.reverse.contains_key(&(end_base + offset))
            {
                return Err(TrunkError::LabelsInUse);
            }
        }
        for offset in 0..count {
            state.forward.insert(start_base + offset, end_base + offset);
            state.reverse.insert(end_base + offset, start_base + offset);
            state.available.insert(start_base + offset);
        }
        Ok(())
    }

    /// Allocate a tunnel carrying `bandwidth`: pop the smallest free start label, charge the
    /// pool, and return the circuit pair.
    pub fn allocate_tunnel(&self, bandwidth: f64) -> Result<Tunnel, TrunkError> {
        let bandwidth = bandwidth.max(0.0);
        let mut state = self.state.lock().unwrap();
        let label = match state.available.iter().next() {
            Some(label) => *label,
            None => return Err(TrunkError::NoTunnelsAvailable),
        };
        if state.remaining < bandwidth {
            return Err(TrunkError::InsufficientBandwidth);
        }
        state.available.remove(&label);
        state.allocated.insert(label);
        state.remaining -= bandwidth;
        let peer = state.forward[&label];
        debug!(
            "allocated tunnel {}<->{} ({} remaining on {}--{})",
            label, peer, state.remaining, self.start, self.end
        );
        Ok(Tunnel {
            start: Circuit::new(self.start.clone(), label),
            end: Circuit::new(self.end.clone(), peer),
        })
    }

    /// Re-mark a specific defined start label as allocated, charging the pool. Used when
    /// rebuilding trunk state from recovered service records; adopting a label that is already
    /// allocated is a no-op.
    pub fn adopt_tunnel(&self, label: u32, bandwidth: f64) -> Result<(), TrunkError> {
        let bandwidth = bandwidth.max(0.0);
        let mut state = self.state.lock().unwrap();
        if !state.forward.contains_key(&label) {
            return Err(TrunkError::UnknownLabel(label));
        }
        if state.allocated.contains(&label) {
            return Ok(());
        }
        if state.remaining < bandwidth {
            return Err(TrunkError::InsufficientBandwidth);
        }
        state.available.remove(&label);
        state.allocated.insert(label);
        state.remaining -= bandwidth;
        Ok(())
    }

    /// Return a start label to the pool. Releasing an already free label is a no-op; an
    /// undefined label is an error. Bandwidth is refunded separately through
    /// [`release_bandwidth`](Self::release_bandwidth).
    pub fn release_tunnel(&self, label: u32) -> Result<(), TrunkError> {
        let mut state = self.state.lock().unwrap();
        if !state.forward.contains_key(&label) {
            return Err(TrunkError::UnknownLabel(label));
        }
        if state.allocated.remove(&label) {
            state.available.insert(label);
        }
        Ok(())
    }

    /// Refund bandwidth to the pool, saturating at the initial pool size.
    pub fn release_bandwidth(&self, bandwidth: f64) {
        let bandwidth = bandwidth.max(0.0);
        let mut state = self.state.lock().unwrap();
        state.remaining += bandwidth;
        if state.remaining > self.initial {
            warn!(
                "bandwidth refund exceeds the pool of {}--{}; clamping",
                self.start, self.end
            );
            state.remaining = self.initial;
        }
    }

    /// Resolve the circuit on the opposite side of the trunk.
    pub fn peer(&self, circuit: &Circuit) -> Result<Circuit, TrunkError> {
        let state = self.state.lock().unwrap();
        if circuit.terminal == self.start {
            match state.forward.get(&circuit.label) {
                Some(label) => Ok(Circuit::new(self.end.clone(), *label)),
                None => Err(TrunkError::UnknownLabel(circuit.label)),
            }
        } else if circuit.terminal == self.end {
            match state.reverse.get(&circuit.label) {
                Some(label) => Ok(Circuit::new(self.start.clone(), *label)),
                None => Err(TrunkError::UnknownLabel(circuit.label)),
            }
        } else {
            Err(TrunkError::ForeignCircuit(circuit.clone()))
        }
    }

    /// Release every allocated start label that is not in `keep`. Used during recovery to
    /// discard tunnels no surviving service accounts for.
    pub fn retain_tunnels(&self, keep: &HashSet<u32>) {
        let mut state = self.state.lock().unwrap();
        let orphans: Vec<u32> = state
            .allocated
            .iter()
            .filter(|label| !keep.contains(label))
            .copied()
            .collect();
        for label in orphans {
            info!("discarding orphaned tunnel label {} on {}--{}", label, self.start, self.end);
            state.allocated.remove(&label);
            state.available.insert(label);
        }
    }
}
