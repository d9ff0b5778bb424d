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

//! Connection requests.

use crate::net::types::{Circuit, NetworkError, TrafficFlow};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A connection request: a set of circuits with their traffic demands, plus optional quality
/// ceilings. A segment is immutable once passed to a service's `define`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    endpoints: Vec<(Circuit, TrafficFlow)>,
    max_delay: Option<f64>,
    max_error_rate: Option<f64>,
    bandwidth_cap: Option<f64>,
}

impl Segment {
    /// Create a segment over the given endpoints, with no quality ceilings.
    pub fn new(endpoints: Vec<(Circuit, TrafficFlow)>) -> Self {
        Self { endpoints, max_delay: None, max_error_rate: None, bandwidth_cap: None }
    }

    /// Bound the acceptable end-to-end delay.
    pub fn with_max_delay(mut self, delay: f64) -> Self {
        self.max_delay = Some(delay.max(0.0));
        self
    }

    /// Bound the acceptable error rate.
    pub fn with_max_error_rate(mut self, rate: f64) -> Self {
        self.max_error_rate = Some(rate.max(0.0));
        self
    }

    /// Cap the bandwidth any single edge will be asked to carry.
    pub fn with_bandwidth_cap(mut self, cap: f64) -> Self {
        self.bandwidth_cap = Some(cap.max(0.0));
        self
    }

    /// The endpoints and their demands.
    pub fn endpoints(&self) -> &[(Circuit, TrafficFlow)] {
        &self.endpoints
    }

    /// The circuits of all endpoints.
    pub fn circuits(&self) -> impl Iterator<Item = &Circuit> {
        self.endpoints.iter().map(|(c, _)| c)
    }

    /// The number of endpoints.
    pub fn degree(&self) -> usize {
        self.endpoints.len()
    }

    /// The delay ceiling, if any.
    pub fn max_delay(&self) -> Option<f64> {
        self.max_delay
    }

    /// The error-rate ceiling, if any.
    pub fn max_error_rate(&self) -> Option<f64> {
        self.max_error_rate
    }

    /// The per-edge bandwidth cap, if any.
    pub fn bandwidth_cap(&self) -> Option<f64> {
        self.bandwidth_cap
    }

    /// The largest rate any edge of a tree over these endpoints can be asked to carry: no cut
    /// can demand more than the smaller of the total ingress and the total egress, clamped by
    /// the per-edge cap.
    pub fn worst_cut_demand(&self) -> f64 {
        let ingress: f64 = self.endpoints.iter().map(|(_, f)| f.ingress).sum();
        let egress: f64 = self.endpoints.iter().map(|(_, f)| f.egress).sum();
        let demand = ingress.min(egress);
        match self.bandwidth_cap {
            Some(cap) => demand.min(cap),
            None => demand,
        }
    }

    /// Check the structural validity of the segment: it must have at least one endpoint and
    /// mention every circuit at most once.
    pub fn validate(&self) -> Result<(), NetworkError> {
        if self.endpoints.is_empty() {
            return Err(NetworkError::EmptySegment);
        }
        let mut seen: HashSet<&Circuit> = HashSet::new();
        for (circuit, _) in &self.endpoints {
            if !seen.insert(circuit) {
                return Err(NetworkError::DuplicateCircuit(circuit.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::net::types::TerminalId;

    fn circuit(t: &str, label: u32) -> Circuit {
        Circuit::new(TerminalId::new("net", t), label)
    }

    #[test]
    fn test_segment_validation() {
        assert_eq!(Segment::new(vec![]).validate(), Err(NetworkError::EmptySegment));

        let dup = Segment::new(vec![
            (circuit("a", 1), TrafficFlow::new(1.0, 1.0)),
            (circuit("a", 1), TrafficFlow::new(2.0, 2.0)),
        ]);
        assert_eq!(
            dup.validate(),
            Err(NetworkError::DuplicateCircuit(circuit("a", 1)))
        );

        let ok = Segment::new(vec![
            (circuit("a", 1), TrafficFlow::new(1.0, 1.0)),
            (circuit("a", 2), TrafficFlow::new(2.0, 2.0)),
        ]);
        assert_eq!(ok.validate(), Ok(()));
        assert_eq!(ok.degree(), 2);
    }

    #[test]
    fn test_worst_cut_demand() {
        let segment = Segment::new(vec![
            (circuit("a", 1), TrafficFlow::new(10.0, 4.0)),
            (circuit("b", 1), TrafficFlow::new(20.0, 4.0)),
        ]);
        assert_eq!(segment.worst_cut_demand(), 8.0);
        assert_eq!(segment.clone().with_bandwidth_cap(5.0).worst_cut_demand(), 5.0);
    }

    #[test]
    fn test_ceilings_are_clamped() {
        let segment = Segment::new(vec![(circuit("a", 1), TrafficFlow::new(1.0, 1.0))])
            .with_max_delay(-2.0)
            .with_max_error_rate(-0.5);
        assert_eq!(segment.max_delay(), Some(0.0));
        assert_eq!(segment.max_error_rate(), Some(0.0));
    }
}
