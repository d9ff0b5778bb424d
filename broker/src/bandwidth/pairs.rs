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

//! A bandwidth function derived from per-endpoint ingress and egress rates.

use crate::bandwidth::{
    check_subset, BandwidthError, BandwidthFunction, BandwidthRange, FunctionRepr,
};
use std::collections::HashSet;

/// Per-endpoint rates: endpoint `e` injects at most `ingress[e]` into the tree and absorbs at
/// most `egress[e]` out of it.
///
/// The demand across a cut from side `S` is `min(Σ ingress over S, Σ egress over the rest)`:
/// no more can enter the edge than the near side emits, and no more is worth carrying than the
/// far side can absorb.
#[derive(Debug, Clone, PartialEq)]
pub struct PairsFunction {
    ingress: Vec<f64>,
    egress: Vec<f64>,
}

impl PairsFunction {
    /// Create a pairs function from matching rate vectors. Negative rates are clamped to zero.
    pub fn new(ingress: Vec<f64>, egress: Vec<f64>) -> Result<Self, BandwidthError> {
        if ingress.is_empty() {
            return Err(BandwidthError::ZeroDegree);
        }
        if ingress.len() != egress.len() {
            return Err(BandwidthError::ShapeMismatch);
        }
        Ok(Self {
            ingress: ingress.into_iter().map(|r| r.max(0.0)).collect(),
            egress: egress.into_iter().map(|r| r.max(0.0)).collect(),
        })
    }

    /// The ingress rate of every endpoint.
    pub fn ingress(&self) -> &[f64] {
        &self.ingress
    }

    /// The egress rate of every endpoint.
    pub fn egress(&self) -> &[f64] {
        &self.egress
    }
}

impl BandwidthFunction for PairsFunction {
    fn degree(&self) -> usize {
        self.ingress.len()
    }

    fn apply(&self, from: &HashSet<usize>) -> Result<BandwidthRange, BandwidthError> {
        check_subset(self.degree(), from)?;
        let sent: f64 = from.iter().map(|e| self.ingress[*e]).sum();
        let received: f64 = (0..self.degree())
            .filter(|e| !from.contains(e))
            .map(|e| self.egress[e])
            .sum();
        Ok(BandwidthRange::exact(sent.min(received)))
    }

    fn repr(&self) -> Result<FunctionRepr, BandwidthError> {
        Ok(FunctionRepr::Pairs { ingress: self.ingress.clone(), egress: self.egress.clone() })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use maplit::hashset;

    #[test]
    fn test_pairs_demand() {
        let f = PairsFunction::new(vec![10.0, 20.0, 30.0], vec![5.0, 50.0, 50.0]).unwrap();
        // {0} sends 10, the others can absorb 100
        assert_eq!(f.apply(&hashset![0]).unwrap().min(), 10.0);
        // {1, 2} send 50, but endpoint 0 only absorbs 5
        assert_eq!(f.apply(&hashset![1, 2]).unwrap().min(), 5.0);
        assert_eq!(f.apply(&hashset![0, 2]).unwrap().min(), 40.0);
    }

    #[test]
    fn test_pairs_validation() {
        assert_eq!(PairsFunction::new(vec![], vec![]), Err(BandwidthError::ZeroDegree));
        assert_eq!(
            PairsFunction::new(vec![1.0], vec![1.0, 2.0]),
            Err(BandwidthError::ShapeMismatch)
        );
        let f = PairsFunction::new(vec![1.0, 2.0], vec![3.0, 4.0]).unwrap();
        assert_eq!(
            f.apply(&hashset![0, 1]),
            Err(BandwidthError::InvalidSubset { degree: 2 })
        );
        assert_eq!(
            f.apply(&hashset![2]),
            Err(BandwidthError::InvalidSubset { degree: 2 })
        );
    }

    #[test]
    fn test_pairs_clamps_negative_rates() {
        let f = PairsFunction::new(vec![-1.0, 2.0], vec![2.0, -3.0]).unwrap();
        assert_eq!(f.apply(&hashset![0]).unwrap().min(), 0.0);
        assert_eq!(f.apply(&hashset![1]).unwrap().min(), 2.0);
    }
}
