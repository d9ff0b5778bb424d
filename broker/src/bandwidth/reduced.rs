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

//! Reduction of a bandwidth function by grouping endpoints.

use crate::bandwidth::{
    check_subset, BandwidthError, BandwidthFunction, BandwidthRange, FunctionRepr,
};
use std::collections::HashSet;
use std::sync::Arc;

/// A function of smaller degree derived from a base function by partitioning its endpoints.
///
/// Group `k` of the partition becomes endpoint `k` of the reduced function, and
/// `reduced.apply(S)` equals `base.apply(union of the groups in S)`. This is how an aggregator
/// hands a member network a function over the member's attachment circuits while preserving the
/// demands of the original endpoints.
#[derive(Debug, Clone)]
pub struct ReducedFunction {
    base: Arc<dyn BandwidthFunction>,
    groups: Vec<Vec<usize>>,
}

impl ReducedFunction {
    /// Reduce `base` over the given partition. Every group must be non-empty, the groups must
    /// be disjoint, and together they must cover every endpoint of the base function.
    pub fn new(
        base: Arc<dyn BandwidthFunction>,
        groups: Vec<Vec<usize>>,
    ) -> Result<Self, BandwidthError> {
        if groups.is_empty() {
            return Err(BandwidthError::ZeroDegree);
        }
        let mut seen = HashSet::new();
        for group in &groups {
            if group.is_empty() {
                return Err(BandwidthError::InvalidPartition);
            }
            for endpoint in group {
                if *endpoint >= base.degree() || !seen.insert(*endpoint) {
                    return Err(BandwidthError::InvalidPartition);
                }
            }
        }
        if seen.len() != base.degree() {
            return Err(BandwidthError::InvalidPartition);
        }
        Ok(Self { base, groups })
    }

    /// The function this reduction is built over.
    pub fn base(&self) -> &Arc<dyn BandwidthFunction> {
        &self.base
    }

    /// The endpoint groups, indexed by reduced endpoint.
    pub fn groups(&self) -> &[Vec<usize>] {
        &self.groups
    }
}

impl BandwidthFunction for ReducedFunction {
    fn degree(&self) -> usize {
        self.groups.len()
    }

    fn apply(&self, from: &HashSet<usize>) -> Result<BandwidthRange, BandwidthError> {
        check_subset(self.degree(), from)?;
        let union: HashSet<usize> = from
            .iter()
            .flat_map(|k| self.groups[*k].iter().copied())
            .collect();
        self.base.apply(&union)
    }

    fn repr(&self) -> Result<FunctionRepr, BandwidthError> {
        Ok(FunctionRepr::Reduced {
            base: Box::new(self.base.repr()?),
            groups: self.groups.clone(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bandwidth::PairsFunction;
    use maplit::hashset;

    fn base() -> Arc<dyn BandwidthFunction> {
        Arc::new(PairsFunction::new(vec![10.0, 20.0, 30.0, 40.0], vec![50.0; 4]).unwrap())
    }

    #[test]
    fn test_reduction_matches_base_on_unions() {
        let base = base();
        let reduced =
            ReducedFunction::new(base.clone(), vec![vec![0, 1], vec![2], vec![3]]).unwrap();
        assert_eq!(reduced.degree(), 3);
        assert_eq!(
            reduced.apply(&hashset![0]).unwrap(),
            base.apply(&hashset![0, 1]).unwrap()
        );
        assert_eq!(
            reduced.apply(&hashset![0, 2]).unwrap(),
            base.apply(&hashset![0, 1, 3]).unwrap()
        );
        assert_eq!(
            reduced.apply(&hashset![1, 2]).unwrap(),
            base.apply(&hashset![2, 3]).unwrap()
        );
    }

    #[test]
    fn test_reduction_rejects_bad_partitions() {
        assert_eq!(
            ReducedFunction::new(base(), vec![]).err(),
            Some(BandwidthError::ZeroDegree)
        );
        assert_eq!(
            ReducedFunction::new(base(), vec![vec![0, 1], vec![]]).err(),
            Some(BandwidthError::InvalidPartition)
        );
        assert_eq!(
            ReducedFunction::new(base(), vec![vec![0, 1], vec![1, 2], vec![3]]).err(),
            Some(BandwidthError::InvalidPartition)
        );
        assert_eq!(
            ReducedFunction::new(base(), vec![vec![0, 1], vec![2]]).err(),
            Some(BandwidthError::InvalidPartition)
        );
        assert_eq!(
            ReducedFunction::new(base(), vec![vec![0, 1], vec![2], vec![4]]).err(),
            Some(BandwidthError::InvalidPartition)
        );
    }

    #[test]
    fn test_nested_reduction() {
        let base = base();
        let once =
            ReducedFunction::new(base.clone(), vec![vec![0], vec![1], vec![2, 3]]).unwrap();
        let twice = ReducedFunction::new(Arc::new(once), vec![vec![0, 1], vec![2]]).unwrap();
        assert_eq!(
            twice.apply(&hashset![0]).unwrap(),
            base.apply(&hashset![0, 1]).unwrap()
        );
    }
}
