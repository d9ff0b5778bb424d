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

//! Transmissible descriptions of bandwidth functions.
//!
//! When an aggregator delegates part of a request, the subordinate must be able to re-evaluate
//! the bandwidth function over its own subdomain. Rather than shipping executable code, a
//! function is described by a tagged, serialisable [`FunctionRepr`] which the receiver rebuilds
//! with [`FunctionRepr::build`].

use crate::bandwidth::{
    BandwidthError, BandwidthFunction, BandwidthRange, FlatFunction, MatrixFunction,
    PairsFunction, ReducedFunction, TableFunction,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A serialisable bandwidth-function description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FunctionRepr {
    /// One fixed range for every edge.
    Flat {
        /// Number of endpoints.
        degree: usize,
        /// The range demanded everywhere.
        range: BandwidthRange,
    },
    /// Per-endpoint ingress and egress rates.
    Pairs {
        /// Rate each endpoint injects.
        ingress: Vec<f64>,
        /// Rate each endpoint absorbs.
        egress: Vec<f64>,
    },
    /// Symmetric pairwise demands.
    Matrix {
        /// The demand matrix.
        demand: Vec<Vec<f64>>,
    },
    /// A materialised lookup table.
    Table {
        /// Number of endpoints.
        degree: usize,
        /// One range per non-empty proper subset, in encoding order.
        entries: Vec<BandwidthRange>,
    },
    /// A reduction of another function over a partition of its endpoints.
    Reduced {
        /// The description of the base function.
        base: Box<FunctionRepr>,
        /// The endpoint groups, indexed by reduced endpoint.
        groups: Vec<Vec<usize>>,
    },
}

impl FunctionRepr {
    /// Rebuild the function this description stands for.
    pub fn build(&self) -> Result<Arc<dyn BandwidthFunction>, BandwidthError> {
        match self {
            Self::Flat { degree, range } => Ok(Arc::new(FlatFunction::new(*degree, *range)?)),
            Self::Pairs { ingress, egress } => {
                Ok(Arc::new(PairsFunction::new(ingress.clone(), egress.clone())?))
            }
            Self::Matrix { demand } => Ok(Arc::new(MatrixFunction::new(demand.clone())?)),
            Self::Table { degree, entries } => {
                Ok(Arc::new(TableFunction::from_parts(*degree, entries.clone())?))
            }
            Self::Reduced { base, groups } => {
                Ok(Arc::new(ReducedFunction::new(base.build()?, groups.clone())?))
            }
        }
    }
}

impl From<TableFunction> for FunctionRepr {
    fn from(table: TableFunction) -> Self {
        Self::Table { degree: table.degree(), entries: table.entries().to_vec() }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use maplit::hashset;
    use std::collections::HashSet;

    #[test]
    fn test_json_round_trip() {
        let f = PairsFunction::new(vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]).unwrap();
        let repr = f.repr().unwrap();
        let json = serde_json::to_string(&repr).unwrap();
        assert!(json.contains("\"type\":\"pairs\""));
        let back: FunctionRepr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, repr);
    }

    #[test]
    fn test_rebuilt_function_agrees() {
        let f = MatrixFunction::new(vec![
            vec![0.0, 3.0, 1.0],
            vec![3.0, 0.0, 2.0],
            vec![1.0, 2.0, 0.0],
        ])
        .unwrap();
        let rebuilt = f.repr().unwrap().build().unwrap();
        for code in 1usize..7 {
            let subset: HashSet<usize> = (0..3).filter(|i| code & (1 << i) != 0).collect();
            assert_eq!(rebuilt.apply(&subset).unwrap(), f.apply(&subset).unwrap());
        }
    }

    #[test]
    fn test_reduced_repr_round_trip() {
        let base: Arc<dyn BandwidthFunction> =
            Arc::new(PairsFunction::new(vec![10.0, 20.0, 30.0], vec![40.0; 3]).unwrap());
        let reduced = ReducedFunction::new(base, vec![vec![0, 2], vec![1]]).unwrap();
        let repr = reduced.repr().unwrap();
        let json = serde_json::to_string(&repr).unwrap();
        let rebuilt = serde_json::from_str::<FunctionRepr>(&json)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(rebuilt.degree(), 2);
        assert_eq!(
            rebuilt.apply(&hashset![0]).unwrap(),
            reduced.apply(&hashset![0]).unwrap()
        );
    }

    #[test]
    fn test_default_repr_tabulates() {
        let flat = FlatFunction::new(2, BandwidthRange::at_least(5.0)).unwrap();
        // FlatFunction has its own repr; go through the table path explicitly instead
        let table = TableFunction::from_fn(&flat).unwrap();
        let repr = FunctionRepr::from(table);
        match &repr {
            FunctionRepr::Table { degree, entries } => {
                assert_eq!(*degree, 2);
                assert_eq!(entries.len(), 2);
            }
            other => panic!("unexpected repr: {:?}", other),
        }
        let rebuilt = repr.build().unwrap();
        assert_eq!(
            rebuilt.apply(&hashset![1]).unwrap(),
            BandwidthRange::at_least(5.0)
        );
    }
}
