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

//! A bandwidth function built from pairwise demands.

use crate::bandwidth::{
    check_subset, BandwidthError, BandwidthFunction, BandwidthRange, FunctionRepr,
};
use std::collections::HashSet;

/// A symmetric matrix of pairwise demands: `demand[i][j]` is the rate endpoints `i` and `j`
/// exchange. The demand across a cut is the sum over all pairs the cut separates.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixFunction {
    demand: Vec<Vec<f64>>,
}

impl MatrixFunction {
    /// Create a matrix function. The matrix must be square, symmetric and non-negative; the
    /// diagonal is ignored.
    pub fn new(demand: Vec<Vec<f64>>) -> Result<Self, BandwidthError> {
        let n = demand.len();
        if n == 0 {
            return Err(BandwidthError::ZeroDegree);
        }
        if demand.iter().any(|row| row.len() != n) {
            return Err(BandwidthError::ShapeMismatch);
        }
        for i in 0..n {
            for j in 0..n {
                if demand[i][j] < 0.0 || demand[i][j] != demand[j][i] {
                    return Err(BandwidthError::ShapeMismatch);
                }
            }
        }
        Ok(Self { demand })
    }

    /// The pairwise demand matrix.
    pub fn demand(&self) -> &[Vec<f64>] {
        &self.demand
    }
}

impl BandwidthFunction for MatrixFunction {
    fn degree(&self) -> usize {
        self.demand.len()
    }

    fn apply(&self, from: &HashSet<usize>) -> Result<BandwidthRange, BandwidthError> {
        check_subset(self.degree(), from)?;
        let mut total = 0.0;
        for i in from {
            for j in 0..self.degree() {
                if !from.contains(&j) {
                    total += self.demand[*i][j];
                }
            }
        }
        Ok(BandwidthRange::exact(total))
    }

    fn repr(&self) -> Result<FunctionRepr, BandwidthError> {
        Ok(FunctionRepr::Matrix { demand: self.demand.clone() })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use maplit::hashset;

    fn sample() -> MatrixFunction {
        MatrixFunction::new(vec![
            vec![0.0, 1.0, 2.0],
            vec![1.0, 0.0, 4.0],
            vec![2.0, 4.0, 0.0],
        ])
        .unwrap()
    }

    #[test]
    fn test_matrix_demand() {
        let f = sample();
        assert_eq!(f.apply(&hashset![0]).unwrap().min(), 3.0);
        assert_eq!(f.apply(&hashset![1]).unwrap().min(), 5.0);
        assert_eq!(f.apply(&hashset![0, 1]).unwrap().min(), 6.0);
    }

    #[test]
    fn test_matrix_is_direction_free() {
        let f = sample();
        for side in &[hashset![0], hashset![1], hashset![2]] {
            let complement: HashSet<usize> = (0..3).filter(|i| !side.contains(i)).collect();
            assert_eq!(f.apply(side).unwrap(), f.apply(&complement).unwrap());
        }
    }

    #[test]
    fn test_matrix_validation() {
        assert_eq!(MatrixFunction::new(vec![]), Err(BandwidthError::ZeroDegree));
        assert_eq!(
            MatrixFunction::new(vec![vec![0.0, 1.0], vec![2.0, 0.0]]),
            Err(BandwidthError::ShapeMismatch)
        );
        assert_eq!(
            MatrixFunction::new(vec![vec![0.0], vec![0.0]]),
            Err(BandwidthError::ShapeMismatch)
        );
    }
}
