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

//! A bandwidth function demanding the same range on every edge.

use crate::bandwidth::{
    check_subset, BandwidthError, BandwidthFunction, BandwidthRange, FunctionRepr,
};
use std::collections::HashSet;

/// A function returning one fixed [`BandwidthRange`] for every valid subset.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatFunction {
    degree: usize,
    range: BandwidthRange,
}

impl FlatFunction {
    /// Create a flat function over `degree` endpoints.
    pub fn new(degree: usize, range: BandwidthRange) -> Result<Self, BandwidthError> {
        if degree == 0 {
            return Err(BandwidthError::ZeroDegree);
        }
        Ok(Self { degree, range })
    }

    /// The range every edge is asked to carry.
    pub fn range(&self) -> BandwidthRange {
        self.range
    }
}

impl BandwidthFunction for FlatFunction {
    fn degree(&self) -> usize {
        self.degree
    }

    fn apply(&self, from: &HashSet<usize>) -> Result<BandwidthRange, BandwidthError> {
        check_subset(self.degree, from)?;
        Ok(self.range)
    }

    fn repr(&self) -> Result<FunctionRepr, BandwidthError> {
        Ok(FunctionRepr::Flat { degree: self.degree, range: self.range })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use maplit::hashset;

    #[test]
    fn test_flat_function() {
        let f = FlatFunction::new(4, BandwidthRange::exact(7.0)).unwrap();
        assert_eq!(f.degree(), 4);
        assert_eq!(f.apply(&hashset![1]).unwrap(), BandwidthRange::exact(7.0));
        assert_eq!(f.apply(&hashset![0, 2, 3]).unwrap(), BandwidthRange::exact(7.0));
        assert_eq!(
            f.apply(&hashset![0, 1, 2, 3]),
            Err(BandwidthError::InvalidSubset { degree: 4 })
        );
        assert_eq!(
            FlatFunction::new(0, BandwidthRange::at_least(1.0)),
            Err(BandwidthError::ZeroDegree)
        );
    }
}
