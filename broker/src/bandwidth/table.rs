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

//! Tabulated bandwidth functions.

use crate::bandwidth::{
    check_subset, encode, BandwidthError, BandwidthFunction, BandwidthRange, FunctionRepr,
    MAX_TABLE_DEGREE,
};
use std::collections::HashSet;

/// A bandwidth function materialised into a lookup table.
///
/// The table holds one entry for every non-empty proper subset, keyed by the subset's bit
/// encoding (bit `i` stands for endpoint `i`), so a function of degree `n` occupies `2^n - 2`
/// entries. Tabulation is bounded at degree [`MAX_TABLE_DEGREE`].
#[derive(Debug, Clone, PartialEq)]
pub struct TableFunction {
    degree: usize,
    entries: Vec<BandwidthRange>,
}

impl TableFunction {
    /// Materialise any function into a table by querying every valid subset.
    pub fn from_fn<F: BandwidthFunction + ?Sized>(function: &F) -> Result<Self, BandwidthError> {
        let degree = function.degree();
        if degree == 0 {
            return Err(BandwidthError::ZeroDegree);
        }
        if degree > MAX_TABLE_DEGREE {
            return Err(BandwidthError::DegreeTooLarge(degree));
        }
        let mut entries = Vec::with_capacity((1usize << degree) - 2);
        for code in 1..((1usize << degree) - 1) {
            let subset: HashSet<usize> = (0..degree).filter(|i| code & (1 << i) != 0).collect();
            entries.push(function.apply(&subset)?);
        }
        Ok(Self { degree, entries })
    }

    /// Rebuild a table from its raw entries, e.g. when deserialising a [`FunctionRepr`].
    pub fn from_parts(
        degree: usize,
        entries: Vec<BandwidthRange>,
    ) -> Result<Self, BandwidthError> {
        if degree == 0 {
            return Err(BandwidthError::ZeroDegree);
        }
        if degree > MAX_TABLE_DEGREE {
            return Err(BandwidthError::DegreeTooLarge(degree));
        }
        if entries.len() != (1usize << degree) - 2 {
            return Err(BandwidthError::ShapeMismatch);
        }
        Ok(Self { degree, entries })
    }

    /// The raw entries, indexed by subset encoding minus one.
    pub fn entries(&self) -> &[BandwidthRange] {
        &self.entries
    }
}

impl BandwidthFunction for TableFunction {
    fn degree(&self) -> usize {
        self.degree
    }

    fn apply(&self, from: &HashSet<usize>) -> Result<BandwidthRange, BandwidthError> {
        check_subset(self.degree, from)?;
        Ok(self.entries[encode(from) - 1])
    }

    fn repr(&self) -> Result<FunctionRepr, BandwidthError> {
        Ok(FunctionRepr::Table { degree: self.degree, entries: self.entries.clone() })
    }
}
