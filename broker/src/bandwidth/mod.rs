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

//! # Bandwidth functions
//!
//! A bandwidth function of *degree* `n` describes what a tree edge must carry: given the set of
//! endpoints on the "from" side of the edge's cut (any non-empty proper subset of `{0..n-1}`),
//! it yields the [`BandwidthRange`] required for traffic flowing from that side towards the
//! rest.
//!
//! Functions are *reducible*: partitioning the endpoints into groups yields a
//! [`ReducedFunction`] of smaller degree that agrees with the original on the corresponding
//! unions. This is what allows an aggregator to delegate a slice of a request to a member
//! network without handing over the full endpoint set. For small degrees a function can be
//! materialised into a [`TableFunction`], and every function can be turned into a transmissible
//! [`FunctionRepr`].

mod flat;
mod matrix;
mod pairs;
mod reduced;
mod repr;
mod table;

pub use flat::FlatFunction;
pub use matrix::MatrixFunction;
pub use pairs::PairsFunction;
pub use reduced::ReducedFunction;
pub use repr::FunctionRepr;
pub use table::TableFunction;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Largest degree for which a function may be tabulated.
pub const MAX_TABLE_DEGREE: usize = 8;

/// Bandwidth function errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BandwidthError {
    /// The queried subset is empty, full, or mentions an endpoint beyond the degree.
    #[error("subset is not a non-empty proper subset of 0..{degree}")]
    InvalidSubset {
        /// Degree of the queried function.
        degree: usize,
    },
    /// A function of degree zero was requested.
    #[error("a bandwidth function must have at least one endpoint")]
    ZeroDegree,
    /// A range with a negative rate or an upper bound below the lower bound.
    #[error("bandwidth range bounds are negative or inverted")]
    InvalidRange,
    /// The groups passed to a reduction do not partition the base endpoints.
    #[error("groups do not partition the endpoints of the base function")]
    InvalidPartition,
    /// The function is too large to tabulate.
    #[error("degree {0} exceeds the tabulation bound of {}", MAX_TABLE_DEGREE)]
    DegreeTooLarge(usize),
    /// Vectors or matrices with inconsistent dimensions or negative rates.
    #[error("inconsistent shape for bandwidth data")]
    ShapeMismatch,
}

/// An amount of bandwidth an edge must supply: a guaranteed minimum and an optional ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandwidthRange {
    min: f64,
    max: Option<f64>,
}

impl BandwidthRange {
    /// A range with only a lower bound. Negative rates are clamped to zero.
    pub fn at_least(min: f64) -> Self {
        Self { min: min.max(0.0), max: None }
    }

    /// A degenerate range carrying exactly `value`. Negative rates are clamped to zero.
    pub fn exact(value: f64) -> Self {
        let value = value.max(0.0);
        Self { min: value, max: Some(value) }
    }

    /// A range between the two bounds, failing when the bounds are negative or inverted.
    pub fn between(min: f64, max: f64) -> Result<Self, BandwidthError> {
        if min < 0.0 || max < min {
            Err(BandwidthError::InvalidRange)
        } else {
            Ok(Self { min, max: Some(max) })
        }
    }

    /// The guaranteed rate.
    pub fn min(&self) -> f64 {
        self.min
    }

    /// The ceiling, if any.
    pub fn max(&self) -> Option<f64> {
        self.max
    }

    /// Sum of two ranges: minima add, and the result is unbounded if either side is.
    pub fn add(&self, other: &Self) -> Self {
        Self {
            min: self.min + other.min,
            max: match (self.max, other.max) {
                (Some(a), Some(b)) => Some(a + b),
                _ => None,
            },
        }
    }

    /// Clamp the range below `cap`.
    pub fn capped(&self, cap: f64) -> Self {
        let cap = cap.max(0.0);
        Self {
            min: self.min.min(cap),
            max: Some(self.max.map_or(cap, |m| m.min(cap))),
        }
    }
}

impl fmt::Display for BandwidthRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "[{}, {}]", self.min, max),
            None => write!(f, "[{}, inf)", self.min),
        }
    }
}

/// A function from an endpoint subset to the bandwidth a tree edge must carry.
///
/// `apply(from)` is defined for every non-empty proper subset of `{0..degree-1}` and yields the
/// demand for traffic flowing *from* that side of the cut towards the complement; the opposite
/// direction is obtained by applying the complement. Implementations must be deterministic
/// within one process lifetime.
pub trait BandwidthFunction: fmt::Debug + Send + Sync {
    /// The number of endpoints this function speaks about. Always at least one.
    fn degree(&self) -> usize;

    /// The demand across a cut, from the given side.
    fn apply(&self, from: &HashSet<usize>) -> Result<BandwidthRange, BandwidthError>;

    /// A serialisable description of this function, suitable for handing to a subordinate.
    ///
    /// The default implementation tabulates, which fails beyond [`MAX_TABLE_DEGREE`].
    fn repr(&self) -> Result<FunctionRepr, BandwidthError> {
        Ok(FunctionRepr::from(TableFunction::from_fn(self)?))
    }
}

/// Check that `from` is a non-empty proper subset of `{0..degree-1}`.
pub(crate) fn check_subset(degree: usize, from: &HashSet<usize>) -> Result<(), BandwidthError> {
    if from.is_empty() || from.len() >= degree || from.iter().any(|i| *i >= degree) {
        Err(BandwidthError::InvalidSubset { degree })
    } else {
        Ok(())
    }
}

/// Encode a subset as a bit pattern, bit `i` standing for endpoint `i`.
pub(crate) fn encode(from: &HashSet<usize>) -> usize {
    from.iter().fold(0usize, |acc, i| acc | (1usize << i))
}
