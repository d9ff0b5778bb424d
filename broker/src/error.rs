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

//! Module containing the top-level error type.

use crate::bandwidth::BandwidthError;
use crate::net::{NetworkError, StorageError, TrunkError};
use thiserror::Error;

/// Main error type.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Error propagated from the network model or the aggregator.
    #[error("network error: {0}")]
    Network(#[from] NetworkError),
    /// Error propagated from a bandwidth function.
    #[error("bandwidth function error: {0}")]
    Bandwidth(#[from] BandwidthError),
}

impl From<TrunkError> for Error {
    fn from(cause: TrunkError) -> Self {
        Self::Network(NetworkError::Trunk(cause))
    }
}

impl From<StorageError> for Error {
    fn from(cause: StorageError) -> Self {
        Self::Network(NetworkError::Storage(cause))
    }
}
