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

//! The persistence contract of an aggregator.
//!
//! An aggregator configured with a [`ServiceStore`] writes one [`ServiceRecord`] per defined
//! service and keeps its activation intent up to date. After a restart,
//! [`recover`](crate::aggregate::Aggregator::recover) replays the records: services are rebuilt,
//! subordinate services are reconciled by handle, and every trunk is told which tunnel labels
//! are still accounted for. How records are actually stored is the collaborator's business; the
//! in-memory [`MemoryStore`] is the reference implementation used in tests.

use crate::net::{Segment, ServiceId, StorageError, TerminalId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// One tunnel held by a recorded service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunnelRecord {
    /// The start-side terminal of the trunk.
    pub start_terminal: TerminalId,
    /// The end-side terminal of the trunk.
    pub end_terminal: TerminalId,
    /// The allocated start label.
    pub label: u32,
    /// The bandwidth charged to the trunk's pool.
    pub bandwidth: f64,
}

/// One subordinate service of a recorded service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubordinateRecord {
    /// The member network owning the slice.
    pub network: String,
    /// The handle under which the slice was created, used for reconciliation.
    pub handle: ServiceId,
    /// The slice definition, replayed when the member no longer knows the handle.
    pub segment: Segment,
}

/// The persisted form of one aggregator service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// The service id.
    pub id: ServiceId,
    /// Whether activation was requested.
    pub intent: bool,
    /// The client-facing definition.
    pub segment: Segment,
    /// The trunk tunnels held by the service.
    pub tunnels: Vec<TunnelRecord>,
    /// The subordinate slices, one per participating member network.
    pub subordinates: Vec<SubordinateRecord>,
}

/// External storage for service records.
pub trait ServiceStore: Send + Sync {
    /// Read every record.
    fn load(&self) -> Result<Vec<ServiceRecord>, StorageError>;

    /// Write a record, replacing any record with the same id.
    fn insert(&self, record: &ServiceRecord) -> Result<(), StorageError>;

    /// Update the activation intent of a record.
    fn set_intent(&self, id: ServiceId, intent: bool) -> Result<(), StorageError>;

    /// Delete a record. Deleting an unknown id is a no-op.
    fn remove(&self, id: ServiceId) -> Result<(), StorageError>;
}

/// A [`ServiceStore`] kept in memory, for tests and demonstrations.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<ServiceId, ServiceRecord>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ServiceStore for MemoryStore {
    fn load(&self) -> Result<Vec<ServiceRecord>, StorageError> {
        Ok(self.records.lock().unwrap().values().cloned().collect())
    }

    fn insert(&self, record: &ServiceRecord) -> Result<(), StorageError> {
        self.records.lock().unwrap().insert(record.id, record.clone());
        Ok(())
    }

    fn set_intent(&self, id: ServiceId, intent: bool) -> Result<(), StorageError> {
        match self.records.lock().unwrap().get_mut(&id) {
            Some(record) => {
                record.intent = intent;
                Ok(())
            }
            None => Err(StorageError(format!("no record for service {}", id))),
        }
    }

    fn remove(&self, id: ServiceId) -> Result<(), StorageError> {
        self.records.lock().unwrap().remove(&id);
        Ok(())
    }
}
