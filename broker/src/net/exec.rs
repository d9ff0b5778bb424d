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

//! Per-network event executors.

use log::*;
use std::sync::mpsc::{channel, Sender};
use std::thread;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A single worker thread draining a job queue in submission order.
///
/// Every network owns one executor and submits all listener notifications and deferred state
/// transitions to it. Because the queue is drained by one thread in FIFO order, the events of
/// any one service reach each listener in generation order, and no user callback ever runs
/// while an internal lock is held. The worker exits once every handle to the executor is gone.
#[derive(Clone)]
pub(crate) struct Executor {
    queue: Sender<Job>,
}

impl Executor {
    /// Spawn the worker thread.
    pub(crate) fn new() -> Self {
        let (queue, jobs) = channel::<Job>();
        thread::spawn(move || {
            while let Ok(job) = jobs.recv() {
                job();
            }
            trace!("executor drained and shut down");
        });
        Self { queue }
    }

    /// Enqueue a job. Jobs run in submission order.
    pub(crate) fn submit<F: FnOnce() + Send + 'static>(&self, job: F) {
        if self.queue.send(Box::new(job)).is_err() {
            warn!("executor is gone; dropping job");
        }
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Executor")
    }
}
