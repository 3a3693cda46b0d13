// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process change bus.
//!
//! One `apply_writes` batch becomes exactly one `ChangeBatch` publication, so
//! every consumer (the subscription notifier, the integration router) sees a
//! caller's writes atomically and in order. Delivery is best-effort: a
//! consumer that falls behind sees `Lagged` and keeps going.

use tokio::sync::broadcast;

use crate::types::DeviceObject;

const BUS_CAPACITY: usize = 256;

/// A single publication: every object changed by one write batch, all for
/// the same serial.
#[derive(Debug, Clone)]
pub struct ChangeBatch {
    pub serial: String,
    pub objects: Vec<DeviceObject>,
}

/// Process-local publish channel for object mutations.
#[derive(Clone)]
pub struct ChangeBus {
    tx: broadcast::Sender<ChangeBatch>,
}

impl ChangeBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Publish a batch of changed objects for one serial.
    ///
    /// Callers must only publish objects that were actually written (stale
    /// upserts never reach the bus). Returns the number of live consumers.
    pub fn publish(&self, serial: &str, objects: Vec<DeviceObject>) -> usize {
        if objects.is_empty() {
            return 0;
        }
        match self.tx.send(ChangeBatch { serial: serial.to_owned(), objects }) {
            Ok(n) => n,
            Err(_) => {
                // No consumer registered; nothing to wake.
                0
            }
        }
    }

    /// Register a consumer. Each receiver observes batches in publish order.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeBatch> {
        self.tx.subscribe()
    }
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new()
    }
}
