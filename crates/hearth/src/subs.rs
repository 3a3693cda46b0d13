// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Long-poll subscription manager.
//!
//! A subscription binds a serial, a watched-keys map, and a single-slot
//! delivery channel. The transport layer holds the HTTP connection open and
//! waits on the slot; `notify` fills it with the minimal delta and the
//! transport wakes, responds, and closes. Subscriptions are keyed by a
//! server-minted id — devices reuse their own session identifier across
//! overlapping requests, so it is recorded only as a diagnostic label.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::bus::ChangeBatch;
use crate::config::RESUBSCRIBE_WINDOW;
use crate::error::HearthError;
use crate::types::DeviceObject;

/// Single-slot delivery channel with merge-on-full semantics.
///
/// Capacity is one batch; a second enqueue before the waiter wakes is merged
/// in, keeping the highest revision per object key. This bounds memory per
/// subscriber without losing the delta contract.
struct NotifySlot {
    pending: Mutex<Option<Vec<DeviceObject>>>,
    wake: Notify,
}

impl NotifySlot {
    fn new() -> Self {
        Self { pending: Mutex::new(None), wake: Notify::new() }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Vec<DeviceObject>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Non-blocking enqueue; merges into any batch already pending.
    fn push(&self, delta: Vec<DeviceObject>) {
        {
            let mut slot = self.lock();
            match slot.as_mut() {
                Some(pending) => merge_batches(pending, delta),
                None => *slot = Some(delta),
            }
        }
        self.wake.notify_one();
    }

    fn take(&self) -> Option<Vec<DeviceObject>> {
        self.lock().take()
    }
}

/// Union two delta batches, keeping the highest-revision entry per key.
fn merge_batches(pending: &mut Vec<DeviceObject>, incoming: Vec<DeviceObject>) {
    for obj in incoming {
        match pending.iter_mut().find(|p| p.object_key == obj.object_key) {
            Some(existing) => {
                if obj.object_revision > existing.object_revision {
                    *existing = obj;
                }
            }
            None => pending.push(obj),
        }
    }
}

/// A live long-poll registration.
pub struct Subscription {
    pub id: u64,
    pub serial: String,
    /// Device-supplied session id; diagnostics only, never a key.
    pub device_session: Option<String>,
    /// `object_key -> last revision the subscriber is known to hold`.
    pub watched: HashMap<String, i64>,
    pub created_at: Instant,
    slot: NotifySlot,
}

/// Why `wait` returned.
#[derive(Debug)]
pub enum WaitOutcome {
    /// The delta batch; delivery closes the subscription.
    Delivered(Vec<DeviceObject>),
    /// The hold deadline elapsed with nothing to send.
    TimedOut,
}

struct Registry {
    by_serial: HashMap<String, HashMap<u64, Arc<Subscription>>>,
    /// When the most recent subscription for a serial ended; drives the
    /// re-subscribe heuristic.
    last_ended: HashMap<String, Instant>,
    next_id: u64,
}

/// Snapshot of live-subscription counters.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct SubscriptionStats {
    pub total_subscriptions: usize,
    pub devices_with_subscriptions: usize,
}

/// Tracks live long-poll waiters and routes change batches to them.
pub struct SubscriptionManager {
    inner: Mutex<Registry>,
    max_per_device: usize,
}

impl SubscriptionManager {
    pub fn new(max_per_device: usize) -> Self {
        Self {
            inner: Mutex::new(Registry {
                by_serial: HashMap::new(),
                last_ended: HashMap::new(),
                next_id: 1,
            }),
            max_per_device,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new subscription.
    ///
    /// Fails with `Overflow` once the per-device cap is reached; the existing
    /// registrations are left untouched.
    pub fn subscribe(
        self: &Arc<Self>,
        serial: &str,
        device_session: Option<String>,
        watched: HashMap<String, i64>,
    ) -> Result<SubscriptionHandle, HearthError> {
        let sub = {
            let mut inner = self.lock();
            if inner.by_serial.get(serial).map_or(0, HashMap::len) >= self.max_per_device {
                tracing::warn!(
                    serial = %serial,
                    cap = self.max_per_device,
                    "subscription cap reached"
                );
                return Err(HearthError::Overflow);
            }

            let id = inner.next_id;
            inner.next_id += 1;
            let sub = Arc::new(Subscription {
                id,
                serial: serial.to_owned(),
                device_session,
                watched,
                created_at: Instant::now(),
                slot: NotifySlot::new(),
            });
            inner.by_serial.entry(serial.to_owned()).or_default().insert(id, Arc::clone(&sub));
            sub
        };

        tracing::debug!(serial = %serial, sub_id = sub.id, "subscription registered");
        Ok(SubscriptionHandle { sub, manager: Arc::clone(self), live: true })
    }

    /// Remove a subscription and stamp the re-subscribe window. Idempotent.
    fn remove(&self, sub: &Subscription) {
        let mut inner = self.lock();
        let mut removed = false;
        if let Some(device_subs) = inner.by_serial.get_mut(&sub.serial) {
            removed = device_subs.remove(&sub.id).is_some();
            if device_subs.is_empty() {
                inner.by_serial.remove(&sub.serial);
            }
        }
        if removed {
            inner.last_ended.insert(sub.serial.clone(), Instant::now());
            tracing::debug!(serial = %sub.serial, sub_id = sub.id, "subscription removed");
        }
    }

    /// Enqueue the per-subscriber delta of `batch` for every live waiter on
    /// `serial`. Returns the number of waiters that received a non-empty
    /// delta. Holds the registry lock only to snapshot and enqueue; the
    /// enqueue itself never blocks.
    pub fn notify(&self, serial: &str, batch: &[DeviceObject]) -> usize {
        if batch.is_empty() {
            return 0;
        }

        let inner = self.lock();
        let Some(device_subs) = inner.by_serial.get(serial) else { return 0 };

        let mut enqueued = 0;
        for sub in device_subs.values() {
            let delta: Vec<DeviceObject> = batch
                .iter()
                .filter(|obj| {
                    sub.watched
                        .get(&obj.object_key)
                        .is_some_and(|last| obj.object_revision > *last)
                })
                .cloned()
                .collect();
            if !delta.is_empty() {
                sub.slot.push(delta);
                enqueued += 1;
            }
        }
        enqueued
    }

    /// Whether a new subscribe for `serial` falls inside the re-subscribe
    /// window, i.e. the device is in its normal observe cycle rather than
    /// connecting fresh.
    pub fn is_resubscribe(&self, serial: &str) -> bool {
        self.lock()
            .last_ended
            .get(serial)
            .is_some_and(|ended| ended.elapsed() < RESUBSCRIBE_WINDOW)
    }

    /// Whether any live subscription exists for `serial` (used as heartbeat
    /// by the availability watchdog).
    pub fn has_live_subscription(&self, serial: &str) -> bool {
        self.lock().by_serial.get(serial).is_some_and(|subs| !subs.is_empty())
    }

    pub fn count_for(&self, serial: &str) -> usize {
        self.lock().by_serial.get(serial).map_or(0, HashMap::len)
    }

    pub fn stats(&self) -> SubscriptionStats {
        let inner = self.lock();
        SubscriptionStats {
            total_subscriptions: inner.by_serial.values().map(HashMap::len).sum(),
            devices_with_subscriptions: inner.by_serial.len(),
        }
    }
}

/// Owning handle for a registered subscription.
///
/// Exit from `wait` removes the registration; dropping the handle without
/// waiting (client closed the connection) removes it too, so every exit path
/// lands in the same place and double delivery is impossible.
pub struct SubscriptionHandle {
    sub: Arc<Subscription>,
    manager: Arc<SubscriptionManager>,
    live: bool,
}

impl SubscriptionHandle {
    pub fn subscription(&self) -> &Subscription {
        &self.sub
    }

    /// Block until a delta batch arrives or `hold` elapses.
    pub async fn wait(mut self, hold: Duration) -> WaitOutcome {
        let deadline = tokio::time::sleep(hold);
        tokio::pin!(deadline);

        loop {
            if let Some(batch) = self.sub.slot.take() {
                self.finish();
                return WaitOutcome::Delivered(batch);
            }
            tokio::select! {
                _ = self.sub.slot.wake.notified() => {}
                _ = &mut deadline => {
                    // A batch may have landed in the same tick the deadline
                    // fired; delivery wins over the tickle.
                    let outcome = match self.sub.slot.take() {
                        Some(batch) => WaitOutcome::Delivered(batch),
                        None => WaitOutcome::TimedOut,
                    };
                    self.finish();
                    return outcome;
                }
            }
        }
    }

    fn finish(&mut self) {
        if self.live {
            self.live = false;
            self.manager.remove(&self.sub);
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Consume the change bus and fan batches out to matching waiters.
pub fn spawn_notifier(
    manager: Arc<SubscriptionManager>,
    mut rx: tokio::sync::broadcast::Receiver<ChangeBatch>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                batch = rx.recv() => match batch {
                    Ok(batch) => {
                        manager.notify(&batch.serial, &batch.objects);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "subscription notifier lagged behind change bus");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    })
}

#[cfg(test)]
#[path = "subs_tests.rs"]
mod tests;
