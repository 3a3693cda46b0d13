// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device availability watchdog.
//!
//! Long-poll traffic is the heartbeat: any transport contact marks a device
//! seen, a live subscription counts as continuous contact, and silence past
//! the timeout flips the device unavailable. Transitions are reported to
//! integrations exactly on edges.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::HearthConfig;
use crate::integrations::{IntegrationEvent, IntegrationManager};
use crate::subs::SubscriptionManager;
use crate::types::epoch_ms;

/// Tracking data for one device.
#[derive(Debug, Clone)]
struct DeviceStatus {
    last_seen: Instant,
    last_seen_ms: i64,
    available: bool,
}

/// Externally visible status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub available: bool,
    pub last_seen_ms: i64,
}

pub struct AvailabilityWatchdog {
    devices: Mutex<HashMap<String, DeviceStatus>>,
    subs: Arc<SubscriptionManager>,
    integrations: Arc<IntegrationManager>,
    timeout: std::time::Duration,
    check_interval: std::time::Duration,
}

impl AvailabilityWatchdog {
    pub fn new(
        config: &HearthConfig,
        subs: Arc<SubscriptionManager>,
        integrations: Arc<IntegrationManager>,
    ) -> Self {
        Self {
            devices: Mutex::new(HashMap::new()),
            subs,
            integrations,
            timeout: config.availability_timeout(),
            check_interval: config.availability_check_interval(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, DeviceStatus>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed tracking for serials already known from storage. They start
    /// available; the sweep loop demotes the ones that stay silent.
    pub fn track_known(&self, serials: &[String]) {
        let mut devices = self.lock();
        let now = Instant::now();
        let now_ms = epoch_ms();
        for serial in serials {
            devices.entry(serial.clone()).or_insert(DeviceStatus {
                last_seen: now,
                last_seen_ms: now_ms,
                available: true,
            });
        }
        if !serials.is_empty() {
            tracing::info!(count = serials.len(), "seeded availability tracking");
        }
    }

    /// Record device contact. Emits a `connected` edge when the device was
    /// untracked or previously unavailable; repeated contact is silent.
    pub fn mark_seen(&self, serial: &str) {
        let edge = {
            let mut devices = self.lock();
            match devices.get_mut(serial) {
                Some(status) => {
                    status.last_seen = Instant::now();
                    status.last_seen_ms = epoch_ms();
                    let came_back = !status.available;
                    status.available = true;
                    came_back
                }
                None => {
                    devices.insert(
                        serial.to_owned(),
                        DeviceStatus {
                            last_seen: Instant::now(),
                            last_seen_ms: epoch_ms(),
                            available: true,
                        },
                    );
                    true
                }
            }
        };

        if edge {
            tracing::info!(serial = %serial, "device available");
            self.integrations.dispatch(IntegrationEvent::Connected { serial: serial.to_owned() });
        }
    }

    pub fn is_available(&self, serial: &str) -> bool {
        self.lock().get(serial).is_some_and(|s| s.available)
    }

    pub fn get_status(&self) -> HashMap<String, StatusSnapshot> {
        self.lock()
            .iter()
            .map(|(serial, s)| {
                (
                    serial.clone(),
                    StatusSnapshot { available: s.available, last_seen_ms: s.last_seen_ms },
                )
            })
            .collect()
    }

    /// One sweep: live subscriptions refresh `last_seen`, silent devices past
    /// the timeout flip unavailable (edge-only).
    fn sweep(&self) {
        let serials: Vec<String> = self.lock().keys().cloned().collect();

        for serial in serials {
            if self.subs.has_live_subscription(&serial) {
                self.mark_seen(&serial);
                continue;
            }

            let timed_out = {
                let mut devices = self.lock();
                match devices.get_mut(&serial) {
                    Some(status) if status.available && status.last_seen.elapsed() > self.timeout => {
                        status.available = false;
                        true
                    }
                    _ => false,
                }
            };
            if timed_out {
                tracing::warn!(serial = %serial, "device unavailable (timeout)");
                self.integrations.dispatch(IntegrationEvent::Disconnected { serial });
            }
        }
    }

    /// Run the periodic sweep until cancelled.
    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let watchdog = Arc::clone(self);
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(watchdog.check_interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The immediate first tick would sweep before anything is seen.
            timer.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = timer.tick() => watchdog.sweep(),
                }
            }
            tracing::debug!("availability watchdog stopped");
        })
    }
}

#[cfg(test)]
#[path = "availability_tests.rs"]
mod tests;
