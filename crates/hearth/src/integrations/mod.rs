// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Integration fan-out.
//!
//! Each integration owns a bounded mailbox and a worker task, so a slow or
//! failing integration can never block the change bus. Overflow drops the
//! oldest event and bumps a counter. Events for one serial reach one
//! integration in publication order (single worker per integration).

pub mod discovery;
pub mod mqtt;
pub mod topics;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::bus::ChangeBatch;
use crate::types::DeviceObject;

/// Mailbox depth per integration.
const MAILBOX_CAPACITY: usize = 256;

/// How long shutdown keeps draining queued events before aborting.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// An availability or state event delivered to integrations.
#[derive(Debug, Clone)]
pub enum IntegrationEvent {
    StateChange { serial: String, objects: Vec<DeviceObject> },
    Connected { serial: String },
    Disconnected { serial: String },
}

/// Capability set every integration implements. Failures are logged and
/// counted by the worker; they never propagate to publishers.
pub trait Integration: Send + 'static {
    fn name(&self) -> &'static str;

    fn init(&mut self) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
    fn shutdown(&mut self) -> impl std::future::Future<Output = ()> + Send;
    fn on_state_change(
        &mut self,
        serial: &str,
        objects: &[DeviceObject],
    ) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
    fn on_connected(&mut self, serial: &str)
        -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
    fn on_disconnected(
        &mut self,
        serial: &str,
    ) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

struct MailboxState {
    queue: VecDeque<IntegrationEvent>,
    dropped: u64,
}

/// Bounded drop-oldest mailbox.
struct Mailbox {
    state: Mutex<MailboxState>,
    wake: Notify,
}

impl Mailbox {
    fn new() -> Self {
        Self {
            state: Mutex::new(MailboxState { queue: VecDeque::new(), dropped: 0 }),
            wake: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MailboxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, event: IntegrationEvent) -> u64 {
        let dropped = {
            let mut state = self.lock();
            if state.queue.len() >= MAILBOX_CAPACITY {
                state.queue.pop_front();
                state.dropped += 1;
            }
            state.queue.push_back(event);
            state.dropped
        };
        self.wake.notify_one();
        dropped
    }

    fn try_pop(&self) -> Option<IntegrationEvent> {
        self.lock().queue.pop_front()
    }

    async fn recv(&self) -> IntegrationEvent {
        loop {
            if let Some(event) = self.try_pop() {
                return event;
            }
            self.wake.notified().await;
        }
    }
}

struct Sink {
    name: &'static str,
    mailbox: Arc<Mailbox>,
    failures: Arc<AtomicU64>,
}

/// Composes the configured integration set and owns their worker tasks.
pub struct IntegrationManager {
    sinks: Vec<Sink>,
    cancel: CancellationToken,
}

impl IntegrationManager {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { sinks: Vec::new(), cancel }
    }

    /// Register an integration and spawn its worker task.
    pub fn register<I: Integration>(&mut self, integration: I) {
        let name = integration.name();
        let mailbox = Arc::new(Mailbox::new());
        let failures = Arc::new(AtomicU64::new(0));
        spawn_worker(integration, Arc::clone(&mailbox), Arc::clone(&failures), self.cancel.clone());
        self.sinks.push(Sink { name, mailbox, failures });
        tracing::info!(integration = name, "integration registered");
    }

    /// Fire-and-forget enqueue to every integration mailbox.
    pub fn dispatch(&self, event: IntegrationEvent) {
        for sink in &self.sinks {
            let dropped = sink.mailbox.push(event.clone());
            if dropped > 0 && dropped.is_power_of_two() {
                tracing::warn!(
                    integration = sink.name,
                    dropped,
                    "integration mailbox overflow, oldest events dropped"
                );
            }
        }
    }

    /// Failure counters per integration (for the status endpoint).
    pub fn failure_counts(&self) -> Vec<(&'static str, u64)> {
        self.sinks
            .iter()
            .map(|s| (s.name, s.failures.load(Ordering::Relaxed)))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Consume the change bus and route state changes into the mailboxes.
    pub fn spawn_router(
        self: &Arc<Self>,
        mut rx: tokio::sync::broadcast::Receiver<ChangeBatch>,
    ) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        let cancel = manager.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    batch = rx.recv() => match batch {
                        Ok(batch) => manager.dispatch(IntegrationEvent::StateChange {
                            serial: batch.serial,
                            objects: batch.objects,
                        }),
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                            tracing::warn!(missed, "integration router lagged behind change bus");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        })
    }
}

async fn deliver<I: Integration>(
    integration: &mut I,
    event: IntegrationEvent,
    failures: &AtomicU64,
) {
    let result = match &event {
        IntegrationEvent::StateChange { serial, objects } => {
            integration.on_state_change(serial, objects).await
        }
        IntegrationEvent::Connected { serial } => integration.on_connected(serial).await,
        IntegrationEvent::Disconnected { serial } => integration.on_disconnected(serial).await,
    };
    if let Err(e) = result {
        failures.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(integration = integration.name(), err = %e, "integration event failed");
    }
}

fn spawn_worker<I: Integration>(
    mut integration: I,
    mailbox: Arc<Mailbox>,
    failures: Arc<AtomicU64>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        if let Err(e) = integration.init().await {
            tracing::error!(integration = integration.name(), err = %e, "integration init failed");
            return;
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = mailbox.recv() => deliver(&mut integration, event, &failures).await,
            }
        }

        // Drain what is already queued, bounded, then shut down.
        let drain = async {
            while let Some(event) = mailbox.try_pop() {
                deliver(&mut integration, event, &failures).await;
            }
        };
        if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
            tracing::warn!(
                integration = integration.name(),
                "integration drain deadline hit, aborting remaining events"
            );
        }
        integration.shutdown().await;
        tracing::info!(integration = integration.name(), "integration stopped");
    });
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
