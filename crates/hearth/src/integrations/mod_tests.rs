// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{Integration, IntegrationEvent, IntegrationManager, Mailbox};
use crate::types::DeviceObject;

struct Recorder {
    events: Arc<Mutex<Vec<String>>>,
    fail_connected: bool,
}

impl Recorder {
    fn new(events: Arc<Mutex<Vec<String>>>) -> Self {
        Self { events, fail_connected: false }
    }
}

impl Integration for Recorder {
    fn name(&self) -> &'static str {
        "recorder"
    }

    async fn init(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn shutdown(&mut self) {}

    async fn on_state_change(
        &mut self,
        serial: &str,
        objects: &[DeviceObject],
    ) -> anyhow::Result<()> {
        self.events.lock().expect("lock").push(format!("state:{serial}:{}", objects.len()));
        Ok(())
    }

    async fn on_connected(&mut self, serial: &str) -> anyhow::Result<()> {
        if self.fail_connected {
            anyhow::bail!("broker unreachable");
        }
        self.events.lock().expect("lock").push(format!("connected:{serial}"));
        Ok(())
    }

    async fn on_disconnected(&mut self, serial: &str) -> anyhow::Result<()> {
        self.events.lock().expect("lock").push(format!("disconnected:{serial}"));
        Ok(())
    }
}

async fn wait_for_events(events: &Arc<Mutex<Vec<String>>>, expected: usize) -> Vec<String> {
    for _ in 0..100 {
        {
            let seen = events.lock().expect("lock");
            if seen.len() >= expected {
                return seen.clone();
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    events.lock().expect("lock").clone()
}

fn state_event(serial: &str, count: usize) -> IntegrationEvent {
    let objects = (0..count)
        .map(|i| DeviceObject {
            serial: serial.to_owned(),
            object_key: format!("device.{serial}"),
            object_revision: i as i64 + 1,
            object_timestamp: 0,
            value: serde_json::Value::Null,
            updated_at: 0,
        })
        .collect();
    IntegrationEvent::StateChange { serial: serial.to_owned(), objects }
}

#[tokio::test]
async fn events_for_one_serial_arrive_in_publication_order() {
    let cancel = CancellationToken::new();
    let events = Arc::new(Mutex::new(Vec::new()));
    let mut manager = IntegrationManager::new(cancel.clone());
    manager.register(Recorder::new(Arc::clone(&events)));

    manager.dispatch(IntegrationEvent::Connected { serial: "AAA".into() });
    manager.dispatch(state_event("AAA", 1));
    manager.dispatch(state_event("AAA", 2));
    manager.dispatch(IntegrationEvent::Disconnected { serial: "AAA".into() });

    let seen = wait_for_events(&events, 4).await;
    assert_eq!(
        seen,
        vec![
            "connected:AAA".to_owned(),
            "state:AAA:1".to_owned(),
            "state:AAA:2".to_owned(),
            "disconnected:AAA".to_owned(),
        ]
    );
    cancel.cancel();
}

#[tokio::test]
async fn failures_are_counted_and_do_not_stop_the_worker() {
    let cancel = CancellationToken::new();
    let events = Arc::new(Mutex::new(Vec::new()));
    let mut manager = IntegrationManager::new(cancel.clone());
    let mut recorder = Recorder::new(Arc::clone(&events));
    recorder.fail_connected = true;
    manager.register(recorder);

    manager.dispatch(IntegrationEvent::Connected { serial: "AAA".into() });
    manager.dispatch(IntegrationEvent::Disconnected { serial: "AAA".into() });

    let seen = wait_for_events(&events, 1).await;
    assert_eq!(seen, vec!["disconnected:AAA".to_owned()]);

    // The failed event is visible on the counter.
    for _ in 0..100 {
        if manager.failure_counts()[0].1 == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(manager.failure_counts(), vec![("recorder", 1)]);
    cancel.cancel();
}

#[tokio::test]
async fn mailbox_overflow_drops_oldest() {
    let mailbox = Mailbox::new();
    for i in 0..(super::MAILBOX_CAPACITY + 3) {
        mailbox.push(IntegrationEvent::Connected { serial: format!("S{i}") });
    }

    // Three events were dropped from the front.
    let first = mailbox.try_pop().expect("event");
    match first {
        IntegrationEvent::Connected { serial } => assert_eq!(serial, "S3"),
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(mailbox.lock().dropped, 3);
}

#[tokio::test]
async fn dispatch_without_integrations_is_a_no_op() {
    let manager = IntegrationManager::new(CancellationToken::new());
    assert!(manager.is_empty());
    manager.dispatch(IntegrationEvent::Connected { serial: "AAA".into() });
}
