// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end tests for the device long-poll transport.
//!
//! Uses `axum_test::TestServer` — no real TCP needed. `suspend_time_max` is
//! set to 1 s so the hold ceiling is 800 ms and tickle timing is testable.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum_test::TestServer;
use clap::Parser;
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use hearth::config::HearthConfig;
use hearth::service::WriteRequest;
use hearth::transport::device_router;
use hearth::{build_state, spawn_background, AppState};

async fn test_state(suspend_time_max: u64) -> (TempDir, Arc<AppState>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = HearthConfig::parse_from(["hearthd"]);
    config.sqlite3_db_path = dir.path().join("test.sqlite");
    config.suspend_time_max = suspend_time_max;

    let state = build_state(config, CancellationToken::new()).await.expect("build state");
    spawn_background(&state);
    (dir, state)
}

fn test_server(state: &Arc<AppState>) -> TestServer {
    TestServer::new(device_router(Arc::clone(state))).expect("failed to create test server")
}

fn write(object_key: &str, value: serde_json::Value) -> WriteRequest {
    WriteRequest { object_key: object_key.to_owned(), value, client_revision: None }
}

fn observe_body(entries: &[(&str, i64)]) -> serde_json::Value {
    let objects: Vec<_> = entries
        .iter()
        .map(|(key, revision)| json!({"object_key": key, "object_revision": revision}))
        .collect();
    json!({ "objects": objects, "session": "device-session-1" })
}

/// E1: stored revision is ahead of the declared one — answer immediately.
#[tokio::test]
async fn observe_behind_revision_answers_immediately() {
    let (_dir, state) = test_state(1).await;
    state
        .service
        .apply_writes(
            "AAA",
            vec![WriteRequest {
                object_key: "device.AAA".into(),
                value: json!({"temp": 20.0}),
                client_revision: Some(4),
            }],
        )
        .await
        .expect("seed write");

    let server = test_server(&state);
    let started = Instant::now();
    let resp = server
        .post("/nest/transport/v5/subscribe")
        .json(&observe_body(&[("device.AAA", 4)]))
        .await;
    resp.assert_status_ok();
    assert!(started.elapsed() < Duration::from_millis(500), "fast path took the long way");

    let body: serde_json::Value = resp.json();
    assert_eq!(body["objects"].as_array().map(Vec::len), Some(1));
    assert_eq!(body["objects"][0]["object_revision"], json!(5));
    assert_eq!(body["objects"][0]["object_key"], json!("device.AAA"));
}

/// E2: nothing newer — hold for ~0.8 × suspend_time_max, then tickle.
#[tokio::test]
async fn observe_with_current_revision_tickles_after_hold() {
    let (_dir, state) = test_state(1).await;
    state
        .service
        .apply_writes(
            "AAA",
            vec![WriteRequest {
                object_key: "device.AAA".into(),
                value: json!({"temp": 20.0}),
                client_revision: Some(4),
            }],
        )
        .await
        .expect("seed write");

    let server = test_server(&state);
    let started = Instant::now();
    let resp = server
        .post("/nest/transport/v5/subscribe")
        .json(&observe_body(&[("device.AAA", 5)]))
        .await;
    let elapsed = started.elapsed();

    resp.assert_status_ok();
    assert_eq!(resp.text(), r#"{"objects":[]}"#);
    assert!(elapsed >= Duration::from_millis(700), "released early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "hold overshot: {elapsed:?}");
}

/// E3: a write during the hold releases promptly with only the watched key.
#[tokio::test]
async fn write_during_hold_delivers_watched_delta_only() {
    let (_dir, state) = test_state(60).await;
    state
        .service
        .apply_writes(
            "AAA",
            vec![WriteRequest {
                object_key: "device.AAA".into(),
                value: json!({"temp": 20.0}),
                client_revision: Some(4),
            }],
        )
        .await
        .expect("seed write");

    let observer = test_server(&state);
    let request = tokio::spawn(async move {
        observer
            .post("/nest/transport/v5/subscribe")
            .json(&observe_body(&[("device.AAA", 5)]))
            .await
    });

    // Let the long-poll register, then mutate both objects.
    for _ in 0..100 {
        if state.subs.count_for("AAA") == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(state.subs.count_for("AAA"), 1, "subscription never registered");

    let started = Instant::now();
    state
        .service
        .apply_writes(
            "AAA",
            vec![
                write("device.AAA", json!({"temp": 21.0})),
                write("shared.AAA", json!({"target_temperature": 21.0})),
            ],
        )
        .await
        .expect("write during hold");

    let resp = request.await.expect("request task");
    resp.assert_status_ok();
    assert!(started.elapsed() < Duration::from_secs(2), "wake was not prompt");

    let body: serde_json::Value = resp.json();
    let objects = body["objects"].as_array().expect("objects");
    assert_eq!(objects.len(), 1, "unwatched shared.AAA leaked into the delta");
    assert_eq!(objects[0]["object_key"], json!("device.AAA"));
    assert_eq!(objects[0]["object_revision"], json!(6));
}

/// E4: the 101st concurrent observe is rejected; the first 100 all deliver.
#[tokio::test]
async fn cap_rejects_the_101st_and_keeps_the_rest() {
    let (_dir, state) = test_state(60).await;
    state
        .service
        .apply_writes("BBB", vec![write("shared.BBB", json!({"target_temperature": 20.0}))])
        .await
        .expect("seed write");

    let mut held = Vec::new();
    for _ in 0..100 {
        let server = test_server(&state);
        held.push(tokio::spawn(async move {
            server
                .post("/nest/transport/v5/subscribe")
                .json(&observe_body(&[("shared.BBB", 1)]))
                .await
        }));
    }

    for _ in 0..200 {
        if state.subs.count_for("BBB") == 100 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(state.subs.count_for("BBB"), 100, "not all observes registered");

    let overflow_server = test_server(&state);
    let overflow = overflow_server
        .post("/nest/transport/v5/subscribe")
        .json(&observe_body(&[("shared.BBB", 1)]))
        .await;
    overflow.assert_status(axum::http::StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(state.subs.count_for("BBB"), 100, "overflow disturbed live waiters");

    state
        .service
        .apply_writes("BBB", vec![write("shared.BBB", json!({"target_temperature": 21.0}))])
        .await
        .expect("release write");

    for task in held {
        let resp = task.await.expect("observe task");
        resp.assert_status_ok();
        let body: serde_json::Value = resp.json();
        assert_eq!(body["objects"][0]["object_key"], json!("shared.BBB"));
        assert_eq!(body["objects"][0]["object_revision"], json!(2));
    }
}

/// Property 8: field order on the wire is exactly
/// `object_revision, object_timestamp, object_key, value`, without `serial`.
#[tokio::test]
async fn observe_response_preserves_field_order() {
    let (_dir, state) = test_state(1).await;
    state
        .service
        .apply_writes("AAA", vec![write("device.AAA", json!({"temp": 20.0}))])
        .await
        .expect("seed write");

    let server = test_server(&state);
    let resp = server
        .post("/nest/transport/v5/subscribe")
        .json(&observe_body(&[("device.AAA", 0)]))
        .await;
    resp.assert_status_ok();

    let text = resp.text();
    let rev = text.find("\"object_revision\"").expect("revision field");
    let ts = text.find("\"object_timestamp\"").expect("timestamp field");
    let key = text.find("\"object_key\"").expect("key field");
    let value = text.find("\"value\"").expect("value field");
    assert!(rev < ts && ts < key && key < value, "field order drifted: {text}");
    assert!(!text.contains("\"serial\""), "serial must not appear on the wire: {text}");
}

/// A re-observe right after a poll cycle holds open even when the store is
/// ahead of the declared revisions.
#[tokio::test]
async fn resubscribe_holds_instead_of_replaying_current_state() {
    let (_dir, state) = test_state(1).await;
    state
        .service
        .apply_writes("AAA", vec![write("device.AAA", json!({"temp": 20.0}))])
        .await
        .expect("seed write");

    let server = test_server(&state);

    // First cycle: ends with a tickle, stamping the re-subscribe window.
    let resp = server
        .post("/nest/transport/v5/subscribe")
        .json(&observe_body(&[("device.AAA", 1)]))
        .await;
    resp.assert_status_ok();

    // Second cycle starts within the window with a stale declared revision;
    // the fast path must not fire.
    let started = Instant::now();
    let resp = server
        .post("/nest/transport/v5/subscribe")
        .json(&observe_body(&[("device.AAA", 0)]))
        .await;
    resp.assert_status_ok();
    assert_eq!(resp.text(), r#"{"objects":[]}"#);
    assert!(started.elapsed() >= Duration::from_millis(700), "resubscribe answered immediately");
}

#[tokio::test]
async fn malformed_observe_body_is_rejected_without_registering() {
    let (_dir, state) = test_state(1).await;
    let server = test_server(&state);

    let resp = server.post("/nest/transport/v5/subscribe").text("{not json").await;
    resp.assert_status(axum::http::StatusCode::BAD_REQUEST);

    let resp = server.post("/nest/transport/v5/subscribe").json(&json!({"objects": []})).await;
    resp.assert_status(axum::http::StatusCode::BAD_REQUEST);

    assert_eq!(state.subs.stats().total_subscriptions, 0);
}

/// Observe traffic doubles as the availability heartbeat.
#[tokio::test]
async fn observe_marks_the_device_available() {
    let (_dir, state) = test_state(1).await;
    state
        .service
        .apply_writes("AAA", vec![write("device.AAA", json!({"temp": 20.0}))])
        .await
        .expect("seed write");

    assert!(!state.availability.is_available("AAA"));
    let server = test_server(&state);
    server
        .post("/nest/transport/v5/subscribe")
        .json(&observe_body(&[("device.AAA", 0)]))
        .await
        .assert_status_ok();
    assert!(state.availability.is_available("AAA"));
}

/// Device-side put goes through the facade and wakes matching observers.
#[tokio::test]
async fn device_put_releases_a_held_observe() {
    let (_dir, state) = test_state(60).await;
    state
        .service
        .apply_writes("AAA", vec![write("shared.AAA", json!({"target_temperature": 20.0}))])
        .await
        .expect("seed write");

    let observer = test_server(&state);
    let request = tokio::spawn(async move {
        observer
            .post("/nest/transport/v5/subscribe")
            .json(&observe_body(&[("shared.AAA", 1)]))
            .await
    });
    for _ in 0..100 {
        if state.subs.count_for("AAA") == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let writer = test_server(&state);
    let put = writer
        .post("/nest/transport/v5/put")
        .json(&json!({
            "objects": [{"object_key": "shared.AAA", "value": {"target_temperature": 22.0}}],
            "session": "device-session-1",
        }))
        .await;
    put.assert_status_ok();

    let resp = request.await.expect("observe task");
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["objects"][0]["object_key"], json!("shared.AAA"));
    assert_eq!(body["objects"][0]["object_revision"], json!(2));
    assert_eq!(body["objects"][0]["value"]["target_temperature"], json!(22.0));
}
