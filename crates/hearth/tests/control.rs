// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Integration tests for the control API.

use std::sync::Arc;

use axum_test::TestServer;
use clap::Parser;
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use hearth::config::HearthConfig;
use hearth::transport::{control_router, device_router};
use hearth::{build_state, spawn_background, AppState};

async fn test_state() -> (TempDir, Arc<AppState>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = HearthConfig::parse_from(["hearthd"]);
    config.sqlite3_db_path = dir.path().join("test.sqlite");
    config.suspend_time_max = 1;

    let state = build_state(config, CancellationToken::new()).await.expect("build state");
    spawn_background(&state);
    (dir, state)
}

fn control_server(state: &Arc<AppState>) -> TestServer {
    TestServer::new(control_router(Arc::clone(state))).expect("failed to create test server")
}

#[tokio::test]
async fn health_is_open_and_reports_subscriptions() {
    let (_dir, state) = test_state().await;
    let server = control_server(&state);

    let resp = server.get("/api/v1/health").await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["status"], "running");
    assert_eq!(body["subscriptions"]["total_subscriptions"], json!(0));
}

#[tokio::test]
async fn bootstrap_admits_until_the_first_key_is_minted() {
    let (_dir, state) = test_state().await;
    let server = control_server(&state);

    // No keys yet: admitted as local-admin.
    server.get("/api/v1/devices").await.assert_status_ok();

    let minted = server.post("/api/v1/keys").json(&json!({"name": "dashboard"})).await;
    minted.assert_status_ok();
    let body: serde_json::Value = minted.json();
    let secret = body["secret"].as_str().expect("secret").to_owned();
    assert!(secret.starts_with("hk_"));

    // The hole is closed.
    server
        .get("/api/v1/devices")
        .await
        .assert_status(axum::http::StatusCode::UNAUTHORIZED);

    // The minted key works and lists itself.
    let resp = server
        .get("/api/v1/keys")
        .authorization_bearer(&secret)
        .await;
    resp.assert_status_ok();
    let keys: serde_json::Value = resp.json();
    assert_eq!(keys.as_array().map(Vec::len), Some(1));
    assert!(keys[0]["last_used_at"].is_i64(), "validation must stamp last_used_at");
}

#[tokio::test]
async fn control_writes_funnel_through_the_facade() {
    let (_dir, state) = test_state().await;
    let server = control_server(&state);

    let resp = server
        .post("/api/v1/devices/AAA/objects")
        .json(&json!({"writes": [
            {"object_key": "shared.AAA", "value": {"target_temperature": 21.0}},
        ]}))
        .await;
    resp.assert_status_ok();
    let applied: serde_json::Value = resp.json();
    assert_eq!(applied[0]["object_revision"], json!(1));

    let fetched = server.get("/api/v1/devices/AAA/objects/shared.AAA").await;
    fetched.assert_status_ok();
    let body: serde_json::Value = fetched.json();
    assert_eq!(body["value"]["target_temperature"], json!(21.0));
}

/// E5: an out-of-bounds target temperature rejects the batch with 409.
#[tokio::test]
async fn unsafe_temperature_write_is_rejected() {
    let (_dir, state) = test_state().await;
    let server = control_server(&state);
    let mut bus = state.bus.subscribe();

    let resp = server
        .post("/api/v1/devices/AAA/objects")
        .json(&json!({"writes": [
            {"object_key": "shared.AAA", "value": {"target_temperature": 45.0}},
        ]}))
        .await;
    resp.assert_status(axum::http::StatusCode::CONFLICT);

    let missing = server.get("/api/v1/devices/AAA/objects/shared.AAA").await;
    missing.assert_status(axum::http::StatusCode::NOT_FOUND);
    assert!(bus.try_recv().is_err(), "rejected write must not publish");
}

#[tokio::test]
async fn pairing_claim_binds_device_and_assigns_structure() {
    let (_dir, state) = test_state().await;
    let control = control_server(&state);
    let device = TestServer::new(device_router(Arc::clone(&state))).expect("device server");

    // The device asks for a pairing code.
    let resp = device.get("/nest/passphrase").add_query_param("serial", "AAA").await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    let code = body["value"].as_str().expect("code").to_owned();
    assert!(body["expires"].is_i64());

    // A user claims it on the control surface.
    let claimed = control.post("/api/v1/pairing/claim").json(&json!({"code": code})).await;
    claimed.assert_status_ok();
    let claim: serde_json::Value = claimed.json();
    assert_eq!(claim["serial"], json!("AAA"));
    let structure_id = claim["structure_id"].as_str().expect("structure").to_owned();

    // The device object carries the structure now.
    let obj = control.get("/api/v1/devices/AAA/objects/device.AAA").await;
    obj.assert_status_ok();
    let body: serde_json::Value = obj.json();
    assert_eq!(body["value"]["structure_id"], json!(structure_id));

    // Codes are single-use.
    let again = control.post("/api/v1/pairing/claim").json(&json!({"code": code})).await;
    again.assert_status(axum::http::StatusCode::NOT_FOUND);

    // The owner shows up on the device list.
    let devices = control.get("/api/v1/devices").await;
    devices.assert_status_ok();
    let list: serde_json::Value = devices.json();
    assert_eq!(list[0]["serial"], json!("AAA"));
    assert_eq!(list[0]["owner"], json!("local-admin"));
}

#[tokio::test]
async fn share_invite_accept_grants_access() {
    let (_dir, state) = test_state().await;
    let server = control_server(&state);

    // Pair a device to local-admin (bootstrap identity).
    let key = state.store.generate_entry_key("AAA", 60).await.expect("entry key");
    server
        .post("/api/v1/pairing/claim")
        .json(&json!({"code": key.code}))
        .await
        .assert_status_ok();

    let invited = server
        .post("/api/v1/shares/invites")
        .json(&json!({"email": "roommate@example.com", "serial": "AAA"}))
        .await;
    invited.assert_status_ok();
    let invite: serde_json::Value = invited.json();
    let token = invite["invite_token"].as_str().expect("token").to_owned();

    // A second user (their own API key) accepts.
    let (_, secret) =
        state.store.create_api_key("roommate", "phone", None).await.expect("mint key");
    let accepted = server
        .post(&format!("/api/v1/shares/invites/{token}/accept"))
        .authorization_bearer(&secret)
        .await;
    accepted.assert_status_ok();
    let share: serde_json::Value = accepted.json();
    assert_eq!(share["serial"], json!("AAA"));
    assert_eq!(share["shared_with_user_id"], json!("roommate"));

    let shares = server.get("/api/v1/shares").authorization_bearer(&secret).await;
    shares.assert_status_ok();
    let list: serde_json::Value = shares.json();
    assert_eq!(list.as_array().map(Vec::len), Some(1));

    // The share grants the roommate read access to the device itself.
    let objects = server
        .get("/api/v1/devices/AAA/objects")
        .authorization_bearer(&secret)
        .await;
    objects.assert_status_ok();
}

#[tokio::test]
async fn non_owner_is_rejected_from_device_endpoints() {
    let (_dir, state) = test_state().await;
    let server = control_server(&state);

    // Pair AAA to local-admin while the bootstrap window is open, and give
    // it some state.
    let key = state.store.generate_entry_key("AAA", 60).await.expect("entry key");
    server
        .post("/api/v1/pairing/claim")
        .json(&json!({"code": key.code}))
        .await
        .assert_status_ok();
    server
        .post("/api/v1/devices/AAA/objects")
        .json(&json!({"writes": [
            {"object_key": "shared.AAA", "value": {"target_temperature": 20.0}},
        ]}))
        .await
        .assert_status_ok();

    // A second user with a valid key of their own owns nothing on AAA.
    let (_, secret) =
        state.store.create_api_key("intruder", "phone", None).await.expect("mint key");
    let unauthorized = axum::http::StatusCode::UNAUTHORIZED;

    server
        .get("/api/v1/devices/AAA/objects")
        .authorization_bearer(&secret)
        .await
        .assert_status(unauthorized);
    server
        .get("/api/v1/devices/AAA/objects/shared.AAA")
        .authorization_bearer(&secret)
        .await
        .assert_status(unauthorized);
    server
        .post("/api/v1/devices/AAA/objects")
        .authorization_bearer(&secret)
        .json(&json!({"writes": [
            {"object_key": "shared.AAA", "value": {"target_temperature": 30.0}},
        ]}))
        .await
        .assert_status(unauthorized);
    server
        .delete("/api/v1/devices/AAA")
        .authorization_bearer(&secret)
        .await
        .assert_status(unauthorized);

    // Nothing was read, changed, or removed.
    let stored = state
        .store
        .get_object("AAA", "shared.AAA")
        .await
        .expect("get")
        .expect("object survives");
    assert_eq!(stored.value["target_temperature"], json!(20.0));
    assert!(state.store.get_owner("AAA").await.expect("owner").is_some());
}

#[tokio::test]
async fn sharing_a_device_you_do_not_own_is_refused() {
    let (_dir, state) = test_state().await;
    let server = control_server(&state);

    let resp = server
        .post("/api/v1/shares/invites")
        .json(&json!({"email": "x@example.com", "serial": "UNPAIRED"}))
        .await;
    resp.assert_status(axum::http::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn integration_config_roundtrip() {
    let (_dir, state) = test_state().await;
    let server = control_server(&state);

    server
        .get("/api/v1/integrations/mqtt")
        .await
        .assert_status(axum::http::StatusCode::NOT_FOUND);

    let put = server
        .put("/api/v1/integrations/mqtt")
        .json(&json!({"enabled": true, "config": {"retain": true}}))
        .await;
    put.assert_status_ok();

    let got = server.get("/api/v1/integrations/mqtt").await;
    got.assert_status_ok();
    let body: serde_json::Value = got.json();
    assert_eq!(body["enabled"], json!(true));
    assert_eq!(body["config"]["retain"], json!(true));
}

#[tokio::test]
async fn delete_device_removes_objects_and_ownership() {
    let (_dir, state) = test_state().await;
    let server = control_server(&state);

    let key = state.store.generate_entry_key("AAA", 60).await.expect("entry key");
    server
        .post("/api/v1/pairing/claim")
        .json(&json!({"code": key.code}))
        .await
        .assert_status_ok();

    let resp = server.delete("/api/v1/devices/AAA").await;
    resp.assert_status_ok();

    let list = server.get("/api/v1/devices").await;
    list.assert_status_ok();
    let body: serde_json::Value = list.json();
    assert_eq!(body.as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn status_reports_devices_and_fanout_health() {
    let (_dir, state) = test_state().await;
    state.availability.mark_seen("AAA");
    let server = control_server(&state);

    let resp = server.get("/api/v1/status").await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["devices"]["AAA"]["available"], json!(true));
    assert_eq!(body["subscriptions"]["total_subscriptions"], json!(0));
    assert!(body["integrations"].as_array().is_some());
}
