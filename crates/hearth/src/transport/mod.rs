// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP transports: the device-facing vendor-protocol surface and the
//! control API.

pub mod auth;
pub mod control;
pub mod device;
pub mod observe;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::AppState;

/// Build the device-facing router (vendor protocol emulation).
///
/// This surface is unauthenticated by design; devices cannot present
/// credentials.
pub fn device_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Discovery: devices may use either verb.
        .route("/nest/entry", get(device::entry).post(device::entry))
        // Transport: observe long-poll, device writes, bare ping.
        .route("/nest/transport", get(device::ping))
        .route("/nest/transport/v5/subscribe", post(observe::observe))
        .route("/nest/transport/v5/put", post(device::device_put))
        .route("/nest/ping", get(device::ping))
        // Pairing, uploads, installer info, weather.
        .route("/nest/passphrase", get(device::passphrase))
        .route("/nest/upload", post(device::upload))
        .route("/nest/pro_info/{code}", get(device::pro_info))
        .route("/nest/weather/v1", get(device::weather))
        .route("/nest/weather/{*path}", get(device::weather))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Build the control API router (dashboards / automation).
pub fn control_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(control::health))
        // Devices and objects
        .route("/api/v1/devices", get(control::list_devices))
        .route(
            "/api/v1/devices/{serial}/objects",
            get(control::list_objects).post(control::write_objects),
        )
        .route("/api/v1/devices/{serial}/objects/{key}", get(control::get_object))
        .route("/api/v1/devices/{serial}", delete(control::delete_device))
        // Pairing
        .route("/api/v1/pairing/claim", post(control::claim_pairing))
        // API keys
        .route("/api/v1/keys", get(control::list_keys).post(control::create_key))
        .route("/api/v1/keys/{id}", delete(control::delete_key))
        // Shares
        .route("/api/v1/shares", get(control::list_shares))
        .route("/api/v1/shares/{id}", delete(control::delete_share))
        .route("/api/v1/shares/invites", post(control::create_invite))
        .route("/api/v1/shares/invites/{token}/accept", post(control::accept_invite))
        // Integrations
        .route(
            "/api/v1/integrations/{type}",
            get(control::get_integration).put(control::put_integration),
        )
        // Status
        .route("/api/v1/status", get(control::status))
        // Middleware
        .layer(middleware::from_fn_with_state(state.clone(), auth::auth_layer))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
