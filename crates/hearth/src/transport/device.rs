// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Auxiliary device endpoints: discovery, pairing codes, ping, log upload,
//! installer info, weather, and the device-side write path.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, RawQuery, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::HearthError;
use crate::service::WriteRequest;
use crate::types::{epoch_ms, object_key_serial, WireObject};
use crate::AppState;

/// Pull a device serial out of a request: query param first, then the
/// `X-nl-client-serial` header the firmware sets on most calls.
fn extract_serial(headers: &HeaderMap, query_serial: Option<&String>) -> Option<String> {
    if let Some(serial) = query_serial {
        if !serial.is_empty() {
            return Some(serial.clone());
        }
    }
    headers
        .get("x-nl-client-serial")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

#[derive(Debug, Deserialize)]
pub struct SerialQuery {
    #[serde(default)]
    pub serial: Option<String>,
}

/// `GET|POST /nest/entry` — service discovery.
///
/// Every URL carries an explicit port: the firmware scans the URL backwards
/// for `:` + digits and otherwise falls back to a stale cached port.
pub async fn entry(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    let origin = s.config.api_origin_with_port();
    Json(json!({
        "czfe_url": format!("{origin}/nest/transport"),
        "transport_url": format!("{origin}/nest/transport"),
        "direct_transport_url": format!("{origin}/nest/transport"),
        "passphrase_url": format!("{origin}/nest/passphrase"),
        "ping_url": format!("{origin}/nest/transport"),
        "pro_info_url": format!("{origin}/nest/pro_info"),
        "weather_url": format!("{origin}/nest/weather/v1?query="),
        "upload_url": format!("{origin}/nest/upload"),
        "software_update_url": "",
        "server_version": env!("CARGO_PKG_VERSION"),
        "tier_name": "local",
    }))
}

/// `GET /nest/passphrase` — mint a pairing code for the requesting device.
pub async fn passphrase(
    State(s): State<Arc<AppState>>,
    Query(query): Query<SerialQuery>,
    headers: HeaderMap,
) -> Response {
    let Some(serial) = extract_serial(&headers, query.serial.as_ref()) else {
        return HearthError::InvalidPayload
            .to_http_response("device serial required")
            .into_response();
    };

    s.availability.mark_seen(&serial);
    match s.store.generate_entry_key(&serial, s.config.entry_key_ttl_seconds).await {
        Ok(key) => {
            tracing::info!(serial = %serial, code = %key.code, "pairing code issued");
            Json(json!({ "value": key.code, "expires": key.expires_at })).into_response()
        }
        Err(e) => e.to_http_response("entry key service unavailable").into_response(),
    }
}

/// `GET /nest/ping` (and bare `GET /nest/transport`) — health check.
pub async fn ping() -> impl IntoResponse {
    Json(json!({ "status": "ok", "timestamp": epoch_ms() }))
}

/// `POST /nest/upload` — device log upload. Always 200; the payload is only
/// persisted when `store_device_logs` is on.
pub async fn upload(
    State(s): State<Arc<AppState>>,
    Query(query): Query<SerialQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let serial = extract_serial(&headers, query.serial.as_ref());
    if let Some(ref serial) = serial {
        s.availability.mark_seen(serial);
    }
    tracing::info!(
        serial = serial.as_deref().unwrap_or("unknown"),
        size = body.len(),
        "device log upload"
    );

    if s.config.store_device_logs {
        if let Err(e) = s.store.store_log(serial.as_deref(), &body).await {
            tracing::warn!(err = %e, "failed to persist device log");
        }
    }
    Json(json!({ "status": "ok" }))
}

/// `GET /nest/pro_info/{code}` — installer info lookup. Self-hosted servers
/// answer with a generic document.
pub async fn pro_info(Path(code): Path<String>) -> impl IntoResponse {
    Json(json!({
        "pro_id": code,
        "company_name": "Self-Hosted",
        "phone": "",
        "email": "",
    }))
}

/// `GET /nest/weather/v1` and `GET /nest/weather/{path}` — cached weather.
pub async fn weather(State(s): State<Arc<AppState>>, RawQuery(query): RawQuery) -> Response {
    match s.weather.get(query.as_deref().unwrap_or("")).await {
        Ok(data) => Json(data).into_response(),
        Err(e) => {
            tracing::warn!(err = %e, "weather service unavailable");
            HearthError::UpstreamError
                .to_http_response("weather service unavailable")
                .into_response()
        }
    }
}

/// Device-side write body: a batch of objects to merge into the store.
#[derive(Debug, Deserialize)]
pub struct DevicePutRequest {
    #[serde(default)]
    pub objects: Vec<DevicePutObject>,
    #[serde(default)]
    pub session: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DevicePutObject {
    pub object_key: String,
    pub value: serde_json::Value,
    #[serde(default)]
    pub base_object_revision: Option<i64>,
}

/// Typed so the wire field order survives serialization.
#[derive(Debug, Serialize)]
struct DevicePutResponse {
    objects: Vec<WireObject>,
}

/// `POST /nest/transport/v5/put` — device pushes object updates.
pub async fn device_put(State(s): State<Arc<AppState>>, body: Bytes) -> Response {
    let req: DevicePutRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => {
            tracing::debug!(err = %e, "malformed device put body");
            return HearthError::InvalidPayload
                .to_http_response("malformed put body")
                .into_response();
        }
    };
    if req.objects.is_empty() {
        return Json(DevicePutResponse { objects: Vec::new() }).into_response();
    }

    let serial = object_key_serial(&req.objects[0].object_key).to_owned();
    if serial.is_empty() {
        return HearthError::InvalidPayload
            .to_http_response("object_key carries no serial")
            .into_response();
    }
    s.availability.mark_seen(&serial);
    if let Some(ref session) = req.session {
        if let Err(e) = s.store.touch_session(session, &serial).await {
            tracing::debug!(err = %e, "failed to record device session");
        }
    }

    let writes = req
        .objects
        .into_iter()
        .map(|obj| WriteRequest {
            object_key: obj.object_key,
            value: obj.value,
            client_revision: obj.base_object_revision,
        })
        .collect();

    match s.service.apply_writes(&serial, writes).await {
        Ok(applied) => {
            let objects: Vec<WireObject> = applied.iter().map(WireObject::from).collect();
            Json(DevicePutResponse { objects }).into_response()
        }
        Err(e) => e.to_http_response("write rejected").into_response(),
    }
}
