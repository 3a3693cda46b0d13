// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device long-poll ("observe") handler.
//!
//! The device declares which object keys it holds at which revisions; the
//! response is the subset that has advanced. When nothing has advanced the
//! response headers go out immediately and the body is streamed later, so
//! the device sees an idle open connection until a change batch or the hold
//! deadline releases it.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::error::HearthError;
use crate::subs::WaitOutcome;
use crate::types::{object_key_serial, DeviceObject, WireObject};
use crate::AppState;

/// One entry in the observation list.
#[derive(Debug, Clone, Deserialize)]
pub struct ObserveKey {
    pub object_key: String,
    #[serde(default)]
    pub object_revision: i64,
}

/// Observe request body.
#[derive(Debug, Clone, Deserialize)]
pub struct ObserveRequest {
    #[serde(default)]
    pub objects: Vec<ObserveKey>,
    /// Device-side session identifier; recorded for diagnostics only.
    #[serde(default)]
    pub session: Option<String>,
}

#[derive(Debug, Serialize)]
struct ObserveResponse {
    objects: Vec<WireObject>,
}

const EMPTY_TICKLE: &[u8] = br#"{"objects":[]}"#;

fn render_objects(objects: &[DeviceObject]) -> Vec<u8> {
    let response =
        ObserveResponse { objects: objects.iter().map(WireObject::from).collect() };
    serde_json::to_vec(&response).unwrap_or_else(|_| EMPTY_TICKLE.to_vec())
}

fn json_response(status: StatusCode, body: Vec<u8>) -> Response {
    (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
}

/// `POST /nest/transport/v5/subscribe` — the long-poll observe endpoint.
pub async fn observe(State(s): State<Arc<AppState>>, body: Bytes) -> Response {
    let req: ObserveRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => {
            tracing::debug!(err = %e, "malformed observe body");
            return HearthError::InvalidPayload
                .to_http_response("malformed observe body")
                .into_response();
        }
    };
    if req.objects.is_empty() {
        return HearthError::InvalidPayload
            .to_http_response("empty observation list")
            .into_response();
    }

    let serial = object_key_serial(&req.objects[0].object_key).to_owned();
    if serial.is_empty() {
        return HearthError::InvalidPayload
            .to_http_response("object_key carries no serial")
            .into_response();
    }

    // Any transport contact is a heartbeat.
    s.availability.mark_seen(&serial);
    if let Some(ref session) = req.session {
        if let Err(e) = s.store.touch_session(session, &serial).await {
            tracing::debug!(err = %e, "failed to record device session");
        }
    }

    // Snapshot the store for the requested keys.
    let mut stored: HashMap<String, DeviceObject> = HashMap::new();
    for key in &req.objects {
        match s.store.get_object(&serial, &key.object_key).await {
            Ok(Some(obj)) => {
                stored.insert(key.object_key.clone(), obj);
            }
            Ok(None) => {}
            Err(e) => {
                return e.to_http_response("store read failed").into_response();
            }
        }
    }

    let immediate: Vec<DeviceObject> = req
        .objects
        .iter()
        .filter_map(|key| {
            stored
                .get(&key.object_key)
                .filter(|obj| obj.object_revision > key.object_revision)
                .cloned()
        })
        .collect();

    // Fresh subscribe with data on hand answers at once. A cyclic
    // re-observe holds open instead: the device already worked through
    // these revisions in its previous cycle.
    let resubscribe = s.subs.is_resubscribe(&serial);
    if !immediate.is_empty() && !resubscribe {
        tracing::debug!(
            serial = %serial,
            count = immediate.len(),
            "observe answered from store"
        );
        return json_response(StatusCode::OK, render_objects(&immediate));
    }

    let watched: HashMap<String, i64> = req
        .objects
        .iter()
        .map(|key| {
            let stored_revision =
                stored.get(&key.object_key).map_or(0, |obj| obj.object_revision);
            (key.object_key.clone(), key.object_revision.max(stored_revision))
        })
        .collect();

    let handle = match s.subs.subscribe(&serial, req.session.clone(), watched) {
        Ok(handle) => handle,
        Err(e) => return e.to_http_response("too many subscriptions").into_response(),
    };

    // Close the snapshot/register race: a write that landed in between is
    // re-read here and routed through the normal notify path, which wakes
    // this very subscription if its watermark is behind.
    let mut current = Vec::new();
    for key in &req.objects {
        if let Ok(Some(obj)) = s.store.get_object(&serial, &key.object_key).await {
            current.push(obj);
        }
    }
    s.subs.notify(&serial, &current);

    // Headers now; the body follows when the wait resolves.
    let hold = s.config.hold_max();
    let serial_for_log = serial.clone();
    let stream = futures_util::stream::once(async move {
        let payload = match handle.wait(hold).await {
            WaitOutcome::Delivered(objects) => {
                tracing::debug!(
                    serial = %serial_for_log,
                    count = objects.len(),
                    "observe released with delta"
                );
                render_objects(&objects)
            }
            WaitOutcome::TimedOut => {
                tracing::debug!(serial = %serial_for_log, "observe tickled");
                EMPTY_TICKLE.to_vec()
            }
        };
        Ok::<_, std::convert::Infallible>(Bytes::from(payload))
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| json_response(StatusCode::OK, EMPTY_TICKLE.to_vec()))
}
