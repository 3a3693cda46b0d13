// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control API handlers — the surface dashboards and automations use to read
//! and command the same devices the transport serves.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::error::HearthError;
use crate::service::WriteRequest;
use crate::transport::auth::AuthUser;
use crate::AppState;

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Serialize)]
pub struct DeviceInfo {
    pub serial: String,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WriteBatchRequest {
    pub writes: Vec<WriteRequest>,
}

#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateKeyRequest {
    pub name: String,
    #[serde(default)]
    pub expires_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct InviteRequest {
    pub email: String,
    pub serial: String,
    #[serde(default = "default_permissions")]
    pub permissions: String,
}

fn default_permissions() -> String {
    "read".to_owned()
}

#[derive(Debug, Deserialize)]
pub struct PutIntegrationRequest {
    pub enabled: bool,
    #[serde(default)]
    pub config: serde_json::Value,
}

// -- Helpers ------------------------------------------------------------------

/// Gate a device endpoint on ownership or an accepted share.
///
/// Unclaimed devices stay open: until a pairing code is claimed there is no
/// owner to check against, and first contact has to be able to seed state.
async fn authorize_device(s: &AppState, user: &AuthUser, serial: &str) -> Result<(), Response> {
    let owner = match s.store.get_owner(serial).await {
        Ok(owner) => owner,
        Err(e) => return Err(e.to_http_response("store read failed").into_response()),
    };
    if owner.is_none() {
        return Ok(());
    }
    match s.store.user_can_access(&user.0, serial).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(HearthError::Unauthorized
            .to_http_response("no access to this device")
            .into_response()),
        Err(e) => Err(e.to_http_response("store read failed").into_response()),
    }
}

// -- Handlers -----------------------------------------------------------------

/// `GET /api/v1/health`
pub async fn health(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "running",
        "subscriptions": s.subs.stats(),
    }))
}

/// `GET /api/v1/devices` — every known device with its availability.
pub async fn list_devices(State(s): State<Arc<AppState>>) -> Response {
    let serials = match s.store.list_serials().await {
        Ok(serials) => serials,
        Err(e) => return e.to_http_response("store read failed").into_response(),
    };

    let statuses = s.availability.get_status();
    let mut devices = Vec::with_capacity(serials.len());
    for serial in serials {
        let owner = match s.store.get_owner(&serial).await {
            Ok(owner) => owner.map(|o| o.user_id),
            Err(e) => return e.to_http_response("store read failed").into_response(),
        };
        let status = statuses.get(&serial);
        devices.push(DeviceInfo {
            available: status.is_some_and(|st| st.available),
            last_seen_ms: status.map(|st| st.last_seen_ms),
            owner,
            serial,
        });
    }
    Json(devices).into_response()
}

/// `GET /api/v1/devices/{serial}/objects`
pub async fn list_objects(
    State(s): State<Arc<AppState>>,
    Path(serial): Path<String>,
    Extension(user): Extension<AuthUser>,
) -> Response {
    if let Err(denied) = authorize_device(&s, &user, &serial).await {
        return denied;
    }
    match s.store.list_objects(&serial).await {
        Ok(objects) => Json(objects).into_response(),
        Err(e) => e.to_http_response("store read failed").into_response(),
    }
}

/// `GET /api/v1/devices/{serial}/objects/{key}`
pub async fn get_object(
    State(s): State<Arc<AppState>>,
    Path((serial, key)): Path<(String, String)>,
    Extension(user): Extension<AuthUser>,
) -> Response {
    if let Err(denied) = authorize_device(&s, &user, &serial).await {
        return denied;
    }
    match s.store.get_object(&serial, &key).await {
        Ok(Some(obj)) => Json(obj).into_response(),
        Ok(None) => HearthError::NotFound.to_http_response("object not found").into_response(),
        Err(e) => e.to_http_response("store read failed").into_response(),
    }
}

/// `POST /api/v1/devices/{serial}/objects` — write a batch through the facade.
pub async fn write_objects(
    State(s): State<Arc<AppState>>,
    Path(serial): Path<String>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<WriteBatchRequest>,
) -> Response {
    if let Err(denied) = authorize_device(&s, &user, &serial).await {
        return denied;
    }
    if req.writes.is_empty() {
        return HearthError::InvalidPayload.to_http_response("empty write batch").into_response();
    }
    tracing::debug!(serial = %serial, user = %user.0, count = req.writes.len(), "control write");
    match s.service.apply_writes(&serial, req.writes).await {
        Ok(applied) => Json(applied).into_response(),
        Err(e) => e.to_http_response("write rejected").into_response(),
    }
}

/// `DELETE /api/v1/devices/{serial}` — drop a device and everything it owns.
pub async fn delete_device(
    State(s): State<Arc<AppState>>,
    Path(serial): Path<String>,
    Extension(user): Extension<AuthUser>,
) -> Response {
    if let Err(denied) = authorize_device(&s, &user, &serial).await {
        return denied;
    }
    let removed = match s.store.delete_device(&serial).await {
        Ok(n) => n,
        Err(e) => return e.to_http_response("store write failed").into_response(),
    };
    if let Err(e) = s.store.forget_device(&serial).await {
        return e.to_http_response("store write failed").into_response();
    }
    tracing::info!(serial = %serial, objects = removed, "device deleted");
    Json(json!({ "serial": serial, "objects_removed": removed })).into_response()
}

/// `POST /api/v1/pairing/claim` — bind a device to the calling user.
pub async fn claim_pairing(
    State(s): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<ClaimRequest>,
) -> Response {
    let serial = match s.store.claim_entry_key(&req.code, &user.0).await {
        Ok(Some(serial)) => serial,
        Ok(None) => {
            return HearthError::NotFound
                .to_http_response("unknown, expired, or claimed code")
                .into_response()
        }
        Err(e) => return e.to_http_response("store write failed").into_response(),
    };

    // First claim for this user mints a structure for the installation site.
    let structure_id = match s.store.first_structure_for_user(&user.0).await {
        Ok(Some(existing)) => existing,
        Ok(None) => Uuid::new_v4().to_string(),
        Err(e) => return e.to_http_response("store read failed").into_response(),
    };

    // Fold the structure into whatever the device has already reported.
    let object_key = format!("device.{serial}");
    let mut value = match s.store.get_object(&serial, &object_key).await {
        Ok(Some(obj)) => obj.value,
        Ok(None) => json!({}),
        Err(e) => return e.to_http_response("store read failed").into_response(),
    };
    if let Some(map) = value.as_object_mut() {
        map.insert("structure_id".to_owned(), json!(structure_id));
    }
    let write = WriteRequest { object_key, value, client_revision: None };
    if let Err(e) = s.service.apply_writes(&serial, vec![write]).await {
        return e.to_http_response("structure assignment failed").into_response();
    }

    tracing::info!(serial = %serial, user = %user.0, "device paired");
    Json(json!({ "serial": serial, "structure_id": structure_id })).into_response()
}

/// `GET /api/v1/keys`
pub async fn list_keys(
    State(s): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Response {
    match s.store.list_api_keys(&user.0).await {
        Ok(keys) => Json(keys).into_response(),
        Err(e) => e.to_http_response("store read failed").into_response(),
    }
}

/// `POST /api/v1/keys` — mint a key; the secret appears in this response only.
pub async fn create_key(
    State(s): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateKeyRequest>,
) -> Response {
    match s.store.create_api_key(&user.0, &req.name, req.expires_at).await {
        Ok((key, secret)) => Json(json!({ "key": key, "secret": secret })).into_response(),
        Err(e) => e.to_http_response("store write failed").into_response(),
    }
}

/// `DELETE /api/v1/keys/{id}`
pub async fn delete_key(
    State(s): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Extension(user): Extension<AuthUser>,
) -> Response {
    match s.store.delete_api_key(&user.0, id).await {
        Ok(true) => Json(json!({ "id": id, "removed": true })).into_response(),
        Ok(false) => HearthError::NotFound.to_http_response("key not found").into_response(),
        Err(e) => e.to_http_response("store write failed").into_response(),
    }
}

/// `GET /api/v1/shares`
pub async fn list_shares(
    State(s): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Response {
    match s.store.list_shares(&user.0).await {
        Ok(shares) => Json(shares).into_response(),
        Err(e) => e.to_http_response("store read failed").into_response(),
    }
}

/// `POST /api/v1/shares/invites` — invite an email to a device you own.
pub async fn create_invite(
    State(s): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<InviteRequest>,
) -> Response {
    let owns = match s.store.get_owner(&req.serial).await {
        Ok(owner) => owner.is_some_and(|o| o.user_id == user.0),
        Err(e) => return e.to_http_response("store read failed").into_response(),
    };
    if !owns {
        return HearthError::Unauthorized
            .to_http_response("only the owner may share a device")
            .into_response();
    }
    match s.store.create_share_invite(&user.0, &req.email, &req.serial, &req.permissions).await {
        Ok(invite) => Json(invite).into_response(),
        Err(e) => e.to_http_response("store write failed").into_response(),
    }
}

/// `POST /api/v1/shares/invites/{token}/accept`
pub async fn accept_invite(
    State(s): State<Arc<AppState>>,
    Path(token): Path<String>,
    Extension(user): Extension<AuthUser>,
) -> Response {
    match s.store.accept_share_invite(&token, &user.0).await {
        Ok(Some(share)) => Json(share).into_response(),
        Ok(None) => HearthError::NotFound
            .to_http_response("unknown, expired, or accepted invite")
            .into_response(),
        Err(e) => e.to_http_response("store write failed").into_response(),
    }
}

/// `DELETE /api/v1/shares/{id}`
pub async fn delete_share(
    State(s): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Extension(user): Extension<AuthUser>,
) -> Response {
    match s.store.delete_share(&user.0, id).await {
        Ok(true) => Json(json!({ "id": id, "removed": true })).into_response(),
        Ok(false) => HearthError::NotFound.to_http_response("share not found").into_response(),
        Err(e) => e.to_http_response("store write failed").into_response(),
    }
}

/// `GET /api/v1/integrations/{type}`
pub async fn get_integration(
    State(s): State<Arc<AppState>>,
    Path(integration_type): Path<String>,
    Extension(user): Extension<AuthUser>,
) -> Response {
    match s.store.get_integration(&user.0, &integration_type).await {
        Ok(Some(config)) => Json(config).into_response(),
        Ok(None) => {
            HearthError::NotFound.to_http_response("integration not configured").into_response()
        }
        Err(e) => e.to_http_response("store read failed").into_response(),
    }
}

/// `PUT /api/v1/integrations/{type}`
pub async fn put_integration(
    State(s): State<Arc<AppState>>,
    Path(integration_type): Path<String>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<PutIntegrationRequest>,
) -> Response {
    match s
        .store
        .put_integration(&user.0, &integration_type, req.enabled, &req.config)
        .await
    {
        Ok(()) => Json(json!({ "type": integration_type, "enabled": req.enabled })).into_response(),
        Err(e) => e.to_http_response("store write failed").into_response(),
    }
}

/// `GET /api/v1/status` — watchdog map, subscription stats, fan-out health.
pub async fn status(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    let failures: Vec<serde_json::Value> = s
        .integrations
        .failure_counts()
        .into_iter()
        .map(|(name, count)| json!({ "integration": name, "failures": count }))
        .collect();
    Json(json!({
        "devices": s.availability.get_status(),
        "subscriptions": s.subs.stats(),
        "integrations": failures,
    }))
}
