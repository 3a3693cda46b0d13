// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bearer API-key authentication for the control API.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::HearthError;
use crate::AppState;

/// Identity the control API resolved for a request.
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

/// Implicit identity while no API key exists yet. Minting the first key
/// closes the bootstrap hole.
pub const LOCAL_ADMIN: &str = "local-admin";

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Axum middleware that resolves a user from the presented API key.
///
/// Exempt: `/api/v1/health`.
pub async fn auth_layer(
    State(s): State<Arc<AppState>>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if req.uri().path() == "/api/v1/health" {
        return next.run(req).await;
    }

    let has_keys = match s.store.has_api_keys().await {
        Ok(v) => v,
        Err(e) => return e.to_http_response("auth store unavailable").into_response(),
    };
    if !has_keys {
        req.extensions_mut().insert(AuthUser(LOCAL_ADMIN.to_owned()));
        return next.run(req).await;
    }

    let Some(token) = bearer_token(req.headers()) else {
        return unauthorized("missing bearer token");
    };
    match s.store.validate_api_key(token).await {
        Ok(Some(user_id)) => {
            req.extensions_mut().insert(AuthUser(user_id));
            next.run(req).await
        }
        Ok(None) => unauthorized("invalid api key"),
        Err(e) => e.to_http_response("auth store unavailable").into_response(),
    }
}

fn unauthorized(message: &str) -> Response {
    let body = crate::error::ErrorResponse {
        error: HearthError::Unauthorized.to_error_body(message),
    };
    (StatusCode::UNAUTHORIZED, axum::Json(body)).into_response()
}
