// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error kinds surfaced by the hearth APIs.
///
/// Stale writes are not represented here: a stale device write is silently
/// accepted without a publish, and in-process callers observe the outcome
/// through the store's `UpsertOutcome`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HearthError {
    Overflow,
    InvalidPayload,
    SafetyViolation,
    StoreFailure,
    NotFound,
    Unauthorized,
    UpstreamError,
    Internal,
}

impl HearthError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Overflow => 429,
            Self::InvalidPayload => 400,
            Self::SafetyViolation => 409,
            Self::StoreFailure => 503,
            Self::NotFound => 404,
            Self::Unauthorized => 401,
            Self::UpstreamError => 502,
            Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Overflow => "OVERFLOW",
            Self::InvalidPayload => "INVALID_PAYLOAD",
            Self::SafetyViolation => "SAFETY_VIOLATION",
            Self::StoreFailure => "STORE_FAILURE",
            Self::NotFound => "NOT_FOUND",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::UpstreamError => "UPSTREAM_ERROR",
            Self::Internal => "INTERNAL",
        }
    }

    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody { code: self.as_str().to_owned(), message: message.into() }
    }

    pub fn to_http_response(
        &self,
        message: impl Into<String>,
    ) -> (StatusCode, Json<ErrorResponse>) {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse { error: self.to_error_body(message) };
        (status, Json(body))
    }
}

impl fmt::Display for HearthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for HearthError {}

impl From<sqlx::Error> for HearthError {
    fn from(_: sqlx::Error) -> Self {
        Self::StoreFailure
    }
}

/// Top-level error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}
