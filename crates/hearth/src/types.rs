// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Core state-object types shared across the store, transport, and
//! integrations.

use serde::{Deserialize, Serialize};

/// A versioned, per-device state object.
///
/// Addressed by `(serial, object_key)`; `object_revision` strictly increases
/// across successful writes. `value` is an opaque JSON payload owned by the
/// device firmware.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceObject {
    pub serial: String,
    pub object_key: String,
    pub object_revision: i64,
    /// Millisecond wall clock at last write.
    pub object_timestamp: i64,
    pub value: serde_json::Value,
    pub updated_at: i64,
}

impl DeviceObject {
    /// The object type, i.e. the part of the key before the first dot
    /// (`device`, `shared`, `structure`, ...).
    pub fn object_type(&self) -> &str {
        object_key_type(&self.object_key)
    }
}

/// Wire form of an object in an observe response.
///
/// Field order is observable to the device firmware and must stay exactly
/// `object_revision, object_timestamp, object_key, value`. `serial` is
/// deliberately absent; the device recovers it from `object_key`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireObject {
    pub object_revision: i64,
    pub object_timestamp: i64,
    pub object_key: String,
    pub value: serde_json::Value,
}

impl From<&DeviceObject> for WireObject {
    fn from(obj: &DeviceObject) -> Self {
        Self {
            object_revision: obj.object_revision,
            object_timestamp: obj.object_timestamp,
            object_key: obj.object_key.clone(),
            value: obj.value.clone(),
        }
    }
}

/// Split an object key of the form `<type>.<serial>` into its parts.
///
/// Keys without a dot yield the whole key as the type and an empty serial.
pub fn parse_object_key(object_key: &str) -> (&str, &str) {
    match object_key.split_once('.') {
        Some((kind, serial)) => (kind, serial),
        None => (object_key, ""),
    }
}

/// The `<type>` part of an object key.
pub fn object_key_type(object_key: &str) -> &str {
    parse_object_key(object_key).0
}

/// The `<serial>` part of an object key (empty when absent).
pub fn object_key_serial(object_key: &str) -> &str {
    parse_object_key(object_key).1
}

/// Return current epoch millis.
pub fn epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod tests;
