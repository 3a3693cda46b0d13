// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! State service facade — the single write path.
//!
//! Both the device transport and the control API funnel object mutations
//! through `apply_writes`: revisions are minted here, domain invariants are
//! checked before anything touches the store, and one batch becomes one
//! change-bus publication so subscribers wake exactly once per caller.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::bus::ChangeBus;
use crate::error::HearthError;
use crate::store::objects::UpsertOutcome;
use crate::store::Store;
use crate::types::{epoch_ms, object_key_type, DeviceObject};

/// Safety defaults (°C) used when a device has not reported its own bounds.
const DEFAULT_MIN_SAFETY: f64 = 9.0;
const DEFAULT_MAX_SAFETY: f64 = 32.0;

/// Target-temperature fields subject to the safety bounds.
const TARGET_TEMP_FIELDS: &[&str] =
    &["target_temperature", "target_temperature_low", "target_temperature_high"];

/// Fan-timer fields preserved across `shared` writes that do not touch them.
const FAN_TIMER_FIELDS: &[&str] = &["fan_timer_timeout", "fan_timer_duration"];

/// One requested object write.
#[derive(Debug, Clone, Deserialize)]
pub struct WriteRequest {
    pub object_key: String,
    pub value: Value,
    /// Revision the client believes it holds; folded into the minted one.
    #[serde(default)]
    pub client_revision: Option<i64>,
}

pub struct StateService {
    store: Arc<Store>,
    bus: ChangeBus,
}

impl StateService {
    pub fn new(store: Arc<Store>, bus: ChangeBus) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn bus(&self) -> &ChangeBus {
        &self.bus
    }

    /// Apply a batch of writes for one serial.
    ///
    /// The whole batch is validated first and rejected as a unit on a safety
    /// violation. Writes that survive the per-key revision guard are
    /// published to the change bus as a single batch.
    pub async fn apply_writes(
        &self,
        serial: &str,
        writes: Vec<WriteRequest>,
    ) -> Result<Vec<DeviceObject>, HearthError> {
        if writes.is_empty() {
            return Ok(Vec::new());
        }

        // Load current state for every touched key up front; validation and
        // value fixups both need it.
        let mut stored: HashMap<String, Option<DeviceObject>> = HashMap::new();
        for write in &writes {
            if !stored.contains_key(&write.object_key) {
                let current = self.store.get_object(serial, &write.object_key).await?;
                stored.insert(write.object_key.clone(), current);
            }
        }

        let bounds = self.safety_bounds(serial).await?;
        for write in &writes {
            check_safety_bounds(&write.object_key, &write.value, bounds)?;
        }

        let now = epoch_ms();
        let mut applied = Vec::with_capacity(writes.len());
        for write in writes {
            let current = stored.get(&write.object_key).and_then(Option::as_ref);
            let mut value = write.value;
            if object_key_type(&write.object_key) == "shared" {
                preserve_fan_timer(&mut value, current);
            }
            if object_key_type(&write.object_key) == "device" {
                self.assign_structure(serial, &mut value).await?;
            }

            let stored_revision = current.map_or(0, |obj| obj.object_revision);
            let obj = DeviceObject {
                serial: serial.to_owned(),
                object_key: write.object_key,
                object_revision: stored_revision.max(write.client_revision.unwrap_or(0)) + 1,
                object_timestamp: now,
                value,
                updated_at: now,
            };

            match self.store.upsert_object(&obj).await? {
                UpsertOutcome::Written => applied.push(obj),
                UpsertOutcome::Stale => {
                    // Lost a race with a concurrent writer on the same key;
                    // the winner's publication covers the subscribers.
                    tracing::debug!(
                        serial = %serial,
                        object_key = %obj.object_key,
                        revision = obj.object_revision,
                        "upsert lost revision race, skipped"
                    );
                }
            }
        }

        if !applied.is_empty() {
            self.bus.publish(serial, applied.clone());
        }
        Ok(applied)
    }

    /// Safety bounds for a serial, read from its `device` object when the
    /// firmware has reported them.
    async fn safety_bounds(&self, serial: &str) -> Result<(f64, f64), HearthError> {
        let device = self.store.get_object(serial, &format!("device.{serial}")).await?;
        let value = device.map(|d| d.value).unwrap_or(Value::Null);
        let min = value
            .get("lower_safety_temp")
            .and_then(Value::as_f64)
            .unwrap_or(DEFAULT_MIN_SAFETY);
        let max = value
            .get("upper_safety_temp")
            .and_then(Value::as_f64)
            .unwrap_or(DEFAULT_MAX_SAFETY);
        Ok((min, max))
    }

    /// Backfill `structure_id` on a `device` object from the owner's first
    /// structure, if the write omitted it and the device is paired.
    async fn assign_structure(&self, serial: &str, value: &mut Value) -> Result<(), HearthError> {
        let Some(map) = value.as_object_mut() else { return Ok(()) };
        if map.contains_key("structure_id") {
            return Ok(());
        }
        let Some(owner) = self.store.get_owner(serial).await? else { return Ok(()) };
        if let Some(structure_id) = self.store.first_structure_for_user(&owner.user_id).await? {
            map.insert("structure_id".to_owned(), Value::String(structure_id));
        }
        Ok(())
    }
}

/// Reject any target-temperature field outside the safety window.
fn check_safety_bounds(
    object_key: &str,
    value: &Value,
    (min, max): (f64, f64),
) -> Result<(), HearthError> {
    let Some(map) = value.as_object() else { return Ok(()) };
    for field in TARGET_TEMP_FIELDS {
        if let Some(temp) = map.get(*field).and_then(Value::as_f64) {
            if temp < min || temp > max {
                tracing::warn!(
                    object_key = %object_key,
                    field = *field,
                    temp,
                    min,
                    max,
                    "write rejected by temperature safety bounds"
                );
                return Err(HearthError::SafetyViolation);
            }
        }
    }
    Ok(())
}

/// Carry stored fan-timer fields into a `shared` write that omits them.
/// A write that names them replaces them.
fn preserve_fan_timer(value: &mut Value, current: Option<&DeviceObject>) {
    let Some(current) = current else { return };
    let Some(stored_map) = current.value.as_object() else { return };
    let Some(map) = value.as_object_mut() else { return };
    for field in FAN_TIMER_FIELDS {
        if !map.contains_key(*field) {
            if let Some(existing) = stored_map.get(*field) {
                map.insert((*field).to_owned(), existing.clone());
            }
        }
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
