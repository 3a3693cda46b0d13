// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Home Assistant MQTT discovery payloads.
//!
//! Discovery topic shape: `<discovery_prefix>/<component>/<node_id>/<object_id>/config`.
//! Temperatures are always Celsius; HA converts for display, which avoids
//! double-conversion when the thermostat's display unit changes.

use serde_json::{json, Value};

use super::topics::availability_topic;

fn availability_block(prefix: &str, serial: &str) -> Value {
    json!({
        "topic": availability_topic(prefix, serial),
        "payload_available": "online",
        "payload_not_available": "offline",
    })
}

/// Discovery topic for the climate entity.
pub fn climate_config_topic(discovery_prefix: &str, serial: &str) -> String {
    format!("{discovery_prefix}/climate/hearth_{serial}/thermostat/config")
}

/// Discovery topic for an auxiliary sensor entity.
pub fn sensor_config_topic(discovery_prefix: &str, serial: &str, sensor: &str) -> String {
    format!("{discovery_prefix}/sensor/hearth_{serial}/{sensor}/config")
}

/// Climate entity discovery payload.
pub fn climate_payload(serial: &str, device_name: &str, prefix: &str) -> Value {
    let ha = format!("{prefix}/{serial}/ha");
    json!({
        "unique_id": format!("hearth_{serial}"),
        "name": device_name,
        "object_id": format!("hearth_{serial}"),
        "device": {
            "identifiers": [format!("hearth_{serial}")],
            "name": device_name,
            "model": "Thermostat",
            "manufacturer": "Hearth",
            "sw_version": env!("CARGO_PKG_VERSION"),
        },
        "availability": availability_block(prefix, serial),
        "temperature_unit": "C",
        "precision": 0.5,
        "temp_step": 0.5,
        "current_temperature_topic": format!("{ha}/current_temperature"),
        "current_humidity_topic": format!("{ha}/current_humidity"),
        "temperature_command_topic": format!("{ha}/target_temperature/set"),
        "temperature_state_topic": format!("{ha}/target_temperature"),
        "temperature_high_command_topic": format!("{ha}/target_temperature_high/set"),
        "temperature_high_state_topic": format!("{ha}/target_temperature_high"),
        "temperature_low_command_topic": format!("{ha}/target_temperature_low/set"),
        "temperature_low_state_topic": format!("{ha}/target_temperature_low"),
        "mode_command_topic": format!("{ha}/mode/set"),
        "mode_state_topic": format!("{ha}/mode"),
        "modes": ["off", "heat", "cool", "heat_cool"],
        "action_topic": format!("{ha}/action"),
        "fan_mode_command_topic": format!("{ha}/fan_mode/set"),
        "fan_mode_state_topic": format!("{ha}/fan_mode"),
        "fan_modes": ["auto", "on"],
        "preset_mode_command_topic": format!("{ha}/preset/set"),
        "preset_mode_state_topic": format!("{ha}/preset"),
        "preset_modes": ["home", "away"],
        "min_temp": 9,
        "max_temp": 32,
        "optimistic": false,
        "qos": 1,
    })
}

/// Temperature sensor discovery payload.
pub fn temperature_sensor_payload(serial: &str, prefix: &str) -> Value {
    json!({
        "unique_id": format!("hearth_{serial}_temperature"),
        "name": "Temperature",
        "object_id": format!("hearth_{serial}_temperature"),
        "device": { "identifiers": [format!("hearth_{serial}")] },
        "state_topic": format!("{prefix}/{serial}/ha/current_temperature"),
        "unit_of_measurement": "°C",
        "device_class": "temperature",
        "state_class": "measurement",
        "availability": availability_block(prefix, serial),
        "qos": 0,
    })
}

/// Humidity sensor discovery payload.
pub fn humidity_sensor_payload(serial: &str, prefix: &str) -> Value {
    json!({
        "unique_id": format!("hearth_{serial}_humidity"),
        "name": "Humidity",
        "object_id": format!("hearth_{serial}_humidity"),
        "device": { "identifiers": [format!("hearth_{serial}")] },
        "state_topic": format!("{prefix}/{serial}/ha/current_humidity"),
        "unit_of_measurement": "%",
        "device_class": "humidity",
        "state_class": "measurement",
        "availability": availability_block(prefix, serial),
        "qos": 0,
    })
}

#[cfg(test)]
#[path = "discovery_tests.rs"]
mod tests;
