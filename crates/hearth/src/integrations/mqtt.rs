// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! MQTT integration.
//!
//! Publishes object state, Home-Assistant-mapped fields, availability, and
//! discovery documents; subscribes to command topics and routes commands
//! back through the state service. The rumqttc event loop runs on its own
//! task so broker trouble never stalls the fan-out worker.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use regex::Regex;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use crate::config::HearthConfig;
use crate::service::{StateService, WriteRequest};
use crate::types::DeviceObject;

use super::discovery;
use super::topics::{self, Command};
use super::Integration;

const KEEPALIVE: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const CHANNEL_CAPACITY: usize = 64;

/// Context shared between the fan-out worker side and the event-loop task.
struct MqttCtx {
    client: AsyncClient,
    service: Arc<StateService>,
    topic_prefix: String,
    discovery_prefix: String,
    command_regex: Option<Regex>,
}

pub struct MqttIntegration {
    config: HearthConfig,
    service: Arc<StateService>,
    ctx: Option<Arc<MqttCtx>>,
    event_loop: Option<JoinHandle<()>>,
}

impl MqttIntegration {
    pub fn new(config: HearthConfig, service: Arc<StateService>) -> Self {
        Self { config, service, ctx: None, event_loop: None }
    }

    async fn publish(&self, topic: String, retain: bool, payload: Vec<u8>) -> anyhow::Result<()> {
        let ctx = self.ctx.as_ref().context("mqtt client not initialized")?;
        ctx.client
            .publish(topic, QoS::AtLeastOnce, retain, payload)
            .await
            .context("mqtt publish failed")
    }
}

impl Integration for MqttIntegration {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    async fn init(&mut self) -> anyhow::Result<()> {
        let host = self.config.mqtt_host.clone().context("mqtt_host not configured")?;

        let mut options =
            MqttOptions::new("hearth-server", host.clone(), self.config.mqtt_port);
        options.set_keep_alive(KEEPALIVE);
        if let (Some(user), Some(password)) =
            (self.config.mqtt_user.clone(), self.config.mqtt_password.clone())
        {
            options.set_credentials(user, password);
        }

        let (client, event_loop) = AsyncClient::new(options, CHANNEL_CAPACITY);
        let ctx = Arc::new(MqttCtx {
            client,
            service: Arc::clone(&self.service),
            topic_prefix: self.config.mqtt_topic_prefix.clone(),
            discovery_prefix: self.config.mqtt_discovery_prefix.clone(),
            command_regex: topics::command_regex(&self.config.mqtt_topic_prefix),
        });

        self.event_loop = Some(spawn_event_loop(Arc::clone(&ctx), event_loop));
        self.ctx = Some(ctx);
        tracing::info!(host = %host, port = self.config.mqtt_port, "mqtt integration connecting");
        Ok(())
    }

    async fn shutdown(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            let _ = ctx.client.disconnect().await;
        }
        if let Some(handle) = self.event_loop.take() {
            handle.abort();
        }
    }

    async fn on_state_change(
        &mut self,
        serial: &str,
        objects: &[DeviceObject],
    ) -> anyhow::Result<()> {
        let prefix = self.config.mqtt_topic_prefix.clone();
        for obj in objects {
            let object_type = obj.object_type().to_owned();
            let topic = topics::state_topic(&prefix, serial, &object_type, None);
            let payload = serde_json::to_vec(&obj.value).unwrap_or_default();
            self.publish(topic, false, payload).await?;

            for (field, payload) in ha_updates(&object_type, &obj.value) {
                let topic = topics::state_topic(&prefix, serial, "ha", Some(&field));
                self.publish(topic, false, payload.into_bytes()).await?;
            }
        }
        Ok(())
    }

    async fn on_connected(&mut self, serial: &str) -> anyhow::Result<()> {
        let topic = topics::availability_topic(&self.config.mqtt_topic_prefix, serial);
        self.publish(topic, true, b"online".to_vec()).await?;

        // Re-announce the entity set; discovery is retained so this is
        // idempotent for the broker.
        if let Some(ctx) = self.ctx.as_ref() {
            publish_discovery(ctx, serial).await;
        }
        Ok(())
    }

    async fn on_disconnected(&mut self, serial: &str) -> anyhow::Result<()> {
        let topic = topics::availability_topic(&self.config.mqtt_topic_prefix, serial);
        self.publish(topic, true, b"offline".to_vec()).await
    }
}

/// Map an object value onto the flat Home Assistant state fields.
fn ha_updates(object_type: &str, value: &Value) -> Vec<(String, String)> {
    let Some(map) = value.as_object() else { return Vec::new() };
    let mut updates = Vec::new();

    match object_type {
        "shared" => {
            for field in
                ["current_temperature", "target_temperature", "target_temperature_low", "target_temperature_high"]
            {
                if let Some(temp) = map.get(field).and_then(Value::as_f64) {
                    updates.push((field.to_owned(), format!("{temp}")));
                }
            }
            if let Some(mode) = map.get("target_temperature_type").and_then(Value::as_str) {
                let ha_mode = match mode {
                    "range" => "heat_cool",
                    other => other,
                };
                updates.push(("mode".to_owned(), ha_mode.to_owned()));
            }
            let heating = map.get("hvac_heater_state").and_then(Value::as_bool).unwrap_or(false);
            let cooling = map.get("hvac_ac_state").and_then(Value::as_bool).unwrap_or(false);
            let fanning = map.get("hvac_fan_state").and_then(Value::as_bool).unwrap_or(false);
            let action = if heating {
                "heating"
            } else if cooling {
                "cooling"
            } else if fanning {
                "fan"
            } else {
                "idle"
            };
            updates.push(("action".to_owned(), action.to_owned()));
        }
        "device" => {
            if let Some(humidity) = map.get("current_humidity").and_then(Value::as_f64) {
                updates.push(("current_humidity".to_owned(), format!("{humidity}")));
            }
            if let Some(fan_mode) = map.get("fan_mode").and_then(Value::as_str) {
                let ha_fan = if fan_mode == "on" { "on" } else { "auto" };
                updates.push(("fan_mode".to_owned(), ha_fan.to_owned()));
            }
            if let Some(away) = map.get("away").and_then(Value::as_bool) {
                updates.push(("preset".to_owned(), if away { "away" } else { "home" }.to_owned()));
            }
        }
        _ => {}
    }
    updates
}

/// Translate an MQTT command into a facade write.
fn command_to_write(cmd: &Command, payload: &str) -> Option<WriteRequest> {
    if cmd.object_type != "ha" {
        return None;
    }
    let serial = &cmd.serial;
    match cmd.field.as_str() {
        "target_temperature" | "target_temperature_low" | "target_temperature_high" => {
            let temp: f64 = payload.trim().parse().ok()?;
            let mut value = serde_json::Map::new();
            value.insert(cmd.field.clone(), json!(temp));
            value.insert("target_change_pending".to_owned(), json!(true));
            Some(WriteRequest {
                object_key: format!("shared.{serial}"),
                value: Value::Object(value),
                client_revision: None,
            })
        }
        "mode" => {
            let mode = match payload.trim() {
                "heat_cool" => "range",
                other @ ("off" | "heat" | "cool") => other,
                _ => return None,
            };
            Some(WriteRequest {
                object_key: format!("shared.{serial}"),
                value: json!({ "target_temperature_type": mode }),
                client_revision: None,
            })
        }
        "fan_mode" => {
            let fan = match payload.trim() {
                "on" => "on",
                "auto" => "auto",
                _ => return None,
            };
            Some(WriteRequest {
                object_key: format!("device.{serial}"),
                value: json!({ "fan_mode": fan }),
                client_revision: None,
            })
        }
        "preset" => Some(WriteRequest {
            object_key: format!("device.{serial}"),
            value: json!({ "away": payload.trim() != "home" }),
            client_revision: None,
        }),
        _ => None,
    }
}

async fn publish_discovery(ctx: &MqttCtx, serial: &str) {
    let device_name = match ctx.service.store().get_object(serial, &format!("shared.{serial}")).await
    {
        Ok(Some(obj)) => obj
            .value
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("Thermostat")
            .to_owned(),
        _ => "Thermostat".to_owned(),
    };

    let documents = [
        (
            discovery::climate_config_topic(&ctx.discovery_prefix, serial),
            discovery::climate_payload(serial, &device_name, &ctx.topic_prefix),
        ),
        (
            discovery::sensor_config_topic(&ctx.discovery_prefix, serial, "temperature"),
            discovery::temperature_sensor_payload(serial, &ctx.topic_prefix),
        ),
        (
            discovery::sensor_config_topic(&ctx.discovery_prefix, serial, "humidity"),
            discovery::humidity_sensor_payload(serial, &ctx.topic_prefix),
        ),
    ];
    for (topic, payload) in documents {
        let bytes = serde_json::to_vec(&payload).unwrap_or_default();
        if let Err(e) = ctx.client.publish(topic, QoS::AtLeastOnce, true, bytes).await {
            tracing::warn!(serial = %serial, err = %e, "discovery publish failed");
        }
    }
}

async fn handle_incoming(ctx: &MqttCtx, topic: &str, payload: &[u8]) {
    let Some(regex) = ctx.command_regex.as_ref() else { return };
    let Some(cmd) = topics::parse_command_topic(regex, topic) else { return };
    let Ok(payload) = std::str::from_utf8(payload) else {
        tracing::debug!(topic = %topic, "non-utf8 command payload ignored");
        return;
    };

    let Some(write) = command_to_write(&cmd, payload) else {
        tracing::debug!(topic = %topic, payload = %payload, "unhandled mqtt command");
        return;
    };

    tracing::info!(serial = %cmd.serial, field = %cmd.field, payload = %payload, "mqtt command");
    if let Err(e) = ctx.service.apply_writes(&cmd.serial, vec![write]).await {
        tracing::warn!(serial = %cmd.serial, err = %e, "mqtt command write rejected");
    }
}

fn spawn_event_loop(ctx: Arc<MqttCtx>, mut event_loop: rumqttc::EventLoop) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    tracing::info!("mqtt connected");
                    let pattern = topics::command_pattern(&ctx.topic_prefix);
                    if let Err(e) = ctx.client.subscribe(pattern, QoS::AtLeastOnce).await {
                        tracing::warn!(err = %e, "mqtt command subscribe failed");
                    }
                    // Announce every known device so HA picks the entities
                    // up even after a broker restart.
                    match ctx.service.store().list_serials().await {
                        Ok(serials) => {
                            for serial in serials {
                                publish_discovery(&ctx, &serial).await;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(err = %e, "failed to enumerate devices for discovery")
                        }
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    handle_incoming(&ctx, &publish.topic, &publish.payload).await;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(err = %e, "mqtt connection error, retrying");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    })
}

#[cfg(test)]
#[path = "mqtt_tests.rs"]
mod tests;
