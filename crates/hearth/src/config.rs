// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

/// How long after a subscription ends a new subscribe for the same serial is
/// treated as part of the device's normal poll cycle.
pub const RESUBSCRIBE_WINDOW: std::time::Duration = std::time::Duration::from_secs(5);

/// Configuration for the hearth server.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "hearthd", about = "Self-hosted thermostat cloud")]
pub struct HearthConfig {
    /// Origin devices use to reach this server (from the discovery document).
    #[arg(long, default_value = "http://127.0.0.1:443", env = "HEARTH_API_ORIGIN")]
    pub api_origin: String,

    /// Host to bind the device-facing transport on.
    #[arg(long, default_value = "0.0.0.0", env = "HEARTH_PROXY_HOST")]
    pub proxy_host: String,

    /// Port for the device-facing transport (vendor protocol emulation).
    #[arg(long, default_value_t = 443, env = "HEARTH_PROXY_PORT")]
    pub proxy_port: u16,

    /// Host to bind the control API on.
    #[arg(long, default_value = "0.0.0.0", env = "HEARTH_CONTROL_HOST")]
    pub control_host: String,

    /// Port for the control API (dashboards / automation).
    #[arg(long, default_value_t = 8081, env = "HEARTH_CONTROL_PORT")]
    pub control_port: u16,

    /// Directory containing TLS certificates. Termination itself is handled
    /// by a fronting proxy; this is recorded for operator tooling only.
    #[arg(long, env = "HEARTH_CERT_DIR")]
    pub cert_dir: Option<std::path::PathBuf>,

    /// Pairing-code lifetime in seconds.
    #[arg(long, default_value_t = 3600, env = "HEARTH_ENTRY_KEY_TTL_SECONDS")]
    pub entry_key_ttl_seconds: u64,

    /// Weather cache lifetime in milliseconds.
    #[arg(long, default_value_t = 600_000, env = "HEARTH_WEATHER_CACHE_TTL_MS")]
    pub weather_cache_ttl_ms: i64,

    /// Upstream origin the weather proxy forwards to.
    #[arg(
        long,
        default_value = "https://apps-weather.nest.com",
        env = "HEARTH_WEATHER_UPSTREAM"
    )]
    pub weather_upstream: String,

    /// Maximum concurrent long-poll subscriptions per device serial.
    #[arg(long, default_value_t = 100, env = "HEARTH_MAX_SUBSCRIPTIONS_PER_DEVICE")]
    pub max_subscriptions_per_device: usize,

    /// Device-side suspend ceiling in seconds (30-300). The server holds a
    /// long-poll for 80% of this so the tickle always beats the device's own
    /// abort timer.
    #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u64).range(30..=300), env = "HEARTH_SUSPEND_TIME_MAX")]
    pub suspend_time_max: u64,

    /// Seconds without contact before a device is marked unavailable.
    #[arg(long, default_value_t = 300, env = "HEARTH_AVAILABILITY_TIMEOUT_SECONDS")]
    pub availability_timeout_seconds: u64,

    /// Watchdog sweep interval in seconds.
    #[arg(long, default_value_t = 30, env = "HEARTH_AVAILABILITY_CHECK_SECONDS")]
    pub availability_check_seconds: u64,

    /// Enable detailed request/response logging.
    #[arg(long, env = "HEARTH_DEBUG_LOGGING")]
    pub debug_logging: bool,

    /// Persist uploaded device logs to the database.
    #[arg(long, env = "HEARTH_STORE_DEVICE_LOGS")]
    pub store_device_logs: bool,

    /// Path to the SQLite database file.
    #[arg(long, default_value = "./data/hearth.sqlite", env = "HEARTH_SQLITE3_DB_PATH")]
    pub sqlite3_db_path: std::path::PathBuf,

    /// MQTT broker hostname. The MQTT integration is enabled iff set.
    #[arg(long, env = "HEARTH_MQTT_HOST")]
    pub mqtt_host: Option<String>,

    /// MQTT broker port.
    #[arg(long, default_value_t = 1883, env = "HEARTH_MQTT_PORT")]
    pub mqtt_port: u16,

    /// MQTT username.
    #[arg(long, env = "HEARTH_MQTT_USER")]
    pub mqtt_user: Option<String>,

    /// MQTT password.
    #[arg(long, env = "HEARTH_MQTT_PASSWORD")]
    pub mqtt_password: Option<String>,

    /// Prefix for MQTT state/command topics.
    #[arg(long, default_value = "hearth", env = "HEARTH_MQTT_TOPIC_PREFIX")]
    pub mqtt_topic_prefix: String,

    /// Home Assistant MQTT discovery prefix.
    #[arg(long, default_value = "homeassistant", env = "HEARTH_MQTT_DISCOVERY_PREFIX")]
    pub mqtt_discovery_prefix: String,
}

impl HearthConfig {
    /// Long-poll hold ceiling: 80% of `suspend_time_max`.
    pub fn hold_max(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.suspend_time_max * 800)
    }

    pub fn availability_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.availability_timeout_seconds)
    }

    pub fn availability_check_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.availability_check_seconds)
    }

    /// API origin with an explicit port, for URLs handed to devices.
    ///
    /// The device firmware extracts ports by scanning the URL backwards for
    /// `:` followed by digits. A URL without an explicit port makes that scan
    /// fail and the device falls back to a stale cached port, so the
    /// discovery document must always spell the port out.
    pub fn api_origin_with_port(&self) -> String {
        let origin = self.api_origin.trim_end_matches('/');
        let rest = origin
            .strip_prefix("https://")
            .or_else(|| origin.strip_prefix("http://"))
            .unwrap_or(origin);
        let authority = rest.split('/').next().unwrap_or(rest);
        if authority.rsplit(':').next().is_some_and(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit())) {
            return origin.to_owned();
        }
        format!("{origin}:{}", self.proxy_port)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
