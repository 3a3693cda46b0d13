// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Diagnostic sessions, uploaded device logs, weather cache, and integration
//! configs.

use serde::Serialize;
use sqlx::Row;

use crate::error::HearthError;
use crate::types::epoch_ms;

use super::Store;

/// Stored integration configuration.
#[derive(Debug, Clone, Serialize)]
pub struct IntegrationConfig {
    pub user_id: String,
    pub integration_type: String,
    pub enabled: bool,
    pub config: serde_json::Value,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Store {
    /// Record a device transport session for diagnostics. The device reuses
    /// its session id across overlapping requests, so this is upsert-only
    /// and never used as a subscription key.
    pub async fn touch_session(&self, session_id: &str, serial: &str) -> Result<(), HearthError> {
        let now = epoch_ms();
        sqlx::query(
            "INSERT INTO sessions (id, serial, createdAt, lastSeenAt) VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT (id) DO UPDATE SET serial = excluded.serial, lastSeenAt = excluded.lastSeenAt",
        )
        .bind(session_id)
        .bind(serial)
        .bind(now)
        .execute(self.write())
        .await?;
        Ok(())
    }

    /// Persist an uploaded device log blob.
    pub async fn store_log(&self, serial: Option<&str>, content: &[u8]) -> Result<(), HearthError> {
        sqlx::query("INSERT INTO logs (serial, createdAt, size, content) VALUES (?1, ?2, ?3, ?4)")
            .bind(serial)
            .bind(epoch_ms())
            .bind(content.len() as i64)
            .bind(content)
            .execute(self.write())
            .await?;
        Ok(())
    }

    /// Cached weather payload for a location, with its fetch timestamp.
    pub async fn get_weather(
        &self,
        postal_code: &str,
        country: &str,
    ) -> Result<Option<(i64, serde_json::Value)>, HearthError> {
        let row = sqlx::query(
            "SELECT fetchedAt, data FROM weather WHERE postalCode = ?1 AND country = ?2",
        )
        .bind(postal_code)
        .bind(country)
        .fetch_optional(self.read())
        .await?;

        Ok(match row {
            Some(r) => {
                let fetched_at: i64 = r.try_get("fetchedAt")?;
                let raw: String = r.try_get("data")?;
                let data = serde_json::from_str(&raw).unwrap_or(serde_json::Value::Null);
                Some((fetched_at, data))
            }
            None => None,
        })
    }

    /// Replace the cached weather payload for a location.
    pub async fn put_weather(
        &self,
        postal_code: &str,
        country: &str,
        data: &serde_json::Value,
    ) -> Result<(), HearthError> {
        let raw = serde_json::to_string(data).map_err(|_| HearthError::Internal)?;
        sqlx::query(
            "INSERT INTO weather (postalCode, country, fetchedAt, data) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (postalCode, country) DO UPDATE SET
                 fetchedAt = excluded.fetchedAt, data = excluded.data",
        )
        .bind(postal_code)
        .bind(country)
        .bind(epoch_ms())
        .bind(&raw)
        .execute(self.write())
        .await?;
        Ok(())
    }

    /// Fetch one integration config.
    pub async fn get_integration(
        &self,
        user_id: &str,
        integration_type: &str,
    ) -> Result<Option<IntegrationConfig>, HearthError> {
        let row = sqlx::query(
            "SELECT userId, type, enabled, config, createdAt, updatedAt
             FROM integrations WHERE userId = ?1 AND type = ?2",
        )
        .bind(user_id)
        .bind(integration_type)
        .fetch_optional(self.read())
        .await?;

        Ok(match row {
            Some(r) => {
                let raw: String = r.try_get("config")?;
                Some(IntegrationConfig {
                    user_id: r.try_get("userId")?,
                    integration_type: r.try_get("type")?,
                    enabled: r.try_get::<i64, _>("enabled")? != 0,
                    config: serde_json::from_str(&raw).unwrap_or(serde_json::Value::Null),
                    created_at: r.try_get("createdAt")?,
                    updated_at: r.try_get("updatedAt")?,
                })
            }
            None => None,
        })
    }

    /// Create or update an integration config.
    pub async fn put_integration(
        &self,
        user_id: &str,
        integration_type: &str,
        enabled: bool,
        config: &serde_json::Value,
    ) -> Result<(), HearthError> {
        let raw = serde_json::to_string(config).map_err(|_| HearthError::InvalidPayload)?;
        let now = epoch_ms();
        sqlx::query(
            "INSERT INTO integrations (userId, type, enabled, config, createdAt, updatedAt)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT (userId, type) DO UPDATE SET
                 enabled = excluded.enabled, config = excluded.config, updatedAt = excluded.updatedAt",
        )
        .bind(user_id)
        .bind(integration_type)
        .bind(enabled as i64)
        .bind(&raw)
        .bind(now)
        .execute(self.write())
        .await?;
        Ok(())
    }
}
