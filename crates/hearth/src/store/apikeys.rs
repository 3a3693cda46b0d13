// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! API keys for the control surface. Only the SHA-256 of a key is stored;
//! the clear value is returned exactly once at mint time.

use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::Row;

use crate::error::HearthError;
use crate::types::epoch_ms;

use super::Store;

/// Stored API-key record (hash only, never the secret).
#[derive(Debug, Clone, Serialize)]
pub struct ApiKey {
    pub id: i64,
    pub key_preview: String,
    pub user_id: String,
    pub name: String,
    pub created_at: i64,
    pub expires_at: Option<i64>,
    pub last_used_at: Option<i64>,
}

pub fn hash_key(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn mint_secret() -> String {
    format!("hk_{}", uuid::Uuid::new_v4().simple())
}

impl Store {
    /// Mint a key for a user. Returns the record and the clear secret.
    pub async fn create_api_key(
        &self,
        user_id: &str,
        name: &str,
        expires_at: Option<i64>,
    ) -> Result<(ApiKey, String), HearthError> {
        self.ensure_user(user_id).await?;

        let secret = mint_secret();
        let now = epoch_ms();
        let preview = secret.chars().take(7).collect::<String>();

        let result = sqlx::query(
            "INSERT INTO apiKeys (keyHash, keyPreview, userId, name, permissions, createdAt, expiresAt)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(hash_key(&secret))
        .bind(&preview)
        .bind(user_id)
        .bind(name)
        .bind("{\"scopes\":[\"read\",\"write\"]}")
        .bind(now)
        .bind(expires_at)
        .execute(self.write())
        .await?;

        let key = ApiKey {
            id: result.last_insert_rowid(),
            key_preview: preview,
            user_id: user_id.to_owned(),
            name: name.to_owned(),
            created_at: now,
            expires_at,
            last_used_at: None,
        };
        Ok((key, secret))
    }

    /// Validate a presented secret. On success returns the owning user id
    /// and stamps `lastUsedAt`.
    pub async fn validate_api_key(&self, secret: &str) -> Result<Option<String>, HearthError> {
        let now = epoch_ms();
        let row = sqlx::query(
            "SELECT userId FROM apiKeys
             WHERE keyHash = ?1 AND (expiresAt IS NULL OR expiresAt > ?2)",
        )
        .bind(hash_key(secret))
        .bind(now)
        .fetch_optional(self.read())
        .await?;

        let Some(row) = row else { return Ok(None) };
        let user_id: String = row.try_get("userId")?;

        sqlx::query("UPDATE apiKeys SET lastUsedAt = ?1 WHERE keyHash = ?2")
            .bind(now)
            .bind(hash_key(secret))
            .execute(self.write())
            .await?;

        Ok(Some(user_id))
    }

    /// Whether any key exists at all (drives the bootstrap admission rule).
    pub async fn has_api_keys(&self) -> Result<bool, HearthError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM apiKeys").fetch_one(self.read()).await?;
        let n: i64 = row.try_get("n")?;
        Ok(n > 0)
    }

    /// All keys belonging to a user.
    pub async fn list_api_keys(&self, user_id: &str) -> Result<Vec<ApiKey>, HearthError> {
        let rows = sqlx::query(
            "SELECT id, keyPreview, userId, name, createdAt, expiresAt, lastUsedAt
             FROM apiKeys WHERE userId = ?1 ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(self.read())
        .await?;

        rows.iter()
            .map(|r| {
                Ok(ApiKey {
                    id: r.try_get("id")?,
                    key_preview: r.try_get("keyPreview")?,
                    user_id: r.try_get("userId")?,
                    name: r.try_get("name")?,
                    created_at: r.try_get("createdAt")?,
                    expires_at: r.try_get("expiresAt")?,
                    last_used_at: r.try_get("lastUsedAt")?,
                })
            })
            .collect()
    }

    /// Delete a key by id, scoped to its owner. Returns whether it existed.
    pub async fn delete_api_key(&self, user_id: &str, id: i64) -> Result<bool, HearthError> {
        let result = sqlx::query("DELETE FROM apiKeys WHERE id = ?1 AND userId = ?2")
            .bind(id)
            .bind(user_id)
            .execute(self.write())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
#[path = "apikeys_tests.rs"]
mod tests;
