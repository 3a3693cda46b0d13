// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Users, pairing codes (entry keys), and device ownership.

use rand::Rng;
use serde::Serialize;
use sqlx::Row;

use crate::error::HearthError;
use crate::types::epoch_ms;

use super::Store;

/// Characters used for pairing codes. Ambiguous glyphs (0/O, 1/I) are
/// excluded because the code is read off a thermostat screen.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_LEN: usize = 7;

/// A pairing code minted for a device.
#[derive(Debug, Clone, Serialize)]
pub struct EntryKey {
    pub code: String,
    pub serial: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<i64>,
}

/// Ownership record binding a device to a user.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceOwner {
    pub serial: String,
    pub user_id: String,
    pub created_at: i64,
}

fn mint_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

impl Store {
    /// Mint a new pairing code for `serial`, replacing any unclaimed one.
    pub async fn generate_entry_key(
        &self,
        serial: &str,
        ttl_seconds: u64,
    ) -> Result<EntryKey, HearthError> {
        let now = epoch_ms();
        let key = EntryKey {
            code: mint_code(),
            serial: serial.to_owned(),
            created_at: now,
            expires_at: now + (ttl_seconds as i64) * 1000,
            claimed_by: None,
            claimed_at: None,
        };

        // A device only ever has one pending code.
        sqlx::query("DELETE FROM entryKeys WHERE serial = ?1 AND claimedBy IS NULL")
            .bind(serial)
            .execute(self.write())
            .await?;
        sqlx::query(
            "INSERT INTO entryKeys (code, serial, createdAt, expiresAt) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&key.code)
        .bind(&key.serial)
        .bind(key.created_at)
        .bind(key.expires_at)
        .execute(self.write())
        .await?;

        Ok(key)
    }

    /// Claim a pairing code for a user. Returns the serial it was bound to,
    /// or `None` when the code is unknown, expired, or already claimed.
    pub async fn claim_entry_key(
        &self,
        code: &str,
        user_id: &str,
    ) -> Result<Option<String>, HearthError> {
        let now = epoch_ms();
        let normalized = code.trim().to_ascii_uppercase();

        let result = sqlx::query(
            "UPDATE entryKeys SET claimedBy = ?1, claimedAt = ?2
             WHERE code = ?3 AND claimedBy IS NULL AND expiresAt > ?2",
        )
        .bind(user_id)
        .bind(now)
        .bind(&normalized)
        .execute(self.write())
        .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }

        let row = sqlx::query("SELECT serial FROM entryKeys WHERE code = ?1")
            .bind(&normalized)
            .fetch_one(self.read())
            .await?;
        let serial: String = row.try_get("serial")?;

        self.ensure_user(user_id).await?;
        sqlx::query(
            "INSERT INTO deviceOwners (serial, userId, createdAt) VALUES (?1, ?2, ?3)
             ON CONFLICT (serial) DO UPDATE SET userId = excluded.userId",
        )
        .bind(&serial)
        .bind(user_id)
        .bind(now)
        .execute(self.write())
        .await?;

        Ok(Some(serial))
    }

    /// Insert the user row if it does not exist yet.
    pub async fn ensure_user(&self, user_id: &str) -> Result<(), HearthError> {
        sqlx::query("INSERT OR IGNORE INTO users (id, createdAt) VALUES (?1, ?2)")
            .bind(user_id)
            .bind(epoch_ms())
            .execute(self.write())
            .await?;
        Ok(())
    }

    /// Owner record for a serial, if paired.
    pub async fn get_owner(&self, serial: &str) -> Result<Option<DeviceOwner>, HearthError> {
        let row = sqlx::query("SELECT serial, userId, createdAt FROM deviceOwners WHERE serial = ?1")
            .bind(serial)
            .fetch_optional(self.read())
            .await?;
        Ok(match row {
            Some(r) => Some(DeviceOwner {
                serial: r.try_get("serial")?,
                user_id: r.try_get("userId")?,
                created_at: r.try_get("createdAt")?,
            }),
            None => None,
        })
    }

    /// Remove ownership and any pending pairing codes for a serial.
    pub async fn forget_device(&self, serial: &str) -> Result<(), HearthError> {
        sqlx::query("DELETE FROM deviceOwners WHERE serial = ?1")
            .bind(serial)
            .execute(self.write())
            .await?;
        sqlx::query("DELETE FROM entryKeys WHERE serial = ?1")
            .bind(serial)
            .execute(self.write())
            .await?;
        Ok(())
    }
}
