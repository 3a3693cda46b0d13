// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device shares and share invites.

use serde::Serialize;
use sqlx::Row;

use crate::error::HearthError;
use crate::types::epoch_ms;

use super::Store;

/// Invite lifetime.
const INVITE_TTL_MS: i64 = 7 * 24 * 3600 * 1000;

/// An accepted share: `shared_with` may read (and optionally write) the
/// owner's device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceShare {
    pub id: i64,
    pub owner_id: String,
    pub shared_with_user_id: String,
    pub serial: String,
    pub permissions: String,
    pub created_at: i64,
}

/// A pending invite addressed to an email.
#[derive(Debug, Clone, Serialize)]
pub struct ShareInvite {
    pub invite_token: String,
    pub owner_id: String,
    pub email: String,
    pub serial: String,
    pub permissions: String,
    pub status: String,
    pub invited_at: i64,
    pub expires_at: i64,
}

fn row_to_share(r: &sqlx::sqlite::SqliteRow) -> Result<DeviceShare, HearthError> {
    Ok(DeviceShare {
        id: r.try_get("id")?,
        owner_id: r.try_get("ownerId")?,
        shared_with_user_id: r.try_get("sharedWithUserId")?,
        serial: r.try_get("serial")?,
        permissions: r.try_get("permissions")?,
        created_at: r.try_get("createdAt")?,
    })
}

impl Store {
    /// Create an invite for `email` to access `serial`.
    pub async fn create_share_invite(
        &self,
        owner_id: &str,
        email: &str,
        serial: &str,
        permissions: &str,
    ) -> Result<ShareInvite, HearthError> {
        let now = epoch_ms();
        let invite = ShareInvite {
            invite_token: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.to_owned(),
            email: email.to_owned(),
            serial: serial.to_owned(),
            permissions: permissions.to_owned(),
            status: "pending".to_owned(),
            invited_at: now,
            expires_at: now + INVITE_TTL_MS,
        };

        sqlx::query(
            "INSERT INTO deviceShareInvites
             (inviteToken, ownerId, email, serial, permissions, status, invitedAt, expiresAt)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&invite.invite_token)
        .bind(&invite.owner_id)
        .bind(&invite.email)
        .bind(&invite.serial)
        .bind(&invite.permissions)
        .bind(&invite.status)
        .bind(invite.invited_at)
        .bind(invite.expires_at)
        .execute(self.write())
        .await?;

        Ok(invite)
    }

    /// Accept a pending invite on behalf of `user_id`, creating the share.
    pub async fn accept_share_invite(
        &self,
        token: &str,
        user_id: &str,
    ) -> Result<Option<DeviceShare>, HearthError> {
        let now = epoch_ms();
        let result = sqlx::query(
            "UPDATE deviceShareInvites
             SET status = 'accepted', acceptedAt = ?1, sharedWithUserId = ?2
             WHERE inviteToken = ?3 AND status = 'pending' AND expiresAt > ?1",
        )
        .bind(now)
        .bind(user_id)
        .bind(token)
        .execute(self.write())
        .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }

        let row = sqlx::query(
            "SELECT ownerId, serial, permissions FROM deviceShareInvites WHERE inviteToken = ?1",
        )
        .bind(token)
        .fetch_one(self.read())
        .await?;
        let owner_id: String = row.try_get("ownerId")?;
        let serial: String = row.try_get("serial")?;
        let permissions: String = row.try_get("permissions")?;

        self.ensure_user(user_id).await?;
        let inserted = sqlx::query(
            "INSERT INTO deviceShares (ownerId, sharedWithUserId, serial, permissions, createdAt)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (sharedWithUserId, serial) DO UPDATE SET permissions = excluded.permissions",
        )
        .bind(&owner_id)
        .bind(user_id)
        .bind(&serial)
        .bind(&permissions)
        .bind(now)
        .execute(self.write())
        .await?;

        Ok(Some(DeviceShare {
            id: inserted.last_insert_rowid(),
            owner_id,
            shared_with_user_id: user_id.to_owned(),
            serial,
            permissions,
            created_at: now,
        }))
    }

    /// Shares visible to a user, in either direction.
    pub async fn list_shares(&self, user_id: &str) -> Result<Vec<DeviceShare>, HearthError> {
        let rows = sqlx::query(
            "SELECT id, ownerId, sharedWithUserId, serial, permissions, createdAt
             FROM deviceShares WHERE ownerId = ?1 OR sharedWithUserId = ?1 ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(self.read())
        .await?;
        rows.iter().map(row_to_share).collect()
    }

    /// Revoke a share by id; only the owner may revoke.
    pub async fn delete_share(&self, owner_id: &str, id: i64) -> Result<bool, HearthError> {
        let result = sqlx::query("DELETE FROM deviceShares WHERE id = ?1 AND ownerId = ?2")
            .bind(id)
            .bind(owner_id)
            .execute(self.write())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Whether `user_id` may touch `serial` (owner or accepted share).
    pub async fn user_can_access(&self, user_id: &str, serial: &str) -> Result<bool, HearthError> {
        let row = sqlx::query(
            "SELECT EXISTS (
                 SELECT 1 FROM deviceOwners WHERE serial = ?1 AND userId = ?2
                 UNION
                 SELECT 1 FROM deviceShares WHERE serial = ?1 AND sharedWithUserId = ?2
             ) AS ok",
        )
        .bind(serial)
        .bind(user_id)
        .fetch_one(self.read())
        .await?;
        let ok: i64 = row.try_get("ok")?;
        Ok(ok != 0)
    }
}
