// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Object-store operations over the `states` table.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::error::HearthError;
use crate::types::DeviceObject;

use super::Store;

/// Outcome of a guarded upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The row was written; the new revision is now visible to readers.
    Written,
    /// The stored revision was already >= the offered one; nothing changed.
    Stale,
}

fn row_to_object(row: &SqliteRow) -> Result<DeviceObject, HearthError> {
    let raw: String = row.try_get("value")?;
    let value = serde_json::from_str(&raw).unwrap_or(serde_json::Value::Null);
    Ok(DeviceObject {
        serial: row.try_get("serial")?,
        object_key: row.try_get("object_key")?,
        object_revision: row.try_get("object_revision")?,
        object_timestamp: row.try_get("object_timestamp")?,
        value,
        updated_at: row.try_get("updatedAt")?,
    })
}

impl Store {
    /// Upsert an object, guarded on revision monotonicity.
    ///
    /// The revision comparison happens inside SQLite (`WHERE
    /// excluded.object_revision > states.object_revision`), so the check and
    /// the write are one atomic statement on the single write connection.
    pub async fn upsert_object(&self, obj: &DeviceObject) -> Result<UpsertOutcome, HearthError> {
        let value = serde_json::to_string(&obj.value).map_err(|_| HearthError::InvalidPayload)?;
        let result = sqlx::query(
            "INSERT INTO states (serial, object_key, object_revision, object_timestamp, value, updatedAt)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (serial, object_key) DO UPDATE SET
                 object_revision = excluded.object_revision,
                 object_timestamp = excluded.object_timestamp,
                 value = excluded.value,
                 updatedAt = excluded.updatedAt
             WHERE excluded.object_revision > states.object_revision",
        )
        .bind(&obj.serial)
        .bind(&obj.object_key)
        .bind(obj.object_revision)
        .bind(obj.object_timestamp)
        .bind(&value)
        .bind(obj.updated_at)
        .execute(self.write())
        .await?;

        if result.rows_affected() == 0 {
            Ok(UpsertOutcome::Stale)
        } else {
            Ok(UpsertOutcome::Written)
        }
    }

    /// Fetch one object, or `None` when missing.
    pub async fn get_object(
        &self,
        serial: &str,
        object_key: &str,
    ) -> Result<Option<DeviceObject>, HearthError> {
        let row = sqlx::query(
            "SELECT serial, object_key, object_revision, object_timestamp, value, updatedAt
             FROM states WHERE serial = ?1 AND object_key = ?2",
        )
        .bind(serial)
        .bind(object_key)
        .fetch_optional(self.read())
        .await?;

        row.as_ref().map(row_to_object).transpose()
    }

    /// All objects for a serial, ordered by key.
    pub async fn list_objects(&self, serial: &str) -> Result<Vec<DeviceObject>, HearthError> {
        let rows = sqlx::query(
            "SELECT serial, object_key, object_revision, object_timestamp, value, updatedAt
             FROM states WHERE serial = ?1 ORDER BY object_key",
        )
        .bind(serial)
        .fetch_all(self.read())
        .await?;

        rows.iter().map(row_to_object).collect()
    }

    /// All known device serials (any serial with at least one object).
    pub async fn list_serials(&self) -> Result<Vec<String>, HearthError> {
        let rows = sqlx::query("SELECT DISTINCT serial FROM states ORDER BY serial")
            .fetch_all(self.read())
            .await?;
        rows.iter().map(|r| r.try_get("serial").map_err(HearthError::from)).collect()
    }

    /// Delete one object. Returns whether a row existed.
    pub async fn delete_object(&self, serial: &str, object_key: &str) -> Result<bool, HearthError> {
        let result = sqlx::query("DELETE FROM states WHERE serial = ?1 AND object_key = ?2")
            .bind(serial)
            .bind(object_key)
            .execute(self.write())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete every object for a serial. Returns the number of rows removed.
    pub async fn delete_device(&self, serial: &str) -> Result<u64, HearthError> {
        let result = sqlx::query("DELETE FROM states WHERE serial = ?1")
            .bind(serial)
            .execute(self.write())
            .await?;
        Ok(result.rows_affected())
    }

    /// First structure id among the devices owned by `user_id`, if any.
    pub async fn first_structure_for_user(
        &self,
        user_id: &str,
    ) -> Result<Option<String>, HearthError> {
        let row = sqlx::query(
            "SELECT json_extract(s.value, '$.structure_id') AS structure_id
             FROM states s
             JOIN deviceOwners o ON o.serial = s.serial
             WHERE o.userId = ?1
               AND s.object_key = 'device.' || s.serial
               AND json_extract(s.value, '$.structure_id') IS NOT NULL
             ORDER BY o.createdAt
             LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(self.read())
        .await?;

        Ok(match row {
            Some(r) => r.try_get("structure_id").ok(),
            None => None,
        })
    }
}

#[cfg(test)]
#[path = "objects_tests.rs"]
mod tests;
