// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SQLite-backed persistence.
//!
//! One read pool for concurrent SELECTs and a single-connection write pool so
//! every mutation is serialized; the guarded object upsert relies on that to
//! stay atomic per `(serial, object_key)`.

pub mod apikeys;
pub mod misc;
pub mod objects;
pub mod pairing;
pub mod sharing;

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};

use crate::error::HearthError;

/// Read-pool size. Writes always go through the single write connection.
const MAX_READ_CONNECTIONS: u32 = 6;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the hearth database.
pub struct Store {
    read: Pool<Sqlite>,
    write: Pool<Sqlite>,
}

impl Store {
    /// Open (creating if missing) the database at `path` and ensure the
    /// schema exists.
    pub async fn open(path: &Path) -> Result<Self, HearthError> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir).map_err(|e| {
                    tracing::error!(err = %e, dir = %dir.display(), "failed to create data dir");
                    HearthError::StoreFailure
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true);

        let write = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await?;
        let read = SqlitePoolOptions::new()
            .max_connections(MAX_READ_CONNECTIONS)
            .connect_with(options)
            .await?;

        let store = Self { read, write };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub(crate) fn read(&self) -> &Pool<Sqlite> {
        &self.read
    }

    pub(crate) fn write(&self) -> &Pool<Sqlite> {
        &self.write
    }

    /// Create all tables. Schema migration tooling is out of scope; the
    /// layout only ever grows additively.
    async fn ensure_schema(&self) -> Result<(), HearthError> {
        const SCHEMA: &[&str] = &[
            "CREATE TABLE IF NOT EXISTS states (
                serial TEXT NOT NULL,
                object_key TEXT NOT NULL,
                object_revision INTEGER NOT NULL,
                object_timestamp INTEGER NOT NULL,
                value TEXT NOT NULL,
                updatedAt INTEGER NOT NULL,
                PRIMARY KEY (serial, object_key)
            )",
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                serial TEXT NOT NULL,
                createdAt INTEGER NOT NULL,
                lastSeenAt INTEGER NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT,
                createdAt INTEGER NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS entryKeys (
                code TEXT PRIMARY KEY,
                serial TEXT NOT NULL,
                createdAt INTEGER NOT NULL,
                expiresAt INTEGER NOT NULL,
                claimedBy TEXT,
                claimedAt INTEGER
            )",
            "CREATE TABLE IF NOT EXISTS deviceOwners (
                serial TEXT PRIMARY KEY,
                userId TEXT NOT NULL,
                createdAt INTEGER NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS apiKeys (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                keyHash TEXT NOT NULL UNIQUE,
                keyPreview TEXT NOT NULL,
                userId TEXT NOT NULL,
                name TEXT NOT NULL,
                permissions TEXT NOT NULL,
                createdAt INTEGER NOT NULL,
                expiresAt INTEGER,
                lastUsedAt INTEGER
            )",
            "CREATE TABLE IF NOT EXISTS deviceShares (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ownerId TEXT NOT NULL,
                sharedWithUserId TEXT NOT NULL,
                serial TEXT NOT NULL,
                permissions TEXT NOT NULL,
                createdAt INTEGER NOT NULL,
                UNIQUE (sharedWithUserId, serial)
            )",
            "CREATE TABLE IF NOT EXISTS deviceShareInvites (
                inviteToken TEXT PRIMARY KEY,
                ownerId TEXT NOT NULL,
                email TEXT NOT NULL,
                serial TEXT NOT NULL,
                permissions TEXT NOT NULL,
                status TEXT NOT NULL,
                invitedAt INTEGER NOT NULL,
                expiresAt INTEGER NOT NULL,
                acceptedAt INTEGER,
                sharedWithUserId TEXT
            )",
            "CREATE TABLE IF NOT EXISTS integrations (
                userId TEXT NOT NULL,
                type TEXT NOT NULL,
                enabled INTEGER NOT NULL,
                config TEXT NOT NULL,
                createdAt INTEGER NOT NULL,
                updatedAt INTEGER NOT NULL,
                PRIMARY KEY (userId, type)
            )",
            "CREATE TABLE IF NOT EXISTS weather (
                postalCode TEXT NOT NULL,
                country TEXT NOT NULL,
                fetchedAt INTEGER NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (postalCode, country)
            )",
            "CREATE TABLE IF NOT EXISTS logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                serial TEXT,
                createdAt INTEGER NOT NULL,
                size INTEGER NOT NULL,
                content BLOB
            )",
        ];

        for &stmt in SCHEMA {
            sqlx::query(stmt).execute(&self.write).await?;
        }
        Ok(())
    }

    /// Close both pools. Outstanding acquires fail afterwards.
    pub async fn close(&self) {
        self.read.close().await;
        self.write.close().await;
    }
}
