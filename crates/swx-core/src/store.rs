//! Durable profile/license/config store backed by a single SQLite file.
//!
//! Single-writer by design: every mutation runs inside one transaction so
//! callers never observe half-applied state (in particular `set_current`,
//! which clears and sets the current flag in one step).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use swx_domain::{DeviceIdentityBundle, OperationLogEntry, Profile};

/// Closed error set for store operations. Everything else is an internal
/// failure and propagates through `anyhow`.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("a profile with email {0} already exists")]
    DuplicateEmail(String),
    #[error("profile {0} not found")]
    NotFound(String),
}

/// Partial profile mutation; `None` fields are left untouched. The doubly
/// optional fields distinguish "leave alone" from "clear".
#[derive(Debug, Default, Clone)]
pub struct ProfileUpdate {
    pub email: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<Option<String>>,
    pub display_name: Option<Option<String>>,
    pub device_identity: Option<Option<DeviceIdentityBundle>>,
}

/// Local mirror of an activated license key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseRecord {
    pub id: String,
    pub license_key: String,
    pub nickname: Option<String>,
    pub email: Option<String>,
    pub token: Option<String>,
    pub expires_at: Option<String>,
    pub status: String,
}

pub struct CredentialStore {
    conn: Connection,
}

impl CredentialStore {
    /// Open (creating if needed) the store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open profile store at {}", path.display()))?;
        Self::from_connection(conn)
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory().context("failed to open store")?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.busy_timeout(std::time::Duration::from_secs(10))
            .context("failed to set store busy timeout")?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS profiles (
                    id TEXT PRIMARY KEY,
                    email TEXT UNIQUE NOT NULL,
                    access_token TEXT NOT NULL,
                    refresh_token TEXT,
                    display_name TEXT,
                    device_identity TEXT,
                    is_current INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS licenses (
                    id TEXT PRIMARY KEY,
                    license_key TEXT UNIQUE NOT NULL,
                    nickname TEXT,
                    email TEXT,
                    token TEXT,
                    expires_at TEXT,
                    status TEXT NOT NULL DEFAULT 'pending',
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS ops_log (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    action TEXT NOT NULL,
                    details TEXT,
                    created_at TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS config (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );
                "#,
            )
            .context("failed to initialize profile store schema")?;
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<Profile>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, email, access_token, refresh_token, display_name, device_identity,
                    is_current, created_at, updated_at
             FROM profiles ORDER BY created_at DESC, email ASC",
        )?;
        let rows = stmt.query_map([], row_to_profile)?;
        let mut profiles = Vec::new();
        for profile in rows {
            profiles.push(profile?);
        }
        Ok(profiles)
    }

    pub fn get(&self, id: &str) -> Result<Option<Profile>> {
        self.conn
            .query_row(
                "SELECT id, email, access_token, refresh_token, display_name, device_identity,
                        is_current, created_at, updated_at
                 FROM profiles WHERE id = ?1",
                params![id],
                row_to_profile,
            )
            .optional()
            .context("failed to load profile by id")
    }

    pub fn get_by_email(&self, email: &str) -> Result<Option<Profile>> {
        self.conn
            .query_row(
                "SELECT id, email, access_token, refresh_token, display_name, device_identity,
                        is_current, created_at, updated_at
                 FROM profiles WHERE email = ?1",
                params![email],
                row_to_profile,
            )
            .optional()
            .context("failed to load profile by email")
    }

    /// The profile currently marked live on the host, if any.
    pub fn current(&self) -> Result<Option<Profile>> {
        self.conn
            .query_row(
                "SELECT id, email, access_token, refresh_token, display_name, device_identity,
                        is_current, created_at, updated_at
                 FROM profiles WHERE is_current = 1",
                [],
                row_to_profile,
            )
            .optional()
            .context("failed to load current profile")
    }

    /// Insert a new profile. Fails with [`StoreError::DuplicateEmail`] when
    /// the email (case-sensitive, as stored) is already present.
    pub fn add(
        &self,
        email: &str,
        access_token: &str,
        refresh_token: Option<&str>,
        display_name: Option<&str>,
    ) -> Result<Profile> {
        if self.get_by_email(email)?.is_some() {
            return Err(StoreError::DuplicateEmail(email.to_string()).into());
        }
        let id = Uuid::new_v4().to_string();
        let now = now_rfc3339();
        self.conn
            .execute(
                "INSERT INTO profiles (id, email, access_token, refresh_token, display_name,
                                       device_identity, is_current, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, NULL, 0, ?6, ?6)",
                params![id, email, access_token, refresh_token, display_name, now],
            )
            .context("failed to insert profile")?;
        debug!(email, "profile added");
        self.get(&id)?
            .ok_or_else(|| StoreError::NotFound(id).into())
    }

    /// Apply a partial update; untouched fields keep their values.
    pub fn update(&self, id: &str, update: &ProfileUpdate) -> Result<Profile> {
        let existing = self
            .get(id)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let email = update.email.as_deref().unwrap_or(&existing.email);
        let access_token = update
            .access_token
            .as_deref()
            .unwrap_or(&existing.access_token);
        let refresh_token = match &update.refresh_token {
            Some(value) => value.as_deref(),
            None => existing.refresh_token.as_deref(),
        };
        let display_name = match &update.display_name {
            Some(value) => value.as_deref(),
            None => existing.display_name.as_deref(),
        };
        let device_identity = match &update.device_identity {
            Some(value) => value.as_ref(),
            None => existing.device_identity.as_ref(),
        };
        let identity_json = device_identity
            .map(serde_json::to_string)
            .transpose()
            .context("failed to encode device identity")?;

        self.conn
            .execute(
                "UPDATE profiles
                 SET email = ?1, access_token = ?2, refresh_token = ?3, display_name = ?4,
                     device_identity = ?5, updated_at = ?6
                 WHERE id = ?7",
                params![
                    email,
                    access_token,
                    refresh_token,
                    display_name,
                    identity_json,
                    now_rfc3339(),
                    id
                ],
            )
            .context("failed to update profile")?;
        self.get(id)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()).into())
    }

    /// Delete a profile. Deleting the current profile is allowed and leaves
    /// no current profile behind.
    pub fn delete(&self, id: &str) -> Result<()> {
        let changed = self
            .conn
            .execute("DELETE FROM profiles WHERE id = ?1", params![id])
            .context("failed to delete profile")?;
        if changed == 0 {
            return Err(StoreError::NotFound(id.to_string()).into());
        }
        Ok(())
    }

    /// Mark exactly one profile current. Clear-all and set-one run in a
    /// single transaction so no reader observes zero or two current rows.
    pub fn set_current(&self, id: &str) -> Result<()> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("failed to start set_current transaction")?;
        tx.execute("UPDATE profiles SET is_current = 0", [])?;
        let changed = tx.execute(
            "UPDATE profiles SET is_current = 1, updated_at = ?1 WHERE id = ?2",
            params![now_rfc3339(), id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id.to_string()).into());
        }
        tx.commit().context("failed to commit set_current")?;
        Ok(())
    }

    pub fn append_log(&self, action: &str, details: Option<&str>) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO ops_log (action, details, created_at) VALUES (?1, ?2, ?3)",
                params![action, details, now_rfc3339()],
            )
            .context("failed to append operation log")?;
        Ok(())
    }

    pub fn recent_logs(&self, limit: u32) -> Result<Vec<OperationLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, action, details, created_at FROM ops_log
             ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        let mut entries = Vec::new();
        for row in rows {
            let (id, action, details, created_at) = row?;
            entries.push(OperationLogEntry {
                id,
                action,
                details,
                timestamp: parse_rfc3339(&created_at),
            });
        }
        Ok(entries)
    }

    // --- generic key-value config, shared with the license verifier ---

    /// Stored config value; empty strings count as cleared.
    pub fn get_config(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM config WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .context("failed to read config value")?;
        Ok(value.filter(|value| !value.is_empty()))
    }

    pub fn set_config(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO config (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .context("failed to write config value")?;
        Ok(())
    }

    // --- license record mirror ---

    pub fn upsert_license(&self, record: &LicenseRecord) -> Result<()> {
        let now = now_rfc3339();
        self.conn
            .execute(
                "INSERT INTO licenses (id, license_key, nickname, email, token, expires_at,
                                       status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                 ON CONFLICT(license_key) DO UPDATE SET
                     nickname = excluded.nickname,
                     email = excluded.email,
                     token = excluded.token,
                     expires_at = excluded.expires_at,
                     status = excluded.status,
                     updated_at = excluded.updated_at",
                params![
                    record.id,
                    record.license_key,
                    record.nickname,
                    record.email,
                    record.token,
                    record.expires_at,
                    record.status,
                    now
                ],
            )
            .context("failed to upsert license record")?;
        Ok(())
    }

    pub fn licenses(&self) -> Result<Vec<LicenseRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, license_key, nickname, email, token, expires_at, status
             FROM licenses ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(LicenseRecord {
                id: row.get(0)?,
                license_key: row.get(1)?,
                nickname: row.get(2)?,
                email: row.get(3)?,
                token: row.get(4)?,
                expires_at: row.get(5)?,
                status: row.get(6)?,
            })
        })?;
        let mut records = Vec::new();
        for record in rows {
            records.push(record?);
        }
        Ok(records)
    }

    /// Drop every mirrored license record (deactivation, authoritative
    /// server rejection).
    pub fn clear_license_records(&self) -> Result<()> {
        self.conn
            .execute("DELETE FROM licenses", [])
            .context("failed to clear license records")?;
        Ok(())
    }
}

fn row_to_profile(row: &rusqlite::Row<'_>) -> rusqlite::Result<Profile> {
    let identity_json: Option<String> = row.get(5)?;
    let device_identity = identity_json
        .as_deref()
        .and_then(|json| serde_json::from_str(json).ok());
    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;
    Ok(Profile {
        id: row.get(0)?,
        email: row.get(1)?,
        access_token: row.get(2)?,
        refresh_token: row.get(3)?,
        display_name: row.get(4)?,
        device_identity,
        is_current: row.get::<_, i64>(6)? != 0,
        created_at: parse_rfc3339(&created_at),
        updated_at: parse_rfc3339(&updated_at),
    })
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string())
}

fn parse_rfc3339(raw: &str) -> OffsetDateTime {
    OffsetDateTime::parse(raw, &Rfc3339).unwrap_or(OffsetDateTime::UNIX_EPOCH)
}
