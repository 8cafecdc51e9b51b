//! Credential injection into the host's embedded key-value session
//! database. Writes go through a transaction, with a plain-copy backup of
//! the database file taken first.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use swx_domain::{AUTH_CLEAR_KEYS, SESSION_AUTH_KEYS};

/// Credential triple cached by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCredential {
    pub email: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
}

pub struct SessionInjector {
    db_path: PathBuf,
}

impl SessionInjector {
    #[must_use]
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn open(&self) -> Result<Connection> {
        if !self.db_path.exists() {
            anyhow::bail!(
                "host session database not found at {}",
                self.db_path.display()
            );
        }
        Connection::open(&self.db_path)
            .with_context(|| format!("failed to open {}", self.db_path.display()))
    }

    /// The credential currently cached by the host, if it is signed in.
    pub fn read_session(&self) -> Result<Option<SessionCredential>> {
        let conn = self.open()?;
        let get = |key: &str| -> Result<Option<String>> {
            conn.query_row(
                "SELECT value FROM ItemTable WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .context("failed to read session value")
        };
        let [email_key, access_key, refresh_key] = SESSION_AUTH_KEYS;
        let (email, access_token) = match (get(email_key)?, get(access_key)?) {
            (Some(email), Some(access_token)) => (email, access_token),
            _ => return Ok(None),
        };
        Ok(Some(SessionCredential {
            email,
            access_token,
            refresh_token: get(refresh_key)?,
        }))
    }

    /// Write a profile's credential triple into the session database.
    pub fn inject(&self, credential: &SessionCredential) -> Result<()> {
        self.backup()?;
        let conn = self.open()?;
        let tx = conn
            .unchecked_transaction()
            .context("failed to start injection transaction")?;
        let [email_key, access_key, refresh_key] = SESSION_AUTH_KEYS;
        tx.execute(
            "INSERT OR REPLACE INTO ItemTable (key, value) VALUES (?1, ?2)",
            params![email_key, credential.email],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO ItemTable (key, value) VALUES (?1, ?2)",
            params![access_key, credential.access_token],
        )?;
        if let Some(refresh) = &credential.refresh_token {
            tx.execute(
                "INSERT OR REPLACE INTO ItemTable (key, value) VALUES (?1, ?2)",
                params![refresh_key, refresh],
            )?;
        }
        tx.commit().context("failed to commit credential injection")?;
        debug!(email = %credential.email, "session credential injected");
        Ok(())
    }

    /// Delete every cached auth key (logout / factory reset).
    pub fn clear_auth(&self) -> Result<()> {
        let conn = self.open()?;
        let tx = conn
            .unchecked_transaction()
            .context("failed to start auth-clear transaction")?;
        for key in AUTH_CLEAR_KEYS {
            tx.execute("DELETE FROM ItemTable WHERE key = ?1", params![key])?;
        }
        tx.commit().context("failed to commit auth clear")?;
        Ok(())
    }

    fn backup(&self) -> Result<()> {
        if !self.db_path.exists() {
            anyhow::bail!(
                "host session database not found at {}",
                self.db_path.display()
            );
        }
        let mut backup = self.db_path.as_os_str().to_owned();
        backup.push(".backup");
        fs::copy(&self.db_path, Path::new(&backup))
            .with_context(|| format!("failed to back up {}", self.db_path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn seed_db(path: &Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE ItemTable (key TEXT PRIMARY KEY, value BLOB)",
        )
        .unwrap();
    }

    fn credential() -> SessionCredential {
        SessionCredential {
            email: "a@example.com".into(),
            access_token: "access-1".into(),
            refresh_token: Some("refresh-1".into()),
        }
    }

    #[test]
    fn inject_then_read_round_trips() -> Result<()> {
        let tmp = tempdir()?;
        let db = tmp.path().join("state.vscdb");
        seed_db(&db);
        let injector = SessionInjector::new(&db);

        injector.inject(&credential())?;
        let session = injector.read_session()?.expect("session present");
        assert_eq!(session, credential());
        Ok(())
    }

    #[test]
    fn inject_backs_up_the_database_first() -> Result<()> {
        let tmp = tempdir()?;
        let db = tmp.path().join("state.vscdb");
        seed_db(&db);
        SessionInjector::new(&db).inject(&credential())?;
        assert!(tmp.path().join("state.vscdb.backup").exists());
        Ok(())
    }

    #[test]
    fn read_session_requires_both_email_and_token() -> Result<()> {
        let tmp = tempdir()?;
        let db = tmp.path().join("state.vscdb");
        seed_db(&db);
        let conn = Connection::open(&db)?;
        conn.execute(
            "INSERT INTO ItemTable (key, value) VALUES (?1, ?2)",
            params!["cursorAuth/cachedEmail", "a@example.com"],
        )?;
        assert!(SessionInjector::new(&db).read_session()?.is_none());
        Ok(())
    }

    #[test]
    fn clear_auth_removes_every_auth_key() -> Result<()> {
        let tmp = tempdir()?;
        let db = tmp.path().join("state.vscdb");
        seed_db(&db);
        let injector = SessionInjector::new(&db);
        injector.inject(&credential())?;
        injector.clear_auth()?;
        assert!(injector.read_session()?.is_none());
        Ok(())
    }

    #[test]
    fn missing_database_is_an_error() {
        let tmp = tempdir().unwrap();
        let injector = SessionInjector::new(tmp.path().join("absent.vscdb"));
        assert!(injector.inject(&credential()).is_err());
        assert!(injector.read_session().is_err());
    }
}
