//! Persisted credential bundle storage.
//!
//! # Responsibility
//! - Read and write the single credential row in the client-local store.
//! - Enforce the load-once-per-process contract.
//!
//! # Invariants
//! - `load_once` succeeds at most once per vault instance; later calls
//!   fail instead of re-reading a bundle that may have been superseded.
//! - At most one bundle is persisted at any time.

use crate::db::DbError;
use crate::model::identity::{Credential, Identity, IdentityId, Session};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

pub type VaultResult<T> = Result<T, VaultError>;

/// Credential vault persistence and decoding errors.
#[derive(Debug)]
pub enum VaultError {
    Db(DbError),
    /// The bundle was already loaded this process; a second read is a
    /// lifecycle bug in the caller.
    AlreadyLoaded,
    InvalidData(String),
}

impl Display for VaultError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::AlreadyLoaded => {
                write!(f, "credential bundle was already loaded this process")
            }
            Self::InvalidData(message) => {
                write!(f, "invalid persisted credential data: {message}")
            }
        }
    }
}

impl Error for VaultError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::AlreadyLoaded | Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for VaultError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for VaultError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Single-slot store for the credential bundle that survives restarts.
pub struct CredentialVault {
    conn: Mutex<Connection>,
    loaded: AtomicBool,
}

impl CredentialVault {
    /// Wraps a connection opened by `db::open_store` /
    /// `db::open_store_in_memory`.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            loaded: AtomicBool::new(false),
        }
    }

    /// Loads the persisted session, if any. Callable exactly once per
    /// process start.
    pub fn load_once(&self) -> VaultResult<Option<Session>> {
        if self.loaded.swap(true, Ordering::SeqCst) {
            return Err(VaultError::AlreadyLoaded);
        }

        let conn = self.conn.lock().expect("vault connection lock poisoned");
        let row = conn
            .query_row(
                "SELECT identity_id, email, display_name, profile_json,
                        access_token, refresh_token, expires_at
                 FROM credential_vault WHERE slot = 1;",
                [],
                parse_session_row,
            )
            .optional()?;

        match row {
            Some(parsed) => Ok(Some(parsed?)),
            None => Ok(None),
        }
    }

    /// Persists the session's bundle, replacing any previous one.
    pub fn save(&self, session: &Session) -> VaultResult<()> {
        let profile_json = serde_json::to_string(&session.identity.attributes)
            .map_err(|err| VaultError::InvalidData(format!("profile encode failed: {err}")))?;

        let conn = self.conn.lock().expect("vault connection lock poisoned");
        conn.execute(
            "INSERT INTO credential_vault (
                slot, identity_id, email, display_name, profile_json,
                access_token, refresh_token, expires_at
            ) VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(slot) DO UPDATE SET
                identity_id = excluded.identity_id,
                email = excluded.email,
                display_name = excluded.display_name,
                profile_json = excluded.profile_json,
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                saved_at = (strftime('%s', 'now') * 1000);",
            params![
                session.identity.id.to_string(),
                session.identity.email.as_str(),
                session.identity.display_name.as_deref(),
                profile_json,
                session.credential.access_token.as_str(),
                session.credential.refresh_token.as_str(),
                session.credential.expires_at,
            ],
        )?;
        Ok(())
    }

    /// Removes the persisted bundle. Idempotent.
    pub fn clear(&self) -> VaultResult<()> {
        let conn = self.conn.lock().expect("vault connection lock poisoned");
        conn.execute("DELETE FROM credential_vault WHERE slot = 1;", [])?;
        Ok(())
    }
}

fn parse_session_row(row: &Row<'_>) -> rusqlite::Result<VaultResult<Session>> {
    let identity_text: String = row.get("identity_id")?;
    let email: String = row.get("email")?;
    let display_name: Option<String> = row.get("display_name")?;
    let profile_json: String = row.get("profile_json")?;
    let access_token: String = row.get("access_token")?;
    let refresh_token: String = row.get("refresh_token")?;
    let expires_at: i64 = row.get("expires_at")?;

    Ok(decode_session(
        identity_text,
        email,
        display_name,
        profile_json,
        access_token,
        refresh_token,
        expires_at,
    ))
}

fn decode_session(
    identity_text: String,
    email: String,
    display_name: Option<String>,
    profile_json: String,
    access_token: String,
    refresh_token: String,
    expires_at: i64,
) -> VaultResult<Session> {
    let id: IdentityId = Uuid::parse_str(&identity_text).map_err(|_| {
        VaultError::InvalidData(format!("invalid identity id `{identity_text}`"))
    })?;
    let attributes: BTreeMap<String, String> = serde_json::from_str(&profile_json)
        .map_err(|err| VaultError::InvalidData(format!("profile decode failed: {err}")))?;

    Ok(Session {
        identity: Identity {
            id,
            email,
            display_name,
            attributes,
        },
        credential: Credential {
            access_token,
            refresh_token,
            expires_at,
        },
    })
}
